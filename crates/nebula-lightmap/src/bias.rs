//! Position biasing against shadow leaking at seams.
//!
//! A lightmap sample sitting exactly on a seam between coplanar or adjacent
//! objects tends to see the back of its neighbour, which shows up as leaked
//! light or self-shadowing. Short probe rays along the surface find the
//! nearest backface, and the sample is moved to that face's front side.

use glam::{Vec3, Vec4};
use rayon::prelude::*;

use crate::context::{CancellationToken, WorkerContext};
use crate::map::{ObjectMapSet, unpack_rgb10_signed};
use crate::ray::{Ray, tangent_frame};
use crate::scene::StaticScene;

/// Probe length as a fraction of the texel's bias scale.
pub const PROBE_LENGTH_SCALE: f32 = 0.6;

/// Corrected position of one sample.
///
/// Starts from `position + normal * shadow_bias` and probes `±tangent` and
/// `±binormal` up to `bias_scale * PROBE_LENGTH_SCALE`. The closest backface
/// hit (`dot(hit_normal, dir) > 0`) relocates the sample to
/// `hit_point + hit_normal * shadow_bias`.
pub fn biased_position(
    scene: &dyn StaticScene,
    position: Vec3,
    normal: Vec3,
    bias_scale: f32,
    shadow_bias: f32,
) -> Vec3 {
    let probe_length = bias_scale * PROBE_LENGTH_SCALE;
    let (tangent, binormal) = tangent_frame(normal);
    let origin = position + normal * shadow_bias;

    let mut biased = origin;
    let mut nearest = f32::MAX;
    for dir in [tangent, -tangent, binormal, -binormal] {
        let ray = Ray::new(origin, dir, probe_length);
        let hit = scene.trace_ray(&ray);
        if hit.hit && hit.normal.dot(dir) > 0.0 && hit.distance < nearest {
            nearest = hit.distance;
            biased = ray.at(hit.distance) + hit.normal * shadow_bias;
        }
    }
    biased
}

/// Bias every valid texel of every map in place. The `w` channel is kept.
pub fn correct_positions(
    maps: &mut [ObjectMapSet],
    scene: &dyn StaticScene,
    shadow_bias: f32,
    token: &CancellationToken,
) {
    for map in maps.iter_mut() {
        if token.is_cancelled() {
            return;
        }
        let ObjectMapSet {
            position_map,
            normal_map,
            valid_pixels,
            ..
        } = map;
        let (normals, valid) = (normal_map.pixels(), &*valid_pixels);
        position_map
            .pixels_mut()
            .par_iter_mut()
            .enumerate()
            .for_each_init(
                || WorkerContext::new(token.clone(), 0),
                |ctx, (texel, position)| {
                    if !valid.contains(texel) || ctx.should_stop() {
                        return;
                    }
                    let normal = unpack_rgb10_signed(normals[texel]).normalize_or_zero();
                    let biased =
                        biased_position(scene, position.truncate(), normal, position.w, shadow_bias);
                    *position = Vec4::from((biased, position.w));
                },
            );
    }
}
