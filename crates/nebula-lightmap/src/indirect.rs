//! Monte Carlo single-bounce gather, iterated by the scheduler for
//! multi-bounce lighting.

use std::f32::consts::TAU;

use glam::Vec3;
use rand::Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::context::{CancellationToken, WorkerContext, texel_stream};
use crate::error::BakeError;
use crate::map::{ObjectMapSet, RgbMap};
use crate::ray::{Ray, tangent_frame};
use crate::scene::StaticScene;

/// Hemisphere direction around `normal` for the random pair `(r1, r2)`.
///
/// `r1` is the cosine of the angle to the normal and `r2` the azimuth
/// fraction.
pub fn hemisphere_direction(tangent: Vec3, normal: Vec3, binormal: Vec3, r1: f32, r2: f32) -> Vec3 {
    let sin_theta = (1.0 - r1 * r1).max(0.0).sqrt();
    let phi = TAU * r2;
    tangent * (sin_theta * phi.cos()) + normal * r1 + binormal * (sin_theta * phi.sin())
}

/// Estimate of the indirect light arriving at one surface point.
///
/// Each sample is weighted by its `r1`. Hits on the front of a lightmapped
/// surface return that texel's direct plus indirect lighting times its
/// albedo, escaping rays return the scene's ambient color, and backface hits
/// contribute nothing. The sum is scaled by `2 / sample_count`.
pub fn gather_indirect<R: Rng + ?Sized>(
    scene: &dyn StaticScene,
    maps: &[ObjectMapSet],
    position: Vec3,
    normal: Vec3,
    sample_count: u32,
    rng: &mut R,
) -> Vec3 {
    if sample_count == 0 {
        return Vec3::ZERO;
    }
    let (tangent, binormal) = tangent_frame(normal);
    let ambient = scene.ambient_color();

    let mut acc = Vec3::ZERO;
    for _ in 0..sample_count {
        let r1: f32 = rng.random();
        let r2: f32 = rng.random();
        let dir = hemisphere_direction(tangent, normal, binormal, r1, r2);
        let hit = scene.trace_ray(&Ray::new(position, dir, f32::INFINITY));
        if !hit.hit {
            acc += ambient * r1;
        } else if hit.normal.dot(dir) < 0.0 {
            if let Some(map) = maps.get(hit.map_id) {
                let texel = map.light_map.texel_at_uv(hit.uv);
                acc += map.radiance(texel) * map.albedo(texel) * r1;
            }
        }
    }
    acc * 2.0 / sample_count as f32
}

/// Run one bounce over every map.
///
/// All reads see the lighting of the previous bounce: new indirect maps are
/// collected for every object and only swapped in once the whole bounce has
/// finished. A cancelled bounce leaves the previous maps in place.
/// `progress(done, total)` fires after each map.
pub fn compute_indirect(
    maps: &mut [ObjectMapSet],
    scene: &dyn StaticScene,
    sample_count: u32,
    bounce: u32,
    seed: u64,
    token: &CancellationToken,
    mut progress: impl FnMut(usize, usize),
) -> Result<(), BakeError> {
    let total = maps.len();
    let mut results = Vec::with_capacity(total);
    {
        let previous: &[ObjectMapSet] = maps;
        for (map_id, map) in previous.iter().enumerate() {
            if token.is_cancelled() {
                return Ok(());
            }
            let mut indirect = RgbMap::new(map.width(), map.height())?;
            indirect
                .pixels_mut()
                .par_iter_mut()
                .enumerate()
                .for_each_init(
                    || WorkerContext::new(token.clone(), seed),
                    |ctx, (texel, out)| {
                        if !map.valid_pixels.contains(texel) || ctx.should_stop() {
                            return;
                        }
                        let position = map.position_map.pixels()[texel].truncate();
                        let normal = map.normal(texel);
                        let rng = ctx.rng_for_stream(texel_stream(bounce, map_id, texel));
                        *out = gather_indirect(scene, previous, position, normal, sample_count, rng);
                    },
                );
            debug!(map_id, bounce, sample_count, "Gathered indirect lighting");
            results.push(indirect);
            progress(map_id + 1, total);
        }
    }
    if token.is_cancelled() {
        return Ok(());
    }
    for (map, indirect) in maps.iter_mut().zip(results) {
        map.indirect_map = indirect;
    }
    Ok(())
}
