//! Analytic direct lighting with binary shadow rays.

use glam::Vec3;
use rayon::prelude::*;
use tracing::debug;

use crate::context::{CancellationToken, WorkerContext};
use crate::light::{Light, distance_decay};
use crate::map::{ObjectMapSet, unpack_rgb10_signed};
use crate::ray::Ray;
use crate::scene::StaticScene;

/// 1 if nothing blocks `origin` along `direction` within `max_distance`, else 0.
pub fn shadow_visibility(
    scene: &dyn StaticScene,
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
) -> f32 {
    if scene.trace_ray(&Ray::new(origin, direction, max_distance)).hit {
        0.0
    } else {
        1.0
    }
}

/// Direct lighting arriving at `position` with surface `normal`, summed over
/// every light in `scene`.
pub fn direct_lighting(scene: &dyn StaticScene, position: Vec3, normal: Vec3) -> Vec3 {
    scene
        .lights()
        .iter()
        .map(|light| light_contribution(scene, light, position, normal))
        .sum()
}

fn light_contribution(scene: &dyn StaticScene, light: &Light, position: Vec3, normal: Vec3) -> Vec3 {
    match light {
        Light::Directional(light) => {
            let to_light = -light.direction;
            let cos = normal.dot(to_light).max(0.0);
            if cos == 0.0 {
                return Vec3::ZERO;
            }
            light.intensity * shadow_visibility(scene, position, to_light, f32::INFINITY) * cos
        }
        Light::Point(light) => {
            let to_light = light.position - position;
            let distance = to_light.length();
            if distance >= light.radius || distance == 0.0 {
                return Vec3::ZERO;
            }
            let dir = to_light / distance;
            let cos = normal.dot(dir).max(0.0);
            if cos == 0.0 {
                return Vec3::ZERO;
            }
            light.intensity
                * distance_decay(distance, light.decay)
                * shadow_visibility(scene, position, dir, distance)
                * cos
        }
        Light::Spot(light) => {
            let to_light = light.position - position;
            let distance = to_light.length();
            if distance >= light.radius || distance == 0.0 {
                return Vec3::ZERO;
            }
            let dir = to_light / distance;
            let cos = normal.dot(dir).max(0.0);
            let falloff = light.falloff(-dir);
            if cos == 0.0 || falloff == 0.0 {
                return Vec3::ZERO;
            }
            light.intensity
                * distance_decay(distance, light.decay)
                * falloff
                * shadow_visibility(scene, position, dir, distance)
                * cos
        }
    }
}

/// Fill the direct light map of every object from its biased positions.
///
/// Only valid texels are written. `progress(done, total)` fires after each map.
pub fn compute_direct(
    maps: &mut [ObjectMapSet],
    scene: &dyn StaticScene,
    token: &CancellationToken,
    mut progress: impl FnMut(usize, usize),
) {
    let total = maps.len();
    for (map_id, map) in maps.iter_mut().enumerate() {
        if token.is_cancelled() {
            return;
        }
        let ObjectMapSet {
            light_map,
            position_map,
            normal_map,
            valid_pixels,
            ..
        } = map;
        let (positions, normals, valid) = (position_map.pixels(), normal_map.pixels(), &*valid_pixels);
        light_map
            .pixels_mut()
            .par_iter_mut()
            .enumerate()
            .for_each_init(
                || WorkerContext::new(token.clone(), 0),
                |ctx, (texel, out)| {
                    if !valid.contains(texel) || ctx.should_stop() {
                        return;
                    }
                    let normal = unpack_rgb10_signed(normals[texel]).normalize_or_zero();
                    *out = direct_lighting(scene, positions[texel].truncate(), normal);
                },
            );
        debug!(map_id, texels = valid_pixels.len(), "Computed direct lighting");
        progress(map_id + 1, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::{DirectionalLight, PointLight, SpotLight};
    use crate::map::pack_rgb10_signed;
    use crate::ray::Intersection;
    use glam::Vec4;
    use std::f32::consts::PI;

    /// Lights with an optional opaque plane `y = blocker_y` above the origin.
    struct LitScene {
        lights: Vec<Light>,
        blocker_y: Option<f32>,
    }

    impl StaticScene for LitScene {
        fn trace_ray(&self, ray: &Ray) -> Intersection {
            let Some(y) = self.blocker_y else {
                return Intersection::miss();
            };
            if ray.direction.y.abs() < 1e-6 {
                return Intersection::miss();
            }
            let t = (y - ray.origin.y) / ray.direction.y;
            if t <= 0.0 || t > ray.max_distance {
                return Intersection::miss();
            }
            Intersection {
                hit: true,
                distance: t,
                normal: Vec3::NEG_Y,
                ..Default::default()
            }
        }

        fn lights(&self) -> &[Light] {
            &self.lights
        }

        fn ambient_color(&self) -> Vec3 {
            Vec3::ZERO
        }
    }

    fn sun(intensity: Vec3) -> Light {
        Light::Directional(DirectionalLight {
            direction: Vec3::NEG_Y,
            intensity,
        })
    }

    fn lamp(height: f32, radius: f32) -> Light {
        Light::Point(PointLight {
            position: Vec3::new(0.0, height, 0.0),
            intensity: Vec3::ONE,
            decay: 0.0,
            radius,
        })
    }

    #[test]
    fn test_facing_directional_light_equals_intensity() {
        let intensity = Vec3::new(0.8, 0.6, 0.25);
        let scene = LitScene {
            lights: vec![sun(intensity)],
            blocker_y: None,
        };
        assert_eq!(direct_lighting(&scene, Vec3::ZERO, Vec3::Y), intensity);
    }

    #[test]
    fn test_surface_facing_away_is_dark() {
        let scene = LitScene {
            lights: vec![sun(Vec3::ONE)],
            blocker_y: None,
        };
        assert_eq!(direct_lighting(&scene, Vec3::ZERO, Vec3::NEG_Y), Vec3::ZERO);
    }

    #[test]
    fn test_occluder_casts_shadow() {
        let scene = LitScene {
            lights: vec![sun(Vec3::ONE), lamp(5.0, 10.0)],
            blocker_y: Some(2.0),
        };
        assert_eq!(direct_lighting(&scene, Vec3::ZERO, Vec3::Y), Vec3::ZERO);
    }

    #[test]
    fn test_occluder_behind_point_light_does_not_shadow() {
        let scene = LitScene {
            lights: vec![lamp(1.0, 10.0)],
            blocker_y: Some(2.0),
        };
        assert_eq!(direct_lighting(&scene, Vec3::ZERO, Vec3::Y), Vec3::ONE);
    }

    #[test]
    fn test_point_light_radius_cutoff() {
        let inside = LitScene {
            lights: vec![lamp(2.0, 2.5)],
            blocker_y: None,
        };
        let outside = LitScene {
            lights: vec![lamp(2.0, 2.0)],
            blocker_y: None,
        };
        assert_eq!(direct_lighting(&inside, Vec3::ZERO, Vec3::Y), Vec3::ONE);
        assert_eq!(direct_lighting(&outside, Vec3::ZERO, Vec3::Y), Vec3::ZERO);
    }

    #[test]
    fn test_point_light_decay() {
        let scene = LitScene {
            lights: vec![Light::Point(PointLight {
                position: Vec3::new(0.0, 4.0, 0.0),
                intensity: Vec3::ONE,
                decay: 0.5,
                radius: 10.0,
            })],
            blocker_y: None,
        };
        let lit = direct_lighting(&scene, Vec3::ZERO, Vec3::Y);
        assert!((lit - Vec3::splat(0.5)).length() < 1e-6);
    }

    #[test]
    fn test_spot_light_cone() {
        let scene = LitScene {
            lights: vec![Light::Spot(SpotLight {
                position: Vec3::new(0.0, 1.0, 0.0),
                direction: Vec3::NEG_Y,
                intensity: Vec3::ONE,
                decay: 0.0,
                radius: 10.0,
                fading_start_angle: PI / 8.0,
                fading_end_angle: PI / 6.0,
            })],
            blocker_y: None,
        };
        // Directly below the spot.
        assert_eq!(direct_lighting(&scene, Vec3::ZERO, Vec3::Y), Vec3::ONE);
        // 45 degrees off axis, past the end angle.
        assert_eq!(direct_lighting(&scene, Vec3::new(1.0, 0.0, 0.0), Vec3::Y), Vec3::ZERO);
    }

    #[test]
    fn test_compute_direct_writes_valid_texels_only() {
        let scene = LitScene {
            lights: vec![sun(Vec3::splat(2.0))],
            blocker_y: None,
        };
        let mut maps = vec![ObjectMapSet::new(2, 2).unwrap()];
        for texel in 0..4 {
            maps[0].normal_map.pixels_mut()[texel] = pack_rgb10_signed(Vec3::Y);
            maps[0].position_map.pixels_mut()[texel] = Vec4::new(texel as f32, 0.0, 0.0, 0.1);
        }
        maps[0].valid_pixels.insert(0);
        maps[0].valid_pixels.insert(3);

        let mut calls = Vec::new();
        compute_direct(&mut maps, &scene, &CancellationToken::new(), |d, t| calls.push((d, t)));

        let lit = maps[0].light_map.pixels();
        assert_eq!(lit, &[Vec3::splat(2.0), Vec3::ZERO, Vec3::ZERO, Vec3::splat(2.0)]);
        assert_eq!(calls, vec![(1, 1)]);
    }

    #[test]
    fn test_cancelled_direct_stage_writes_nothing() {
        let scene = LitScene {
            lights: vec![sun(Vec3::ONE)],
            blocker_y: None,
        };
        let mut maps = vec![ObjectMapSet::new(1, 1).unwrap()];
        maps[0].normal_map.pixels_mut()[0] = pack_rgb10_signed(Vec3::Y);
        maps[0].valid_pixels.insert(0);
        let token = CancellationToken::new();
        token.cancel();
        compute_direct(&mut maps, &scene, &token, |_, _| panic!("no progress after cancel"));
        assert_eq!(maps[0].light_map.pixels()[0], Vec3::ZERO);
    }
}
