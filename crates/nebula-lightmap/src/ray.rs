//! Rays and ray/scene intersections.

use glam::{Vec2, Vec3};

/// A ray with a bounded parametric range `[0, max_distance]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Ray origin in world space.
    pub origin: Vec3,
    /// Normalized direction.
    pub direction: Vec3,
    /// Hits farther than this are ignored.
    pub max_distance: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3, max_distance: f32) -> Self {
        Self {
            origin,
            direction,
            max_distance,
        }
    }

    /// Point at parametric distance `t`.
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Result of a ray query against a [`StaticScene`](crate::StaticScene).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Intersection {
    /// Whether anything was hit within the ray's range.
    pub hit: bool,
    /// Distance along the ray to the hit.
    pub distance: f32,
    /// Surface normal at the hit (front side of the surface).
    pub normal: Vec3,
    /// Lightmap index of the object that was hit.
    pub map_id: usize,
    /// Lightmap texture coordinate of the hit.
    pub uv: Vec2,
}

impl Intersection {
    pub fn miss() -> Self {
        Self::default()
    }
}

/// Tangent and binormal completing an orthonormal frame around `normal`.
///
/// `normal` must be unit length.
pub fn tangent_frame(normal: Vec3) -> (Vec3, Vec3) {
    normal.any_orthonormal_pair()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Vec3::ONE, Vec3::X, 10.0);
        assert_eq!(ray.at(2.0), Vec3::new(3.0, 1.0, 1.0));
    }

    #[test]
    fn test_tangent_frame_is_orthonormal() {
        for n in [
            Vec3::X,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::new(1.0, 2.0, -3.0).normalize(),
        ] {
            let (t, b) = tangent_frame(n);
            assert!((t.length() - 1.0).abs() < 1e-5);
            assert!((b.length() - 1.0).abs() < 1e-5);
            assert!(t.dot(n).abs() < 1e-5);
            assert!(b.dot(n).abs() < 1e-5);
            assert!(t.dot(b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_miss_is_not_hit() {
        assert!(!Intersection::miss().hit);
    }
}
