//! Static scene lights.
//!
//! The set of light behaviours is closed, so [`Light`] is an enum and the
//! integrators match on it rather than going through a trait object.

use glam::Vec3;

/// A baked light source.
#[derive(Clone, Debug, PartialEq)]
pub enum Light {
    Directional(DirectionalLight),
    Point(PointLight),
    Spot(SpotLight),
}

/// Infinitely distant light.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Normalized direction the light travels (from the light toward surfaces).
    pub direction: Vec3,
    /// Linear RGB intensity.
    pub intensity: Vec3,
}

/// Omnidirectional light with a hard cutoff radius.
#[derive(Clone, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    /// Linear RGB intensity.
    pub intensity: Vec3,
    /// Linear decay rate per world unit.
    pub decay: f32,
    /// Surfaces at or beyond this distance receive nothing.
    pub radius: f32,
}

/// Cone light. Fades linearly between the two angles.
#[derive(Clone, Debug, PartialEq)]
pub struct SpotLight {
    pub position: Vec3,
    /// Normalized forward axis of the cone (from the light into the scene).
    /// Light data that stores the axis as surface-to-light must be negated
    /// on import.
    pub direction: Vec3,
    /// Linear RGB intensity.
    pub intensity: Vec3,
    /// Linear decay rate per world unit.
    pub decay: f32,
    /// Surfaces at or beyond this distance receive nothing.
    pub radius: f32,
    /// Angle from the axis (radians) where fading begins.
    pub fading_start_angle: f32,
    /// Angle from the axis (radians) where the light reaches zero.
    pub fading_end_angle: f32,
}

/// Distance decay shared by point and spot lights: `1 / max(1, d * decay)`.
pub fn distance_decay(distance: f32, decay: f32) -> f32 {
    1.0 / (distance * decay).max(1.0)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

impl SpotLight {
    /// Angular falloff for a surface in direction `light_to_surface` (normalized).
    ///
    /// 1 inside `fading_start_angle`, 0 beyond `fading_end_angle`, linear
    /// in between.
    pub fn falloff(&self, light_to_surface: Vec3) -> f32 {
        let angle = light_to_surface.dot(self.direction).clamp(-1.0, 1.0).acos();
        let span = self.fading_end_angle - self.fading_start_angle;
        if span <= f32::EPSILON {
            return if angle <= self.fading_start_angle { 1.0 } else { 0.0 };
        }
        let t = ((angle - self.fading_start_angle) / span).clamp(0.0, 1.0);
        lerp(1.0, 0.0, t)
    }
}
