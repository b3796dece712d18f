//! Collaborator interfaces: the level being baked and its ray-query scene.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;

use crate::light::Light;
use crate::ray::{Intersection, Ray};

/// Stable identity of a level object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// Object identity to dense lightmap index.
pub type LightmapIds = HashMap<ObjectId, usize>;

/// What kind of level object this is. Only static meshes get lightmaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    StaticMesh,
    Other,
}

/// World-space axis-aligned bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Bounds spanning two corners in any order.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Smallest bounds enclosing `points`, or `None` if empty.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        points.into_iter().fold(None, |acc: Option<Aabb>, p| {
            Some(match acc {
                Some(b) => Aabb::new(b.min.min(p), b.max.max(p)),
                None => Aabb::new(p, p),
            })
        })
    }

    /// Length of the min-to-max diagonal.
    pub fn diagonal(&self) -> f32 {
        (self.max - self.min).length()
    }
}

/// An object as seen by the baker.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub bounds: Aabb,
}

/// Read-only ray-query representation of the static scene.
///
/// Queried concurrently from every texel worker.
pub trait StaticScene: Send + Sync {
    /// Nearest hit along `ray` within `[0, ray.max_distance]`.
    fn trace_ray(&self, ray: &Ray) -> Intersection;

    /// Lights contributing to the bake.
    fn lights(&self) -> &[Light];

    /// Radiance returned by rays that escape the scene.
    fn ambient_color(&self) -> Vec3;
}

/// The level being baked.
pub trait Level: Send + Sync {
    /// Objects in iteration order. Lightmap indices follow this order.
    fn objects(&self) -> &[LevelObject];

    /// Build the ray-query scene. Intersections must report the map index
    /// assigned in `lightmap_ids`. Runs on the bake worker.
    fn build_static_scene(&self, lightmap_ids: &LightmapIds) -> Arc<dyn StaticScene>;
}
