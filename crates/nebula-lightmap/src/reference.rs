//! Brute-force reference collaborators.
//!
//! [`MeshLevel`] is a [`Level`] of triangle meshes that also rasterizes its
//! own geometry buffers on the CPU, and [`MeshScene`] answers ray queries by
//! testing every triangle. Both are meant for tests and small tools; there
//! is no acceleration structure.

use std::sync::Arc;

use glam::{Vec2, Vec3};

use crate::error::CollaboratorError;
use crate::gbuffer::{GeometryTargets, ObjectSpaceRasterizer};
use crate::light::Light;
use crate::map::pack_rgba8;
use crate::ray::{Intersection, Ray};
use crate::scene::{Aabb, Level, LevelObject, LightmapIds, ObjectId, ObjectKind, StaticScene};

/// Hits closer than this are ignored so rays do not hit their own surface.
const RAY_EPSILON: f32 = 1e-5;

/// Map index reported for meshes without a lightmap.
pub const NO_LIGHTMAP: usize = usize::MAX;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    /// Lightmap texture coordinate in `[0, 1]^2`.
    pub lightmap_uv: Vec2,
}

/// Triangle mesh with a uniform albedo.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticMesh {
    pub id: ObjectId,
    pub vertices: Vec<MeshVertex>,
    /// Triangle list.
    pub indices: Vec<u32>,
    pub albedo: Vec3,
}

impl StaticMesh {
    /// Parallelogram `corner + s*edge_u + t*edge_v` for `s, t` in `[0, 1]`,
    /// facing `edge_u x edge_v`, with its lightmap UVs covering the unit square.
    pub fn quad(id: ObjectId, corner: Vec3, edge_u: Vec3, edge_v: Vec3, albedo: Vec3) -> Self {
        let normal = edge_u.cross(edge_v).normalize_or_zero();
        let vertex = |s: f32, t: f32| MeshVertex {
            position: corner + edge_u * s + edge_v * t,
            normal,
            lightmap_uv: Vec2::new(s, t),
        };
        Self {
            id,
            vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(1.0, 1.0), vertex(0.0, 1.0)],
            indices: vec![0, 1, 2, 0, 2, 3],
            albedo,
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| v.position))
            .unwrap_or(Aabb::new(Vec3::ZERO, Vec3::ZERO))
    }

    /// Vertex triples of every complete triangle. Out-of-range indices are
    /// skipped.
    pub fn triangles(&self) -> impl Iterator<Item = [MeshVertex; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            let v = |i: u32| self.vertices.get(i as usize).copied();
            Some([v(tri[0])?, v(tri[1])?, v(tri[2])?])
        })
    }
}

/// A level made of static meshes plus arbitrary non-lightmapped objects.
#[derive(Clone, Debug, Default)]
pub struct MeshLevel {
    objects: Vec<LevelObject>,
    meshes: Vec<StaticMesh>,
    lights: Vec<Light>,
    ambient: Vec3,
}

impl MeshLevel {
    pub fn new(lights: Vec<Light>, ambient: Vec3) -> Self {
        Self {
            lights,
            ambient,
            ..Default::default()
        }
    }

    pub fn add_mesh(&mut self, mesh: StaticMesh) {
        self.objects.push(LevelObject {
            id: mesh.id,
            kind: ObjectKind::StaticMesh,
            bounds: mesh.bounds(),
        });
        self.meshes.push(mesh);
    }

    /// Add an object that takes part in iteration but has no geometry here.
    pub fn add_object(&mut self, object: LevelObject) {
        self.objects.push(object);
    }

    pub fn mesh(&self, id: ObjectId) -> Option<&StaticMesh> {
        self.meshes.iter().find(|m| m.id == id)
    }
}

impl Level for MeshLevel {
    fn objects(&self) -> &[LevelObject] {
        &self.objects
    }

    fn build_static_scene(&self, lightmap_ids: &LightmapIds) -> Arc<dyn StaticScene> {
        Arc::new(MeshScene::new(
            &self.meshes,
            lightmap_ids,
            self.lights.clone(),
            self.ambient,
        ))
    }
}

impl ObjectSpaceRasterizer for MeshLevel {
    fn render_object_space_map(
        &self,
        object: ObjectId,
        targets: &mut GeometryTargets,
    ) -> Result<(), CollaboratorError> {
        let mesh = self
            .mesh(object)
            .ok_or_else(|| format!("no mesh for object {object:?}"))?;
        let diffuse = pack_rgba8(mesh.albedo.extend(1.0));
        for tri in mesh.triangles() {
            rasterize_triangle(&tri, diffuse, targets);
        }
        Ok(())
    }
}

/// Barycentric weights of `p` in the 2D triangle `(a, b, c)`, or `None` if
/// the triangle is degenerate.
fn barycentric(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> Option<Vec3> {
    let area = (b - a).perp_dot(c - a);
    if area.abs() <= f32::EPSILON {
        return None;
    }
    let w1 = (p - a).perp_dot(c - a) / area;
    let w2 = (b - a).perp_dot(p - a) / area;
    Some(Vec3::new(1.0 - w1 - w2, w1, w2))
}

fn rasterize_triangle(tri: &[MeshVertex; 3], diffuse: u32, targets: &mut GeometryTargets) {
    let (width, height) = (targets.width() as f32, targets.height() as f32);
    let size = Vec2::new(width, height);
    let [a, b, c] = tri.map(|v| v.lightmap_uv * size);

    let uv_area = (b - a).perp_dot(c - a).abs() / (width * height);
    let world_area = (tri[1].position - tri[0].position)
        .cross(tri[2].position - tri[0].position)
        .length();
    if uv_area <= f32::EPSILON {
        return;
    }
    let texel_size = (world_area / uv_area).sqrt() / width;

    let lo = a.min(b).min(c).floor().max(Vec2::ZERO);
    let hi = a.max(b).max(c).ceil().min(size);
    for y in lo.y as u32..hi.y as u32 {
        for x in lo.x as u32..hi.x as u32 {
            let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let Some(w) = barycentric(center, a, b, c) else {
                return;
            };
            if w.min_element() < -1e-4 {
                continue;
            }
            let position = tri[0].position * w.x + tri[1].position * w.y + tri[2].position * w.z;
            let normal =
                (tri[0].normal * w.x + tri[1].normal * w.y + tri[2].normal * w.z).normalize_or_zero();
            let i = y as usize * targets.width() as usize + x as usize;
            targets.diffuse[i] = diffuse;
            targets.position[i] = position.extend(texel_size);
            targets.normal[i] = normal.extend(0.0);
            targets.depth[i] = 1.0;
        }
    }
}

#[derive(Clone, Debug)]
struct SceneTriangle {
    positions: [Vec3; 3],
    /// Front-facing geometric normal, oriented to agree with the vertex normals.
    normal: Vec3,
    uvs: [Vec2; 3],
    map_id: usize,
}

/// Ray-query scene that tests every triangle.
#[derive(Clone, Debug)]
pub struct MeshScene {
    triangles: Vec<SceneTriangle>,
    lights: Vec<Light>,
    ambient: Vec3,
}

impl MeshScene {
    pub fn new(meshes: &[StaticMesh], lightmap_ids: &LightmapIds, lights: Vec<Light>, ambient: Vec3) -> Self {
        let mut triangles = Vec::new();
        for mesh in meshes {
            let map_id = lightmap_ids.get(&mesh.id).copied().unwrap_or(NO_LIGHTMAP);
            for [v0, v1, v2] in mesh.triangles() {
                let geometric = (v1.position - v0.position)
                    .cross(v2.position - v0.position)
                    .normalize_or_zero();
                if geometric == Vec3::ZERO {
                    continue;
                }
                let shading = v0.normal + v1.normal + v2.normal;
                let normal = if geometric.dot(shading) < 0.0 { -geometric } else { geometric };
                triangles.push(SceneTriangle {
                    positions: [v0.position, v1.position, v2.position],
                    normal,
                    uvs: [v0.lightmap_uv, v1.lightmap_uv, v2.lightmap_uv],
                    map_id,
                });
            }
        }
        Self {
            triangles,
            lights,
            ambient,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

/// Möller-Trumbore intersection; returns `(t, u, v)`.
fn intersect_triangle(ray: &Ray, [p0, p1, p2]: &[Vec3; 3]) -> Option<(f32, f32, f32)> {
    let e1 = *p1 - *p0;
    let e2 = *p2 - *p0;
    let pvec = ray.direction.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() < 1e-8 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - *p0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let v = ray.direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(qvec) * inv_det;
    (t > RAY_EPSILON && t <= ray.max_distance).then_some((t, u, v))
}

impl StaticScene for MeshScene {
    fn trace_ray(&self, ray: &Ray) -> Intersection {
        let mut nearest = Intersection::miss();
        for tri in &self.triangles {
            let Some((t, u, v)) = intersect_triangle(ray, &tri.positions) else {
                continue;
            };
            if nearest.hit && t >= nearest.distance {
                continue;
            }
            nearest = Intersection {
                hit: true,
                distance: t,
                normal: tri.normal,
                map_id: tri.map_id,
                uv: tri.uvs[0] * (1.0 - u - v) + tri.uvs[1] * u + tri.uvs[2] * v,
            };
        }
        nearest
    }

    fn lights(&self) -> &[Light] {
        &self.lights
    }

    fn ambient_color(&self) -> Vec3 {
        self.ambient
    }
}
