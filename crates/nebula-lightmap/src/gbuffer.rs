//! Object-space geometry buffer baking.
//!
//! Each lightmapped object is rasterized into diffuse, position, normal and
//! depth targets (optionally supersampled), read back, and downsampled into
//! its [`ObjectMapSet`]. Texels whose diffuse is non-black become valid.

use glam::{Vec3, Vec4};
use tracing::debug;

use crate::error::{BakeError, CollaboratorError};
use crate::map::{ObjectMapSet, pack_rgb10_signed, texel_count, try_filled, unpack_rgba8};
use crate::scene::{LevelObject, LightmapIds, ObjectId};

/// A texel is valid when any diffuse channel exceeds this.
pub const DIFFUSE_EPSILON: f32 = 1e-5;

/// Storage formats of the four render targets, in target order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetFormat {
    Rgba8,
    RgbaF32,
    Depth32,
}

/// Off-screen targets the rasterizer renders one object into.
///
/// Untouched texels must stay at zero: that is the background value the
/// downsampler skips.
#[derive(Clone, Debug)]
pub struct GeometryTargets {
    width: u32,
    height: u32,
    /// Albedo, packed RGBA8.
    pub diffuse: Vec<u32>,
    /// World position in xyz; w is the world-space size of one texel.
    pub position: Vec<Vec4>,
    /// World normal in xyz.
    pub normal: Vec<Vec4>,
    pub depth: Vec<f32>,
}

impl GeometryTargets {
    /// Formats of `diffuse`, `position`, `normal` and `depth`.
    pub const FORMATS: [TargetFormat; 4] = [
        TargetFormat::Rgba8,
        TargetFormat::RgbaF32,
        TargetFormat::RgbaF32,
        TargetFormat::Depth32,
    ];

    pub fn new(width: u32, height: u32) -> Result<Self, BakeError> {
        let len = texel_count(width, height).ok_or(BakeError::OutOfMemory { width, height })?;
        Ok(Self {
            width,
            height,
            diffuse: try_filled(len, 0, width, height)?,
            position: try_filled(len, Vec4::ZERO, width, height)?,
            normal: try_filled(len, Vec4::ZERO, width, height)?,
            depth: try_filled(len, 0.0, width, height)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn formats(&self) -> [TargetFormat; 4] {
        Self::FORMATS
    }

    fn check_size(&self, object: ObjectId) -> Result<(), BakeError> {
        let expected = self.width as usize * self.height as usize;
        for actual in [
            self.diffuse.len(),
            self.position.len(),
            self.normal.len(),
            self.depth.len(),
        ] {
            if actual != expected {
                return Err(BakeError::TargetSize {
                    object,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Renders an object's surface into lightmap (object) space.
pub trait ObjectSpaceRasterizer {
    /// Fill `targets` for `object` at `targets.width() x targets.height()`.
    fn render_object_space_map(
        &self,
        object: ObjectId,
        targets: &mut GeometryTargets,
    ) -> Result<(), CollaboratorError>;
}

/// Downsample `src` by `factor` into `dst` with a first-hit rule.
///
/// Each `factor x factor` block is scanned row by row; the first sample that
/// differs from `background` wins. Blocks holding only background become
/// `select(background)`.
pub fn downsample<T, U>(
    src: &[T],
    src_width: usize,
    factor: usize,
    background: T,
    select: impl Fn(T) -> U,
    dst: &mut [U],
) where
    T: Copy + PartialEq,
{
    let factor = factor.max(1);
    let dst_width = src_width / factor;
    if dst_width == 0 {
        return;
    }
    for (dst_index, out) in dst.iter_mut().enumerate() {
        let (x, y) = (dst_index % dst_width, dst_index / dst_width);
        let first_hit = (0..factor)
            .flat_map(|yy| (0..factor).map(move |xx| (y * factor + yy) * src_width + x * factor + xx))
            .map(|i| src[i])
            .find(|&sample| sample != background);
        *out = select(first_hit.unwrap_or(background));
    }
}

/// Whether a packed RGBA8 albedo counts as surface coverage.
pub fn is_valid_diffuse(packed: u32) -> bool {
    unpack_rgba8(packed)
        .truncate()
        .cmpgt(Vec3::splat(DIFFUSE_EPSILON))
        .any()
}

/// Rasterize and downsample one object into `maps`, then derive its valid texels.
pub fn bake_object(
    object: ObjectId,
    maps: &mut ObjectMapSet,
    rasterizer: &dyn ObjectSpaceRasterizer,
    super_sample_factor: u32,
) -> Result<(), BakeError> {
    let factor = super_sample_factor.max(1);
    let (width, height) = (maps.width(), maps.height());
    let (src_width, src_height) = (
        width.checked_mul(factor).ok_or(BakeError::OutOfMemory { width, height })?,
        height.checked_mul(factor).ok_or(BakeError::OutOfMemory { width, height })?,
    );

    let mut targets = GeometryTargets::new(src_width, src_height)?;
    rasterizer
        .render_object_space_map(object, &mut targets)
        .map_err(|source| BakeError::Rasterizer { object, source })?;
    targets.check_size(object)?;

    let src_width = src_width as usize;
    let factor = factor as usize;
    downsample(&targets.diffuse, src_width, factor, 0, |c| c, maps.diffuse_map.pixels_mut());
    downsample(&targets.position, src_width, factor, Vec4::ZERO, |p| p, maps.position_map.pixels_mut());
    downsample(
        &targets.normal,
        src_width,
        factor,
        Vec4::ZERO,
        |n| pack_rgb10_signed(n.truncate()),
        maps.normal_map.pixels_mut(),
    );

    for (texel, &diffuse) in maps.diffuse_map.pixels().iter().enumerate() {
        if is_valid_diffuse(diffuse) {
            maps.valid_pixels.insert(texel);
        }
    }
    debug!(
        ?object,
        width,
        height,
        valid = maps.valid_pixels.len(),
        "Baked geometry buffers"
    );
    Ok(())
}

/// Bake geometry buffers for every lightmapped object in iteration order.
///
/// `progress(done, total)` fires after each object.
pub fn bake_geometry_buffers(
    objects: &[LevelObject],
    lightmap_ids: &LightmapIds,
    maps: &mut [ObjectMapSet],
    rasterizer: &dyn ObjectSpaceRasterizer,
    super_sample_factor: u32,
    mut progress: impl FnMut(usize, usize),
) -> Result<(), BakeError> {
    let total = lightmap_ids.len();
    let mut done = 0;
    for object in objects {
        let Some(&map_id) = lightmap_ids.get(&object.id) else {
            continue;
        };
        bake_object(object.id, &mut maps[map_id], rasterizer, super_sample_factor)?;
        done += 1;
        progress(done, total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{pack_rgba8, unpack_rgb10_signed};

    /// Fills a fixed set of texels with a fixed surface.
    struct PatternRasterizer {
        covered: Vec<usize>,
    }

    impl ObjectSpaceRasterizer for PatternRasterizer {
        fn render_object_space_map(
            &self,
            _object: ObjectId,
            targets: &mut GeometryTargets,
        ) -> Result<(), CollaboratorError> {
            for &i in &self.covered {
                targets.diffuse[i] = pack_rgba8(Vec4::new(0.5, 0.5, 0.5, 1.0));
                targets.position[i] = Vec4::new(i as f32, 0.0, 0.0, 0.1);
                targets.normal[i] = Vec4::new(0.0, 1.0, 0.0, 0.0);
                targets.depth[i] = 1.0;
            }
            Ok(())
        }
    }

    struct FailingRasterizer;

    impl ObjectSpaceRasterizer for FailingRasterizer {
        fn render_object_space_map(
            &self,
            _object: ObjectId,
            _targets: &mut GeometryTargets,
        ) -> Result<(), CollaboratorError> {
            Err("device lost".into())
        }
    }

    #[test]
    fn test_downsample_takes_first_non_background_sample() {
        // 4x4 source, factor 2 -> 2x2 output.
        #[rustfmt::skip]
        let src = [
            0, 0,   0, 0,
            0, 7,   3, 0,

            0, 0,   0, 0,
            9, 8,   0, 0,
        ];
        let mut dst = [0; 4];
        downsample(&src, 4, 2, 0, |v| v, &mut dst);
        assert_eq!(dst, [7, 3, 9, 0]);
    }

    #[test]
    fn test_downsample_factor_one_is_identity() {
        let src = [1, 0, 2, 3];
        let mut dst = [0; 4];
        downsample(&src, 2, 1, 0, |v| v * 10, &mut dst);
        assert_eq!(dst, [10, 0, 20, 30]);
    }

    #[test]
    fn test_valid_diffuse_threshold() {
        assert!(!is_valid_diffuse(0));
        assert!(!is_valid_diffuse(0xff00_0000)); // alpha only
        assert!(is_valid_diffuse(0x0000_0100));
    }

    #[test]
    fn test_valid_pixels_match_diffuse_coverage() {
        let mut maps = ObjectMapSet::new(4, 4).unwrap();
        let rasterizer = PatternRasterizer {
            covered: vec![0, 5, 6, 15],
        };
        bake_object(ObjectId(1), &mut maps, &rasterizer, 1).unwrap();

        let valid: Vec<usize> = maps.valid_pixels.iter().collect();
        assert_eq!(valid, vec![0, 5, 6, 15]);
        for texel in 0..16 {
            assert_eq!(
                maps.valid_pixels.contains(texel),
                is_valid_diffuse(maps.diffuse_map.pixels()[texel])
            );
        }
        assert_eq!(unpack_rgb10_signed(maps.normal_map.pixels()[5]), Vec3::Y);
        assert_eq!(maps.position_map.pixels()[6], Vec4::new(6.0, 0.0, 0.0, 0.1));
    }

    #[test]
    fn test_supersampled_bake_keeps_target_resolution() {
        let mut maps = ObjectMapSet::new(2, 2).unwrap();
        // Source is 4x4; texel 13 (x=1, y=3) lands in output texel (0, 1).
        let rasterizer = PatternRasterizer { covered: vec![13] };
        bake_object(ObjectId(1), &mut maps, &rasterizer, 2).unwrap();
        assert_eq!(maps.valid_pixels.iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(maps.position_map.pixels()[2].x, 13.0);
    }

    #[test]
    fn test_rasterizer_failure_propagates() {
        let mut maps = ObjectMapSet::new(2, 2).unwrap();
        let err = bake_object(ObjectId(4), &mut maps, &FailingRasterizer, 1).unwrap_err();
        assert!(matches!(err, BakeError::Rasterizer { object: ObjectId(4), .. }));
    }

    #[test]
    fn test_progress_reported_per_object() {
        let objects = vec![
            LevelObject {
                id: ObjectId(1),
                kind: crate::scene::ObjectKind::StaticMesh,
                bounds: crate::scene::Aabb::new(Vec3::ZERO, Vec3::ONE),
            },
            LevelObject {
                id: ObjectId(2),
                kind: crate::scene::ObjectKind::Other,
                bounds: crate::scene::Aabb::new(Vec3::ZERO, Vec3::ONE),
            },
        ];
        let ids = LightmapIds::from([(ObjectId(1), 0)]);
        let mut maps = vec![ObjectMapSet::new(2, 2).unwrap()];
        let rasterizer = PatternRasterizer { covered: vec![1] };
        let mut calls = Vec::new();
        bake_geometry_buffers(&objects, &ids, &mut maps, &rasterizer, 1, |d, t| calls.push((d, t)))
            .unwrap();
        assert_eq!(calls, vec![(1, 1)]);
        assert!(maps[0].valid_pixels.contains(1));
    }
}
