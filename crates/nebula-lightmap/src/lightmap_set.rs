//! The bake output and its debug image dump.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::error::BakeError;
use crate::map::{ObjectMapSet, RgbMap, unpack_rgba8};
use crate::scene::{LightmapIds, ObjectId};

/// Final lightmaps and the object each one belongs to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightmapSet {
    /// Object identity to index into `lightmaps`.
    pub object_lightmap_ids: LightmapIds,
    /// Composited, dilated lightmaps in map-index order.
    pub lightmaps: Vec<RgbMap>,
}

impl LightmapSet {
    pub fn len(&self) -> usize {
        self.lightmaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lightmaps.is_empty()
    }

    /// Lightmap baked for `object`, if it has one.
    pub fn lightmap_for(&self, object: ObjectId) -> Option<&RgbMap> {
        self.object_lightmap_ids
            .get(&object)
            .and_then(|&id| self.lightmaps.get(id))
    }

    /// Write every lightmap as `lightmap_<index>.png` under `dir`.
    ///
    /// Values are clamped to `[0, 1]` and stored as 8-bit RGB.
    pub fn save_debug_images(&self, dir: &Path) -> Result<Vec<PathBuf>, BakeError> {
        self.lightmaps
            .iter()
            .enumerate()
            .map(|(i, map)| {
                let path = dir.join(format!("lightmap_{i}.png"));
                let rgb = map.pixels().iter().flat_map(|&c| to_rgb8(c)).collect::<Vec<_>>();
                write_rgb_png(&path, map.width(), map.height(), &rgb)?;
                Ok(path)
            })
            .collect()
    }
}

/// Write each object's albedo as `diffuse_<index>.png` under `dir`.
pub fn save_diffuse_images(maps: &[ObjectMapSet], dir: &Path) -> Result<Vec<PathBuf>, BakeError> {
    maps.iter()
        .enumerate()
        .map(|(i, map)| {
            let path = dir.join(format!("diffuse_{i}.png"));
            let rgb = map
                .diffuse_map
                .pixels()
                .iter()
                .flat_map(|&c| to_rgb8(unpack_rgba8(c).truncate()))
                .collect::<Vec<_>>();
            write_rgb_png(&path, map.width(), map.height(), &rgb)?;
            Ok(path)
        })
        .collect()
}

fn to_rgb8(color: Vec3) -> [u8; 3] {
    let c = (color.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
    [c.x as u8, c.y as u8, c.z as u8]
}

fn write_rgb_png(path: &Path, width: u32, height: u32, rgb: &[u8]) -> Result<(), BakeError> {
    let to_error = |source: png::EncodingError| BakeError::DebugOutput {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(|e| to_error(e.into()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(to_error)?;
    writer.write_image_data(rgb).map_err(to_error)?;
    writer.finish().map_err(to_error)
}
