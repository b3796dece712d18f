//! Object-space rasters and the per-object map set.

use glam::{Vec2, Vec3, Vec4};

use crate::error::BakeError;

/// A 2D raster whose texels map to unique surface points of one object.
///
/// Texels are stored row-major; texel `(x, y)` lives at `y * width + x`.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectSpaceMap<T> {
    width: u32,
    height: u32,
    pixels: Vec<T>,
}

/// RGB float lighting raster.
pub type RgbMap = ObjectSpaceMap<Vec3>;
/// RGBA8 albedo raster, one packed `u32` per texel (see [`pack_rgba8`]).
pub type DiffuseMap = ObjectSpaceMap<u32>;
/// Signed 10-bit-per-channel normal raster (see [`pack_rgb10_signed`]).
pub type NormalMap = ObjectSpaceMap<u32>;
/// World position raster; `w` carries the local bias scale.
pub type PositionMap = ObjectSpaceMap<Vec4>;

/// Number of texels in a `width x height` raster, or `None` on overflow.
pub(crate) fn texel_count(width: u32, height: u32) -> Option<usize> {
    (width as usize).checked_mul(height as usize)
}

/// Allocate `len` copies of `value`, reporting failure instead of aborting.
pub(crate) fn try_filled<T: Clone>(
    len: usize,
    value: T,
    width: u32,
    height: u32,
) -> Result<Vec<T>, BakeError> {
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(len)
        .map_err(|_| BakeError::OutOfMemory { width, height })?;
    pixels.resize(len, value);
    Ok(pixels)
}

impl<T: Copy + Default> ObjectSpaceMap<T> {
    /// Allocate a zeroed `width x height` map.
    pub fn new(width: u32, height: u32) -> Result<Self, BakeError> {
        let len = texel_count(width, height).ok_or(BakeError::OutOfMemory { width, height })?;
        Ok(Self {
            width,
            height,
            pixels: try_filled(len, T::default(), width, height)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total texel count.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> T {
        self.pixels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let i = self.index(x, y);
        self.pixels[i] = value;
    }

    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    /// Index of the texel containing `uv` (nearest-texel lookup, clamped to the edge).
    pub fn texel_at_uv(&self, uv: Vec2) -> usize {
        let x = (uv.x * self.width as f32).floor() as i64;
        let y = (uv.y * self.height as f32).floor() as i64;
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.index(x, y)
    }

    /// Nearest-texel sample at `uv`.
    pub fn sample(&self, uv: Vec2) -> T {
        self.pixels[self.texel_at_uv(uv)]
    }
}

/// Set of texel indices that carry surface coverage.
///
/// Bitset bounded by the texel count of its map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidPixelSet {
    words: Vec<u64>,
    max: usize,
    len: usize,
}

impl ValidPixelSet {
    /// Empty set accepting indices in `0..max`.
    pub fn new(max: usize) -> Result<Self, BakeError> {
        Ok(Self {
            words: try_filled(max.div_ceil(64), 0u64, 0, 0)?,
            max,
            len: 0,
        })
    }

    /// Insert `index`. Out-of-range indices are ignored.
    pub fn insert(&mut self, index: usize) {
        if index >= self.max {
            return;
        }
        let (word, bit) = (index / 64, index % 64);
        let mask = 1u64 << bit;
        if self.words[word] & mask == 0 {
            self.words[word] |= mask;
            self.len += 1;
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.max && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Valid indices in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| w * 64 + bit)
        })
    }
}

/// The five same-sized rasters baked for one object, plus its valid texels.
#[derive(Clone, Debug)]
pub struct ObjectMapSet {
    /// Direct lighting.
    pub light_map: RgbMap,
    /// Indirect lighting of the latest bounce.
    pub indirect_map: RgbMap,
    pub diffuse_map: DiffuseMap,
    pub normal_map: NormalMap,
    pub position_map: PositionMap,
    pub valid_pixels: ValidPixelSet,
}

impl ObjectMapSet {
    pub fn new(width: u32, height: u32) -> Result<Self, BakeError> {
        let light_map = RgbMap::new(width, height)?;
        let indirect_map = RgbMap::new(width, height)?;
        let diffuse_map = DiffuseMap::new(width, height)?;
        let normal_map = NormalMap::new(width, height)?;
        let position_map = PositionMap::new(width, height)?;
        let valid_pixels = ValidPixelSet::new(light_map.len())?;
        Ok(Self {
            light_map,
            indirect_map,
            diffuse_map,
            normal_map,
            position_map,
            valid_pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.light_map.width()
    }

    pub fn height(&self) -> u32 {
        self.light_map.height()
    }

    /// Unit surface normal of a texel.
    pub fn normal(&self, texel: usize) -> Vec3 {
        unpack_rgb10_signed(self.normal_map.pixels()[texel]).normalize_or_zero()
    }

    /// Albedo of a texel in `[0, 1]`.
    pub fn albedo(&self, texel: usize) -> Vec3 {
        unpack_rgba8(self.diffuse_map.pixels()[texel]).truncate()
    }

    /// Direct plus indirect lighting of a texel.
    pub fn radiance(&self, texel: usize) -> Vec3 {
        self.light_map.pixels()[texel] + self.indirect_map.pixels()[texel]
    }
}

/// Pack a `[0, 1]` RGBA color into a little-endian RGBA8 word.
pub fn pack_rgba8(color: Vec4) -> u32 {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    (c.x as u32) | (c.y as u32) << 8 | (c.z as u32) << 16 | (c.w as u32) << 24
}

pub fn unpack_rgba8(packed: u32) -> Vec4 {
    Vec4::new(
        (packed & 0xff) as f32,
        (packed >> 8 & 0xff) as f32,
        (packed >> 16 & 0xff) as f32,
        (packed >> 24) as f32,
    ) / 255.0
}

const RGB10_MAX: f32 = 511.0;

/// Pack a `[-1, 1]` vector into three signed 10-bit fields (bits 0-29).
pub fn pack_rgb10_signed(v: Vec3) -> u32 {
    let encode = |c: f32| ((c.clamp(-1.0, 1.0) * RGB10_MAX).round() as i32 as u32) & 0x3ff;
    encode(v.x) | encode(v.y) << 10 | encode(v.z) << 20
}

pub fn unpack_rgb10_signed(packed: u32) -> Vec3 {
    let decode = |shift: u32| (((packed >> shift) << 22) as i32 >> 22) as f32 / RGB10_MAX;
    Vec3::new(decode(0), decode(10), decode(20))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_map_is_zeroed() {
        let map = RgbMap::new(4, 2).unwrap();
        assert_eq!(map.len(), 8);
        assert!(map.pixels().iter().all(|p| *p == Vec3::ZERO));
    }

    #[test]
    fn test_set_get_row_major() {
        let mut map = DiffuseMap::new(4, 4).unwrap();
        map.set(3, 1, 7);
        assert_eq!(map.pixels()[7], 7);
        assert_eq!(map.get(3, 1), 7);
    }

    #[test]
    fn test_oversized_map_reports_out_of_memory() {
        let result = RgbMap::new(1 << 31, 1 << 31);
        assert!(matches!(result, Err(BakeError::OutOfMemory { .. })));
    }

    #[test]
    fn test_sample_is_nearest_and_clamped() {
        let mut map = DiffuseMap::new(4, 4).unwrap();
        map.set(1, 2, 42);
        assert_eq!(map.sample(Vec2::new(0.3, 0.6)), 42);
        assert_eq!(map.texel_at_uv(Vec2::new(1.0, 1.0)), 15);
        assert_eq!(map.texel_at_uv(Vec2::new(-0.5, -0.5)), 0);
    }

    #[test]
    fn test_valid_pixel_set() {
        let mut set = ValidPixelSet::new(130).unwrap();
        set.insert(0);
        set.insert(64);
        set.insert(129);
        set.insert(129);
        set.insert(500);
        assert_eq!(set.len(), 3);
        assert!(set.contains(64));
        assert!(!set.contains(65));
        assert!(!set.contains(500));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 64, 129]);
    }

    #[test]
    fn test_rgba8_packing() {
        let packed = pack_rgba8(Vec4::new(1.0, 0.0, 0.5, 1.0));
        assert_eq!(packed & 0xff, 255);
        assert_eq!(packed >> 24, 255);
        let back = unpack_rgba8(packed);
        assert!((back.z - 0.5).abs() < 1.0 / 255.0);
    }

    #[test]
    fn test_rgb10_axis_normals_are_exact() {
        for n in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
            assert_eq!(unpack_rgb10_signed(pack_rgb10_signed(n)), n);
        }
    }

    #[test]
    fn test_rgb10_precision() {
        let n = Vec3::new(0.3, -0.8, 0.52).normalize();
        let back = unpack_rgb10_signed(pack_rgb10_signed(n));
        assert!((back - n).abs().max_element() <= 1.0 / 1022.0 + 1e-6);
    }

    #[test]
    fn test_map_set_accessors() {
        let mut maps = ObjectMapSet::new(2, 2).unwrap();
        maps.normal_map.pixels_mut()[1] = pack_rgb10_signed(Vec3::Z);
        maps.diffuse_map.pixels_mut()[1] = pack_rgba8(Vec4::ONE);
        maps.light_map.pixels_mut()[1] = Vec3::splat(0.25);
        maps.indirect_map.pixels_mut()[1] = Vec3::splat(0.5);
        assert_eq!(maps.normal(1), Vec3::Z);
        assert_eq!(maps.albedo(1), Vec3::ONE);
        assert_eq!(maps.radiance(1), Vec3::splat(0.75));
        assert_eq!(maps.normal(0), Vec3::ZERO);
    }
}
