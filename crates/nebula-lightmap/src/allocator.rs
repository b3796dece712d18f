//! Lightmap resolution and index allocation.

use nebula_config::LightmapBakingSettings;

use crate::scene::{Aabb, LevelObject, LightmapIds, ObjectKind};

/// Largest resolution `next_power_of_two` can produce without overflow.
const MAX_POWER_OF_TWO: u32 = 1 << 31;

/// Lightmap indices and resolutions for a level.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightmapAllocation {
    /// Object identity to map index.
    pub ids: LightmapIds,
    /// Square resolution of each map, indexed by map index.
    pub resolutions: Vec<u32>,
}

impl LightmapAllocation {
    pub fn len(&self) -> usize {
        self.resolutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }
}

fn prev_power_of_two(n: u32) -> u32 {
    1 << (31 - n.max(1).leading_zeros())
}

/// Edge length of the square lightmap for an object with `bounds`.
///
/// `clamp(next_pow2(diagonal * resolution_scale), min, max)`, always a power of
/// two. Non-power-of-two limits are tightened to the powers of two inside
/// them; a `max` below `min` is raised to `min`.
pub fn lightmap_resolution(bounds: &Aabb, settings: &LightmapBakingSettings) -> u32 {
    let lo = settings
        .min_resolution
        .clamp(1, MAX_POWER_OF_TWO)
        .next_power_of_two();
    let hi = prev_power_of_two(settings.max_resolution.max(lo)).max(lo);

    let texels = (bounds.diagonal() * settings.resolution_scale).clamp(0.0, MAX_POWER_OF_TWO as f32);
    let raw = (texels as u32).clamp(1, MAX_POWER_OF_TWO).next_power_of_two();
    raw.clamp(lo, hi)
}

/// Assign dense map indices, in iteration order, to every static mesh.
pub fn allocate_lightmaps(
    objects: &[LevelObject],
    settings: &LightmapBakingSettings,
) -> LightmapAllocation {
    let mut allocation = LightmapAllocation::default();
    for object in objects {
        if object.kind != ObjectKind::StaticMesh {
            continue;
        }
        let resolution = lightmap_resolution(&object.bounds, settings);
        allocation.ids.insert(object.id, allocation.resolutions.len());
        allocation.resolutions.push(resolution);
    }
    allocation
}
