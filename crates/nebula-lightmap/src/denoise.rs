//! Indirect-light denoising, compositing and dilation.
//!
//! The indirect map is blurred with a separable Gaussian that never crosses
//! an invalid texel, added to the direct map, and the result is dilated so
//! that texels just outside UV islands pick up a neighbour's value.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use rayon::prelude::*;

use crate::error::BakeError;
use crate::map::{ObjectMapSet, RgbMap, ValidPixelSet, try_filled};

/// Standard deviation of the blur kernel, relative to its radius.
pub const BLUR_SIGMA: f32 = 0.4;

/// Blur radius for a map of `width` texels: `clamp(width / 100, 1, 20)`.
pub fn blur_radius(width: u32) -> usize {
    (width as usize / 100).clamp(1, 20)
}

/// The `radius + 1` one-sided Gaussian weights; `kernel[0]` is the centre.
pub fn blur_kernel(radius: usize) -> Vec<f32> {
    let r = radius.max(1) as f32;
    (0..=radius)
        .map(|i| {
            let x = i as f32 / r;
            (-(x * x) / (2.0 * BLUR_SIGMA * BLUR_SIGMA)).exp()
        })
        .collect()
}

/// Kernels keyed by radius, built on first use.
#[derive(Debug, Default)]
pub struct BlurKernelCache {
    kernels: HashMap<usize, Arc<[f32]>>,
}

impl BlurKernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, radius: usize) -> Arc<[f32]> {
        self.kernels
            .entry(radius)
            .or_insert_with(|| blur_kernel(radius).into())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

/// One blur pass from `src` into `dst`.
///
/// Each valid texel accumulates neighbours along `axis` in both directions,
/// stopping at the first invalid one or the edge, and is normalised by the
/// weights it used. Invalid texels are copied through.
pub fn blur_pass(
    src: &[Vec3],
    dst: &mut [Vec3],
    width: usize,
    height: usize,
    valid: &ValidPixelSet,
    kernel: &[f32],
    axis: BlurAxis,
) {
    dst.par_iter_mut().enumerate().for_each(|(i, out)| {
        if !valid.contains(i) {
            *out = src[i];
            return;
        }
        let (x, y) = (i % width, i / width);
        let (pos, len, stride) = match axis {
            BlurAxis::Horizontal => (x, width, 1),
            BlurAxis::Vertical => (y, height, width),
        };

        let mut sum = src[i] * kernel[0];
        let mut weight = kernel[0];
        for (step, &k) in kernel.iter().enumerate().skip(1) {
            if step > pos || !valid.contains(i - step * stride) {
                break;
            }
            sum += src[i - step * stride] * k;
            weight += k;
        }
        for (step, &k) in kernel.iter().enumerate().skip(1) {
            if pos + step >= len || !valid.contains(i + step * stride) {
                break;
            }
            sum += src[i + step * stride] * k;
            weight += k;
        }
        *out = sum / weight;
    });
}

/// Blur `map.indirect_map` in place with `kernel`.
pub fn blur_indirect(map: &mut ObjectMapSet, kernel: &[f32]) -> Result<(), BakeError> {
    let (width, height) = (map.width(), map.height());
    let mut temp = try_filled(map.indirect_map.len(), Vec3::ZERO, width, height)?;
    let (w, h) = (width as usize, height as usize);
    blur_pass(
        map.indirect_map.pixels(),
        &mut temp,
        w,
        h,
        &map.valid_pixels,
        kernel,
        BlurAxis::Horizontal,
    );
    blur_pass(
        &temp,
        map.indirect_map.pixels_mut(),
        w,
        h,
        &map.valid_pixels,
        kernel,
        BlurAxis::Vertical,
    );
    Ok(())
}

/// `direct + indirect` per texel.
pub fn composite(direct: &[Vec3], indirect: &[Vec3], out: &mut [Vec3]) {
    out.par_iter_mut()
        .zip(direct.par_iter().zip(indirect.par_iter()))
        .for_each(|(out, (d, i))| *out = *d + *i);
}

/// Fill invalid texels from their first valid 3x3 neighbour.
///
/// Neighbours are scanned row by row, top to bottom and left to right.
/// Reads come from `src` and writes go to `dst`, so the result does not
/// depend on processing order. Invalid texels with no valid neighbour keep
/// their value.
pub fn dilate(src: &[Vec3], dst: &mut [Vec3], width: usize, height: usize, valid: &ValidPixelSet) {
    dst.par_iter_mut().enumerate().for_each(|(i, out)| {
        *out = src[i];
        if valid.contains(i) {
            return;
        }
        let (x, y) = ((i % width) as isize, (i / width) as isize);
        let neighbour = (-1..=1)
            .flat_map(|dy| (-1..=1).map(move |dx| (x + dx, y + dy)))
            .filter(|&(nx, ny)| nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height)
            .map(|(nx, ny)| ny as usize * width + nx as usize)
            .find(|&n| n != i && valid.contains(n));
        if let Some(n) = neighbour {
            *out = src[n];
        }
    });
}

/// Turns a map set's direct and indirect maps into a final lightmap.
#[derive(Debug, Default)]
pub struct Compositor {
    kernels: BlurKernelCache,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blur the indirect map in place, then composite and dilate into a new
    /// raster.
    pub fn process(&mut self, map: &mut ObjectMapSet) -> Result<RgbMap, BakeError> {
        let kernel = self.kernels.get(blur_radius(map.width()));
        blur_indirect(map, &kernel)?;

        let (width, height) = (map.width(), map.height());
        let mut composited = try_filled(map.light_map.len(), Vec3::ZERO, width, height)?;
        composite(map.light_map.pixels(), map.indirect_map.pixels(), &mut composited);

        let mut lightmap = RgbMap::new(width, height)?;
        dilate(
            &composited,
            lightmap.pixels_mut(),
            width as usize,
            height as usize,
            &map.valid_pixels,
        );
        Ok(lightmap)
    }
}
