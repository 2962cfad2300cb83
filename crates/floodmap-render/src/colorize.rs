//! Terrain, threshold and combined rendering of elevation grids.

use crate::colormap::{normalize, terrain_color};
use crate::threshold::{ThresholdBand, ThresholdLevels};
use crate::{RenderError, Result};
use image::RgbaImage;

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// Borrowed row-major elevation samples, north row first.
#[derive(Debug, Clone, Copy)]
pub struct ElevationGrid<'a> {
    samples: &'a [f32],
    width: u32,
    height: u32,
}

impl<'a> ElevationGrid<'a> {
    /// Wrap `samples`, checking that there are exactly `width * height` of them.
    pub fn new(samples: &'a [f32], width: u32, height: u32) -> Result<Self> {
        if samples.len() != width as usize * height as usize {
            return Err(RenderError::GridSizeMismatch {
                width,
                height,
                actual: samples.len(),
            });
        }
        Ok(Self {
            samples,
            width,
            height,
        })
    }

    /// Grid width and height.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Samples in row-major order.
    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }
}

/// Which render modes to apply.
///
/// Setting both gives the combined mode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderOptions {
    /// `(z_min, z_max)` for terrain shading.
    pub terrain_range: Option<(f64, f64)>,
    /// Water level for threshold classification.
    pub threshold_level: Option<f64>,
}

impl RenderOptions {
    /// Terrain shading only.
    pub fn terrain(z_min: f64, z_max: f64) -> Self {
        Self {
            terrain_range: Some((z_min, z_max)),
            threshold_level: None,
        }
    }

    /// Threshold classification only.
    pub fn threshold(level: f64) -> Self {
        Self {
            terrain_range: None,
            threshold_level: Some(level),
        }
    }

    /// Terrain shading with deep and at-risk areas painted over.
    pub fn combined(z_min: f64, z_max: f64, level: f64) -> Self {
        Self {
            terrain_range: Some((z_min, z_max)),
            threshold_level: Some(level),
        }
    }
}

/// Render a grid with the modes selected in `options`.
pub fn render(grid: &ElevationGrid<'_>, options: &RenderOptions) -> Result<RgbaImage> {
    match (options.terrain_range, options.threshold_level) {
        (Some((z_min, z_max)), Some(level)) => render_combined(grid, z_min, z_max, level),
        (Some((z_min, z_max)), None) => render_terrain(grid, z_min, z_max),
        (None, Some(level)) => render_threshold(grid, level),
        (None, None) => Err(RenderError::Configuration(
            "either a terrain range or a threshold level is required".to_string(),
        )),
    }
}

/// Shade every sample with the terrain colormap over `[z_min, z_max]`.
///
/// Values outside the range clamp to the end colors. Missing samples are transparent.
pub fn render_terrain(grid: &ElevationGrid<'_>, z_min: f64, z_max: f64) -> Result<RgbaImage> {
    let (lo, hi) = checked_range(z_min, z_max)?;
    paint(grid, |v| {
        if v.is_nan() {
            TRANSPARENT
        } else {
            terrain_color(normalize(v, lo, hi))
        }
    })
}

/// Classify every sample against `level`; safe samples are transparent.
pub fn render_threshold(grid: &ElevationGrid<'_>, level: f64) -> Result<RgbaImage> {
    let levels = ThresholdLevels::new(checked_level(level)?);
    paint(grid, |v| levels.classify(v).color())
}

/// Terrain shading with deep and at-risk samples overwritten by their threshold colors.
///
/// Marginal and safe samples keep the terrain color.
pub fn render_combined(
    grid: &ElevationGrid<'_>,
    z_min: f64,
    z_max: f64,
    level: f64,
) -> Result<RgbaImage> {
    let (lo, hi) = checked_range(z_min, z_max)?;
    let levels = ThresholdLevels::new(checked_level(level)?);
    paint(grid, |v| {
        if v.is_nan() {
            return TRANSPARENT;
        }
        match levels.classify(v) {
            band @ (ThresholdBand::Deep | ThresholdBand::AtRisk) => band.color(),
            ThresholdBand::Marginal | ThresholdBand::Safe => terrain_color(normalize(v, lo, hi)),
        }
    })
}

pub(crate) fn checked_range(z_min: f64, z_max: f64) -> Result<(f32, f32)> {
    if !z_min.is_finite() || !z_max.is_finite() {
        return Err(RenderError::Configuration(format!(
            "terrain range [{z_min}, {z_max}] is not finite"
        )));
    }
    if z_min > z_max {
        return Err(RenderError::Configuration(format!(
            "terrain range minimum {z_min} exceeds maximum {z_max}"
        )));
    }
    Ok((z_min as f32, z_max as f32))
}

fn checked_level(level: f64) -> Result<f64> {
    if !level.is_finite() {
        return Err(RenderError::Configuration(format!(
            "threshold level {level} is not finite"
        )));
    }
    Ok(level)
}

fn paint<F>(grid: &ElevationGrid<'_>, color_of: F) -> Result<RgbaImage>
where
    F: Fn(f32) -> [u8; 4],
{
    let mut pixels = Vec::with_capacity(grid.samples.len() * 4);
    for &v in grid.samples {
        pixels.extend_from_slice(&color_of(v));
    }
    RgbaImage::from_raw(grid.width, grid.height, pixels).ok_or(RenderError::GridSizeMismatch {
        width: grid.width,
        height: grid.height,
        actual: grid.samples.len(),
    })
}
