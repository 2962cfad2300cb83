//! Vertical color bar for the terrain colormap.

use crate::colorize::checked_range;
use crate::colormap::{normalize, terrain_color};
use crate::{RenderError, Result};
use image::{Rgba, RgbaImage};

/// Default legend width in pixels.
pub const DEFAULT_LEGEND_WIDTH: u32 = 32;

/// Default legend height in pixels.
pub const DEFAULT_LEGEND_HEIGHT: u32 = 256;

const OUTLINE: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// A rendered legend and the elevation range it spans.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorLegend {
    /// The color bar; top row is `z_max`, bottom row is `z_min`.
    pub image: RgbaImage,
    /// Elevation at the bottom edge.
    pub z_min: f64,
    /// Elevation at the top edge.
    pub z_max: f64,
}

/// Render a legend of the default size.
pub fn render_legend(z_min: f64, z_max: f64) -> Result<ColorLegend> {
    render_legend_sized(z_min, z_max, DEFAULT_LEGEND_WIDTH, DEFAULT_LEGEND_HEIGHT)
}

/// Render a `width` x `height` legend spanning `[z_min, z_max]`.
///
/// Uses the same normalization as terrain rendering, so a tile pixel and the
/// legend row for its elevation have the same color.
pub fn render_legend_sized(z_min: f64, z_max: f64, width: u32, height: u32) -> Result<ColorLegend> {
    let (lo, hi) = checked_range(z_min, z_max)?;
    if width == 0 || height == 0 {
        return Err(RenderError::Configuration(format!(
            "legend size {width}x{height} must be non-zero"
        )));
    }

    let last_row = (height - 1).max(1) as f32;
    let image = RgbaImage::from_fn(width, height, |x, y| {
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            return OUTLINE;
        }
        let value = hi - (hi - lo) * (y as f32 / last_row);
        Rgba(terrain_color(normalize(value, lo, hi)))
    });

    Ok(ColorLegend {
        image,
        z_min,
        z_max,
    })
}
