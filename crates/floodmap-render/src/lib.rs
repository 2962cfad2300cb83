//! # floodmap-render
//!
//! Colorization of elevation grids for flood maps.
//!
//! Three modes are available:
//! - **Terrain**: a continuous colormap normalized over `[z_min, z_max]`
//! - **Threshold**: four bands relative to a water level; samples well above
//!   the level are transparent
//! - **Combined**: terrain shading with the two lowest bands painted over
//!
//! Missing samples (NaN) are transparent in every mode. Rendered images are
//! embedded in JSON as PNG data URIs.
//!
//! ## Example
//!
//! ```
//! use floodmap_render::{render, to_data_uri, ElevationGrid, RenderOptions};
//!
//! let samples = [17.5, 18.9, 19.2, 19.8];
//! let grid = ElevationGrid::new(&samples, 2, 2)?;
//! let image = render(&grid, &RenderOptions::threshold(19.2))?;
//! assert_eq!(image.get_pixel(0, 0).0, [0, 0, 255, 255]);
//!
//! let uri = to_data_uri(&image)?;
//! assert!(uri.starts_with("data:image/png;base64,"));
//! # Ok::<(), floodmap_render::RenderError>(())
//! ```

mod colorize;
mod colormap;
mod encode;
mod error;
mod legend;
mod threshold;

pub use colorize::{
    render, render_combined, render_terrain, render_threshold, ElevationGrid, RenderOptions,
};
pub use colormap::{normalize, terrain_color, terrain_lut, LUT_SIZE};
pub use encode::{encode_png, to_data_uri, PNG_DATA_URI_PREFIX};
pub use error::RenderError;
pub use image::RgbaImage;
pub use legend::{
    render_legend, render_legend_sized, ColorLegend, DEFAULT_LEGEND_HEIGHT, DEFAULT_LEGEND_WIDTH,
};
pub use threshold::{ThresholdBand, ThresholdLevels};

/// Result type for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;
