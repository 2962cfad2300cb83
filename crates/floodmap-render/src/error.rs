//! Error types for the render crate.

use thiserror::Error;

/// Errors that can occur while colorizing or encoding a raster.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Invalid render parameters, e.g. no mode requested or a reversed range.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Sample buffer does not match the declared grid size.
    #[error("Grid has {actual} samples, expected {width}x{height}")]
    GridSizeMismatch {
        /// Grid width in pixels.
        width: u32,
        /// Grid height in pixels.
        height: u32,
        /// Number of samples supplied.
        actual: usize,
    },

    /// PNG encoding failed.
    #[error("Image encoding error: {0}")]
    Encode(#[from] image::ImageError),
}
