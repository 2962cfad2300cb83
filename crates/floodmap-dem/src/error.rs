//! Error types for the DEM crate.

use thiserror::Error;

/// Errors that can occur when fetching, caching or decoding DEM tiles.
#[derive(Debug, Error)]
pub enum DemError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing required tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Invalid tile filename - cannot be used as a cache entry.
    #[error("Invalid tile filename: {0}")]
    InvalidFilename(String),

    /// Cache lock was poisoned (a thread panicked while holding the lock).
    #[error("Tile cache lock was poisoned")]
    CacheLockPoisoned,

    /// Unsupported data type in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// Sample buffer does not match the raster dimensions.
    #[error("Raster has {actual} samples, expected {width}x{height}")]
    SampleCountMismatch {
        /// Raster width in pixels.
        width: u32,
        /// Raster height in pixels.
        height: u32,
        /// Number of decoded samples.
        actual: usize,
    },

    /// HTTP request error when fetching tiles.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Remote server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Failed to download tile from remote server.
    #[error("Failed to download tile {tile_id}: {reason}")]
    TileDownloadFailed {
        /// Tile identifier.
        tile_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Tile index could not be parsed.
    #[error("Tile index error: {0}")]
    TileIndex(#[from] serde_json::Error),
}

impl DemError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, server errors and rate limiting are transient;
    /// every other status (404 in particular) is final.
    pub fn is_transient(&self) -> bool {
        match self {
            DemError::HttpRequest(_) => true,
            DemError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the bytes themselves are unusable, as opposed to the read failing.
    ///
    /// A truncated file surfaces as an unexpected EOF inside the TIFF decoder
    /// and counts as corrupt. Other I/O failures do not.
    pub fn is_corrupt_data(&self) -> bool {
        match self {
            DemError::TiffDecode(tiff::TiffError::IoError(e)) => {
                e.kind() == std::io::ErrorKind::UnexpectedEof
            }
            DemError::TiffDecode(_)
            | DemError::InvalidGeoTiff(_)
            | DemError::UnsupportedDataType(_)
            | DemError::SampleCountMismatch { .. } => true,
            _ => false,
        }
    }
}

/// Errors from converting coordinates between the geographic and projected systems.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    /// Geographic input outside [-90, 90] latitude / [-180, 180] longitude.
    #[error("Coordinate (lat {lat}, lon {lon}) is outside the geographic domain")]
    GeographicOutOfDomain {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
    },

    /// Projected input is not a finite number.
    #[error("Projected coordinate ({x}, {y}) is not finite")]
    ProjectedOutOfDomain {
        /// Easting.
        x: f64,
        /// Northing.
        y: f64,
    },

    /// The projection library could not build a CRS for the EPSG code.
    #[error("Unsupported EPSG code {0}")]
    UnknownEpsg(u16),

    /// The projection library rejected the conversion.
    #[error("Projection failed: {0}")]
    Proj(String),

    /// The conversion produced NaN or infinity.
    #[error("Projection of ({0}, {1}) produced a non-finite result")]
    NonFinite(f64, f64),
}
