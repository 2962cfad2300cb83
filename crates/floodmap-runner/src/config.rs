//! Runner configuration loaded from YAML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```yaml
//! tile_index: dgm1_tiles/tile_dict.json
//! cache_dir: dgm1_tiles
//! grid:
//!   zone_prefix: "32"
//!   geographic_epsg: 4326
//!   projected_epsg: 25832
//! fetch:
//!   timeout_secs: 60
//!   retries: 2
//!   retry_backoff_ms: 500
//! render:
//!   default_threshold_level: 19.2
//!   legend_width: 32
//!   legend_height: 256
//! limits:
//!   workers: 4
//!   max_tiles: 400
//!   request_timeout_secs: 300
//! ```

use floodmap_dem::{
    FetchPolicy, DEFAULT_FETCH_RETRIES, DEFAULT_GEOGRAPHIC_EPSG, DEFAULT_PROJECTED_EPSG,
    DEFAULT_USER_AGENT, DEFAULT_ZONE_PREFIX,
};
use floodmap_render::{DEFAULT_LEGEND_HEIGHT, DEFAULT_LEGEND_WIDTH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Water level used when a threshold request gives none.
pub const DEFAULT_THRESHOLD_LEVEL: f64 = 19.2;

/// Errors loading or validating a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FloodMapConfig {
    /// JSON file mapping tile IDs to download URLs.
    pub tile_index: PathBuf,
    /// Directory holding cached tile files.
    pub cache_dir: PathBuf,
    pub grid: GridConfig,
    pub fetch: FetchConfig,
    pub render: RenderConfig,
    pub limits: LimitsConfig,
}

impl Default for FloodMapConfig {
    fn default() -> Self {
        Self {
            tile_index: PathBuf::from("dgm1_tiles/tile_dict.json"),
            cache_dir: PathBuf::from("dgm1_tiles"),
            grid: GridConfig::default(),
            fetch: FetchConfig::default(),
            render: RenderConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Coordinate systems and tile naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// Prefix of every tile ID (the UTM zone).
    pub zone_prefix: String,
    /// EPSG code of request coordinates.
    pub geographic_epsg: u16,
    /// EPSG code of the tile grid.
    pub projected_epsg: u16,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            zone_prefix: DEFAULT_ZONE_PREFIX.to_string(),
            geographic_epsg: DEFAULT_GEOGRAPHIC_EPSG,
            projected_epsg: DEFAULT_PROJECTED_EPSG,
        }
    }
}

/// Remote fetch behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Retries for transient failures.
    pub retries: u32,
    /// Delay before the first retry, doubled for each further one.
    pub retry_backoff_ms: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            retries: DEFAULT_FETCH_RETRIES,
            retry_backoff_ms: 500,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    /// HTTP timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy for the tile cache.
    pub fn policy(&self) -> FetchPolicy {
        FetchPolicy {
            retries: self.retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Rendering defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub default_threshold_level: f64,
    pub legend_width: u32,
    pub legend_height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_threshold_level: DEFAULT_THRESHOLD_LEVEL,
            legend_width: DEFAULT_LEGEND_WIDTH,
            legend_height: DEFAULT_LEGEND_HEIGHT,
        }
    }
}

/// Resource limits per process and per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Worker threads for tile resolution and rendering.
    pub workers: usize,
    /// Largest number of tiles a single request may cover.
    pub max_tiles: usize,
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_tiles: 400,
            request_timeout_secs: 300,
        }
    }
}

impl FloodMapConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty map
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.zone_prefix.is_empty() {
            return Err(ConfigError::Invalid("grid.zone_prefix must not be empty".into()));
        }
        if self.limits.workers == 0 {
            return Err(ConfigError::Invalid("limits.workers must be at least 1".into()));
        }
        if self.limits.max_tiles == 0 {
            return Err(ConfigError::Invalid("limits.max_tiles must be at least 1".into()));
        }
        if self.limits.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "limits.request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be at least 1".into()));
        }
        if self.render.legend_width == 0 || self.render.legend_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "legend size {}x{} must be non-zero",
                self.render.legend_width, self.render.legend_height
            )));
        }
        if !self.render.default_threshold_level.is_finite() {
            return Err(ConfigError::Invalid(
                "render.default_threshold_level must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Request deadline as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.request_timeout_secs)
    }
}
