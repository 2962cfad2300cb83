//! JSON response payload.
//!
//! Field names match what existing map clients consume: `bbox`, `terrain`,
//! `custom` for the threshold block, and camelCase tile fields.

use serde::{Deserialize, Serialize};

/// Complete response for one bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Effective grid-aligned box as `[lon_min, lat_min, lon_max, lat_max]`.
    pub bbox: [f64; 4],
    /// Terrain (or combined) rendering, if requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain: Option<TerrainBlock>,
    /// Threshold-only rendering, if requested without terrain.
    #[serde(rename = "custom", default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ThresholdBlock>,
}

/// Terrain tiles with their shared legend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainBlock {
    /// Legend as a PNG data URI; `null` when no tile had data.
    pub colormap: Option<String>,
    /// `[z_min, z_max]` over all tiles; `null` when no tile had data.
    pub range: Option<[f64; 2]>,
    /// Threshold level painted over the terrain in combined mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    pub tiles: Vec<TilePayload>,
}

/// Threshold-classified tiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBlock {
    pub level: f64,
    pub tiles: Vec<TilePayload>,
}

/// One rendered tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilePayload {
    pub tile_id: String,
    /// PNG data URI.
    pub raster_image: String,
    /// `[left, bottom, right, top]` in the tile's native CRS.
    pub bounds: [f64; 4],
    /// Native CRS, e.g. `EPSG:25832`.
    pub crs: String,
}
