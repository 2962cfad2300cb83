//! # floodmap-dem
//!
//! Tile addressing, acquisition and decoding for DGM1 elevation data.
//!
//! ## Overview
//!
//! DGM1 tiles are 1 km x 1 km GeoTIFF rasters at 1 m resolution, published in
//! ETRS89 / UTM zone 32N (EPSG:25832). A tile is named after its lower-left
//! corner in kilometres, prefixed with the UTM zone: the tile with corner
//! (362000, 5618000) is `323625618`.
//!
//! Serving a geographic bounding box takes four steps:
//! 1. [`snap_to_grid`] projects the box and rounds it outwards to the 1 km grid
//! 2. [`derive_tile_ids`] enumerates the tiles inside the snapped box
//! 3. [`TileIndex`] maps each tile to its download URL
//! 4. [`TileCache`] returns the decoded [`RasterTile`], downloading it on a miss
//!
//! ## Example
//!
//! ```no_run
//! use floodmap_dem::{
//!     derive_tile_ids, snap_to_grid, CoordinateTransform, GeoBoundingBox, HttpTileSource,
//!     TileCache, TileIndex, DEFAULT_ZONE_PREFIX,
//! };
//! use std::sync::Arc;
//!
//! let transform = CoordinateTransform::utm32()?;
//! let bbox = GeoBoundingBox::new(50.70, 7.05, 50.75, 7.15);
//! let snapped = snap_to_grid(&transform, &bbox)?;
//!
//! let index = Arc::new(TileIndex::from_json_file("dgm1_tiles/tile_dict.json")?);
//! let cache = TileCache::new(index, "dgm1_tiles", HttpTileSource::new()?)?;
//!
//! for id in derive_tile_ids(&snapped, DEFAULT_ZONE_PREFIX) {
//!     if let Some(tile) = cache.resolve(&id).into_tile() {
//!         println!("{id}: {:?}", tile.elevation_range());
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod cache;
mod coords;
mod error;
mod grid;
mod index;
mod source;
mod tile;

pub use cache::{
    CacheStats, FetchPolicy, TileCache, TileOrigin, TileOutcome, DEFAULT_FETCH_RETRIES,
    DEFAULT_RETRY_BACKOFF,
};
pub use coords::{CoordinateTransform, DEFAULT_GEOGRAPHIC_EPSG, DEFAULT_PROJECTED_EPSG};
pub use error::{DemError, ProjectionError};
pub use grid::{
    derive_tile_ids, snap_to_grid, GeoBoundingBox, ProjectedBoundingBox, TileId,
    DEFAULT_ZONE_PREFIX, TILE_SIZE,
};
pub use index::TileIndex;
pub use source::{HttpTileSource, TileSource, DEFAULT_FETCH_TIMEOUT, DEFAULT_USER_AGENT};
pub use tile::{RasterBounds, RasterTile};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
