//! Request orchestration: bounding box in, rendered payload out.
//!
//! A request runs in three phases:
//! 1. Snap the box to the tile grid and derive the tile IDs
//! 2. Resolve every tile through the cache on the worker pool
//! 3. Compute the elevation range over all loaded tiles, then render
//!
//! Tiles that cannot be loaded are left out of the payload. The reasons are
//! counted in the [`RequestReport`] returned next to it.

use crate::config::FloodMapConfig;
use crate::payload::{ResponsePayload, TerrainBlock, ThresholdBlock, TilePayload};
use floodmap_dem::{
    derive_tile_ids, snap_to_grid, CoordinateTransform, DemError, GeoBoundingBox,
    HttpTileSource, ProjectedBoundingBox, ProjectionError, RasterTile, TileCache, TileId,
    TileIndex, TileOrigin, TileOutcome, TileSource,
};
use floodmap_render::{
    render, render_legend_sized, to_data_uri, ElevationGrid, RenderError, RenderOptions,
};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that abort a whole request.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The bounding box could not be projected.
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// Invalid request parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rendering or image encoding failed.
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// The request was cancelled by the caller.
    #[error("Request cancelled")]
    Cancelled,

    /// The request ran past its deadline.
    #[error("Request exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    /// Tile index or cache could not be set up.
    #[error("Tile store error: {0}")]
    TileStore(#[from] DemError),

    /// Configuration file problem.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Worker pool could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl OrchestratorError {
    /// Whether the caller's input caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Projection(_)
                | OrchestratorError::Configuration(_)
                | OrchestratorError::Render(RenderError::Configuration(_))
        )
    }
}

/// Result type for orchestration.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Shared flag a caller sets to abandon a running request.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask running requests to stop at their next checkpoint.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to render for a bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloodMapRequest {
    pub bbox: GeoBoundingBox,
    /// Render the terrain colormap and legend.
    pub terrain: bool,
    /// Water level for threshold rendering; `None` disables it.
    pub threshold_level: Option<f64>,
}

impl FloodMapRequest {
    /// Request with explicit mode flags; `level` only applies when `threshold` is set.
    pub fn new(bbox: GeoBoundingBox, terrain: bool, threshold: bool, level: f64) -> Self {
        Self {
            bbox,
            terrain,
            threshold_level: threshold.then_some(level),
        }
    }

    /// Terrain only.
    pub fn terrain(bbox: GeoBoundingBox) -> Self {
        Self::new(bbox, true, false, 0.0)
    }

    /// Threshold only.
    pub fn threshold(bbox: GeoBoundingBox, level: f64) -> Self {
        Self::new(bbox, false, true, level)
    }

    /// Terrain with deep and at-risk areas painted over.
    pub fn combined(bbox: GeoBoundingBox, level: f64) -> Self {
        Self::new(bbox, true, true, level)
    }
}

/// Per-request diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestReport {
    /// Tiles covered by the snapped box.
    pub tiles_requested: usize,
    pub tiles_loaded: usize,
    pub cache_hits: usize,
    pub downloads: usize,
    pub not_indexed: usize,
    pub fetch_failures: usize,
    pub decode_failures: usize,
    pub elapsed: Duration,
}

impl RequestReport {
    fn record(&mut self, outcome: &TileOutcome) {
        match outcome {
            TileOutcome::Loaded { origin, .. } => {
                self.tiles_loaded += 1;
                match origin {
                    TileOrigin::Cache => self.cache_hits += 1,
                    TileOrigin::Remote => self.downloads += 1,
                }
            }
            TileOutcome::NotIndexed => self.not_indexed += 1,
            TileOutcome::FetchFailed(_) => self.fetch_failures += 1,
            TileOutcome::DecodeFailed(_) => self.decode_failures += 1,
        }
    }
}

/// Tile layout of a bounding box, without fetching anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TilePlan {
    /// Snapped box in the projected system as `[x_min, y_min, x_max, y_max]`.
    pub projected: [i64; 4],
    /// Effective box as `[lon_min, lat_min, lon_max, lat_max]`.
    pub bbox: [f64; 4],
    pub tiles: Vec<PlannedTile>,
}

/// One tile of a [`TilePlan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTile {
    pub tile_id: String,
    /// Download URL, or `None` if the index has no entry.
    pub url: Option<String>,
    pub cached: bool,
}

/// Tunables for [`RequestOrchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub zone_prefix: String,
    pub workers: usize,
    pub max_tiles: usize,
    pub request_timeout: Duration,
    pub legend_width: u32,
    pub legend_height: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&FloodMapConfig::default())
    }
}

impl From<&FloodMapConfig> for OrchestratorSettings {
    fn from(config: &FloodMapConfig) -> Self {
        Self {
            zone_prefix: config.grid.zone_prefix.clone(),
            workers: config.limits.workers,
            max_tiles: config.limits.max_tiles,
            request_timeout: config.request_timeout(),
            legend_width: config.render.legend_width,
            legend_height: config.render.legend_height,
        }
    }
}

/// Deadline and cancellation checks shared by all workers of one request.
struct Checkpoint<'a> {
    cancel: &'a CancelFlag,
    deadline: Instant,
    timeout: Duration,
}

impl Checkpoint<'_> {
    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(OrchestratorError::DeadlineExceeded(self.timeout));
        }
        Ok(())
    }
}

/// Builds flood map payloads from a shared tile cache.
pub struct RequestOrchestrator {
    transform: CoordinateTransform,
    cache: Arc<TileCache>,
    pool: rayon::ThreadPool,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish()
    }
}

impl RequestOrchestrator {
    /// Create an orchestrator around an existing cache.
    pub fn new(
        transform: CoordinateTransform,
        cache: Arc<TileCache>,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        if settings.workers == 0 {
            return Err(OrchestratorError::Configuration(
                "at least one worker is required".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.workers)
            .thread_name(|i| format!("floodmap-worker-{i}"))
            .build()?;

        Ok(Self {
            transform,
            cache,
            pool,
            settings,
        })
    }

    /// Build everything from configuration, downloading over HTTP.
    pub fn from_config(config: &FloodMapConfig) -> Result<Self> {
        let source = HttpTileSource::with_timeout(config.fetch.timeout(), &config.fetch.user_agent)?;
        Self::from_config_with_source(config, source)
    }

    /// Build everything from configuration with a custom tile source.
    pub fn from_config_with_source<S>(config: &FloodMapConfig, source: S) -> Result<Self>
    where
        S: TileSource + 'static,
    {
        config.validate()?;
        let transform =
            CoordinateTransform::new(config.grid.geographic_epsg, config.grid.projected_epsg)?;
        let index = Arc::new(TileIndex::from_json_file(&config.tile_index)?);
        let cache = TileCache::new(index, &config.cache_dir, source)?
            .with_policy(config.fetch.policy())
            .with_fallback_epsg(config.grid.projected_epsg);

        Self::new(transform, Arc::new(cache), OrchestratorSettings::from(config))
    }

    /// The shared tile cache.
    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    /// Snap a box and list its tiles without fetching them.
    ///
    /// Boxes covering more than `max_tiles` tiles are rejected.
    pub fn plan(&self, bbox: &GeoBoundingBox) -> Result<TilePlan> {
        let (snapped, effective, ids) = self.snap(bbox)?;
        let index = self.cache.index();
        let tiles = ids
            .iter()
            .map(|id| PlannedTile {
                tile_id: id.to_string(),
                url: index.get(id).map(str::to_string),
                cached: self.cache.is_cached(id),
            })
            .collect();

        Ok(TilePlan {
            projected: [snapped.x_min, snapped.y_min, snapped.x_max, snapped.y_max],
            bbox: effective.to_lon_lat_array(),
            tiles,
        })
    }

    /// Build the payload for a request.
    pub fn build_response(&self, request: &FloodMapRequest) -> Result<ResponsePayload> {
        self.build_response_with_report(request, &CancelFlag::new())
            .map(|(payload, _)| payload)
    }

    /// Build the payload for a request and report what happened to each tile.
    ///
    /// `cancel` is checked before every tile resolve and render.
    pub fn build_response_with_report(
        &self,
        request: &FloodMapRequest,
        cancel: &CancelFlag,
    ) -> Result<(ResponsePayload, RequestReport)> {
        let started = Instant::now();
        let checkpoint = Checkpoint {
            cancel,
            deadline: started + self.settings.request_timeout,
            timeout: self.settings.request_timeout,
        };

        if !request.terrain && request.threshold_level.is_none() {
            return Err(OrchestratorError::Configuration(
                "request must enable terrain or threshold rendering".to_string(),
            ));
        }
        if let Some(level) = request.threshold_level {
            if !level.is_finite() {
                return Err(OrchestratorError::Configuration(format!(
                    "threshold level {level} is not finite"
                )));
            }
        }

        let (_, effective, ids) = self.snap(&request.bbox)?;
        let mut report = RequestReport {
            tiles_requested: ids.len(),
            ..RequestReport::default()
        };
        let tiles = self.resolve_all(&ids, &checkpoint, &mut report)?;

        let mut payload = ResponsePayload {
            bbox: effective.to_lon_lat_array(),
            terrain: None,
            threshold: None,
        };

        if request.terrain {
            payload.terrain = Some(self.terrain_block(&tiles, request.threshold_level, &checkpoint)?);
        } else if let Some(level) = request.threshold_level {
            let tiles = self.render_tiles(&tiles, RenderOptions::threshold(level), &checkpoint)?;
            payload.threshold = Some(ThresholdBlock { level, tiles });
        }

        report.elapsed = started.elapsed();
        info!(
            tiles = report.tiles_requested,
            loaded = report.tiles_loaded,
            cache_hits = report.cache_hits,
            downloads = report.downloads,
            not_indexed = report.not_indexed,
            fetch_failures = report.fetch_failures,
            decode_failures = report.decode_failures,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Flood map request complete"
        );

        Ok((payload, report))
    }

    fn snap(
        &self,
        bbox: &GeoBoundingBox,
    ) -> Result<(ProjectedBoundingBox, GeoBoundingBox, Vec<TileId>)> {
        let snapped = snap_to_grid(&self.transform, bbox)?;
        let count = snapped.tile_count();
        if count > self.settings.max_tiles {
            return Err(OrchestratorError::Configuration(format!(
                "bounding box covers {count} tiles, the limit is {}",
                self.settings.max_tiles
            )));
        }
        let effective = self.transform.to_geographic_box(&snapped)?;
        let ids = derive_tile_ids(&snapped, &self.settings.zone_prefix);
        debug!(?snapped, tiles = ids.len(), "Snapped bounding box");
        Ok((snapped, effective, ids))
    }

    /// Resolve all tiles in parallel, keeping grid order and dropping failures.
    fn resolve_all(
        &self,
        ids: &[TileId],
        checkpoint: &Checkpoint<'_>,
        report: &mut RequestReport,
    ) -> Result<Vec<RasterTile>> {
        let cache = &self.cache;
        let outcomes: Vec<TileOutcome> = self.pool.install(|| {
            ids.par_iter()
                .map(|id| {
                    checkpoint.check()?;
                    Ok(cache.resolve(id))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        for outcome in &outcomes {
            report.record(outcome);
        }
        Ok(outcomes.into_iter().filter_map(TileOutcome::into_tile).collect())
    }

    fn terrain_block(
        &self,
        tiles: &[RasterTile],
        level: Option<f64>,
        checkpoint: &Checkpoint<'_>,
    ) -> Result<TerrainBlock> {
        let Some((z_min, z_max)) = elevation_extrema(tiles) else {
            debug!("No elevation data, returning empty terrain block");
            return Ok(TerrainBlock {
                colormap: None,
                range: None,
                level,
                tiles: Vec::new(),
            });
        };

        let legend = render_legend_sized(
            z_min,
            z_max,
            self.settings.legend_width,
            self.settings.legend_height,
        )?;
        let options = RenderOptions {
            terrain_range: Some((z_min, z_max)),
            threshold_level: level,
        };

        Ok(TerrainBlock {
            colormap: Some(to_data_uri(&legend.image)?),
            range: Some([z_min, z_max]),
            level,
            tiles: self.render_tiles(tiles, options, checkpoint)?,
        })
    }

    fn render_tiles(
        &self,
        tiles: &[RasterTile],
        options: RenderOptions,
        checkpoint: &Checkpoint<'_>,
    ) -> Result<Vec<TilePayload>> {
        self.pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| {
                    checkpoint.check()?;
                    render_tile(tile, &options)
                })
                .collect()
        })
    }
}

fn render_tile(tile: &RasterTile, options: &RenderOptions) -> Result<TilePayload> {
    let (width, height) = tile.dimensions();
    let grid = ElevationGrid::new(tile.elevations(), width, height)?;
    let image = render(&grid, options)?;

    Ok(TilePayload {
        tile_id: tile.id().to_string(),
        raster_image: to_data_uri(&image)?,
        bounds: tile.bounds().to_array(),
        crs: tile.crs().to_string(),
    })
}

/// Global minimum and maximum over every finite sample of every tile.
fn elevation_extrema(tiles: &[RasterTile]) -> Option<(f64, f64)> {
    tiles
        .iter()
        .filter_map(RasterTile::elevation_range)
        .fold(None, |acc, (lo, hi)| match acc {
            None => Some((lo, hi)),
            Some((a, b)) => Some((a.min(lo), b.max(hi))),
        })
        .map(|(lo, hi)| (lo as f64, hi as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use floodmap_dem::RasterBounds;

    fn tile(id: &str, data: Vec<f32>) -> RasterTile {
        let bounds = RasterBounds {
            left: 0.0,
            bottom: 0.0,
            right: 2.0,
            top: 1.0,
        };
        RasterTile::from_parts(TileId::from(id), data, 2, 1, bounds, "EPSG:25832").unwrap()
    }

    #[test]
    fn test_extrema_ignore_missing_samples() {
        let tiles = [
            tile("a", vec![18.0, f32::NAN]),
            tile("b", vec![f32::NAN, f32::NAN]),
            tile("c", vec![25.5, 12.25]),
        ];
        assert_eq!(elevation_extrema(&tiles), Some((12.25, 25.5)));
        assert_eq!(elevation_extrema(&tiles[1..2]), None);
        assert_eq!(elevation_extrema(&[]), None);
    }

    #[test]
    fn test_render_tile_payload() {
        let payload = render_tile(&tile("323625618", vec![17.5, 19.8]), &RenderOptions::threshold(19.2))
            .unwrap();
        assert_eq!(payload.tile_id, "323625618");
        assert_eq!(payload.bounds, [0.0, 0.0, 2.0, 1.0]);
        assert_eq!(payload.crs, "EPSG:25832");
        assert!(payload.raster_image.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_request_constructors() {
        let bbox = GeoBoundingBox::new(50.70, 7.05, 50.75, 7.15);
        assert_eq!(FloodMapRequest::terrain(bbox).threshold_level, None);
        assert_eq!(FloodMapRequest::threshold(bbox, 19.2).threshold_level, Some(19.2));
        assert!(!FloodMapRequest::threshold(bbox, 19.2).terrain);
        assert!(FloodMapRequest::combined(bbox, 18.0).terrain);
        assert_eq!(FloodMapRequest::new(bbox, true, false, 19.2).threshold_level, None);
    }

    #[test]
    fn test_client_errors() {
        assert!(OrchestratorError::Configuration("x".into()).is_client_error());
        assert!(OrchestratorError::Render(RenderError::Configuration("x".into())).is_client_error());
        assert!(!OrchestratorError::Cancelled.is_client_error());
        assert!(!OrchestratorError::DeadlineExceeded(Duration::from_secs(1)).is_client_error());
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
