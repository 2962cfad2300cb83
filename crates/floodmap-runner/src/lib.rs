//! # floodmap-runner
//!
//! Request orchestration for the flood map service and the `floodmap`
//! command-line runner.
//!
//! The [`RequestOrchestrator`] owns the coordinate transform, the shared tile
//! cache and a worker pool. Each [`FloodMapRequest`] is snapped to the tile
//! grid, its tiles are resolved in parallel, and the loaded tiles are rendered
//! into a [`ResponsePayload`] ready to be serialized as JSON.
//!
//! ```no_run
//! use floodmap_dem::GeoBoundingBox;
//! use floodmap_runner::{FloodMapConfig, FloodMapRequest, RequestOrchestrator};
//!
//! let config = FloodMapConfig::from_yaml_file("floodmap.yaml")?;
//! let orchestrator = RequestOrchestrator::from_config(&config)?;
//!
//! let bbox = GeoBoundingBox::new(50.70, 7.05, 50.75, 7.15);
//! let payload = orchestrator.build_response(&FloodMapRequest::combined(bbox, 19.2))?;
//! println!("{}", serde_json::to_string(&payload)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod orchestrator;
pub mod payload;

pub use config::{ConfigError, FloodMapConfig, DEFAULT_THRESHOLD_LEVEL};
pub use orchestrator::{
    CancelFlag, FloodMapRequest, OrchestratorError, OrchestratorSettings, PlannedTile,
    RequestOrchestrator, RequestReport, TilePlan,
};
pub use payload::{ResponsePayload, TerrainBlock, ThresholdBlock, TilePayload};
