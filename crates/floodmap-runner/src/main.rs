//! `floodmap` command-line runner.
//!
//! ```text
//! floodmap render    --lat-min 50.70 --lon-min 7.05 --lat-max 50.75 --lon-max 7.15 --terrain --threshold
//! floodmap terrain   --lat-min 50.70 --lon-min 7.05 --lat-max 50.75 --lon-max 7.15
//! floodmap threshold --lat-min 50.70 --lon-min 7.05 --lat-max 50.75 --lon-max 7.15 --level 19.5
//! floodmap tiles     --lat-min 50.70 --lon-min 7.05 --lat-max 50.75 --lon-max 7.15
//! ```
//!
//! JSON goes to stdout (or `--output`), logs go to stderr.

use clap::{Args, Parser, Subcommand};
use floodmap_dem::GeoBoundingBox;
use floodmap_runner::{
    CancelFlag, ConfigError, FloodMapConfig, FloodMapRequest, OrchestratorError,
    RequestOrchestrator,
};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "floodmap", author, version, about = "Render DGM1 flood maps for a bounding box")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// YAML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tile cache directory (overrides the config file)
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Tile index JSON (overrides the config file)
    #[arg(long, global = true, value_name = "FILE")]
    index: Option<PathBuf>,

    /// Worker threads (overrides the config file)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Args, Debug, Clone, Copy)]
struct BboxArgs {
    /// Southern edge in degrees
    #[arg(long, allow_hyphen_values = true)]
    lat_min: f64,
    /// Western edge in degrees
    #[arg(long, allow_hyphen_values = true)]
    lon_min: f64,
    /// Northern edge in degrees
    #[arg(long, allow_hyphen_values = true)]
    lat_max: f64,
    /// Eastern edge in degrees
    #[arg(long, allow_hyphen_values = true)]
    lon_max: f64,
}

impl BboxArgs {
    fn bbox(&self) -> GeoBoundingBox {
        GeoBoundingBox::new(self.lat_min, self.lon_min, self.lat_max, self.lon_max)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render terrain and/or threshold layers
    Render {
        #[command(flatten)]
        bbox: BboxArgs,
        /// Render the terrain colormap
        #[arg(long)]
        terrain: bool,
        /// Render the flood threshold layer
        #[arg(long)]
        threshold: bool,
        /// Water level for the threshold layer
        #[arg(long, allow_hyphen_values = true)]
        level: Option<f64>,
        /// Write JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render the terrain layer only
    Terrain {
        #[command(flatten)]
        bbox: BboxArgs,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render the threshold layer only
    Threshold {
        #[command(flatten)]
        bbox: BboxArgs,
        #[arg(long, allow_hyphen_values = true)]
        level: Option<f64>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the tiles covering a bounding box without fetching them
    Tiles {
        #[command(flatten)]
        bbox: BboxArgs,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Orchestrator(OrchestratorError::Cancelled) => ExitCode::from(130),
            CliError::Orchestrator(e) if e.is_client_error() => ExitCode::from(2),
            CliError::Config(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}

fn load_config(cli: &Cli) -> Result<FloodMapConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => FloodMapConfig::from_yaml_file(path)?,
        None => FloodMapConfig::default(),
    };

    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(index) = &cli.index {
        config.tile_index = index.clone();
    }
    if let Some(workers) = cli.workers {
        config.limits.workers = workers;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    let orchestrator = RequestOrchestrator::from_config(&config)?;
    let default_level = config.render.default_threshold_level;

    let (request, output) = match cli.command {
        Command::Tiles { bbox } => {
            let plan = orchestrator.plan(&bbox.bbox())?;
            return write_json(&plan, None);
        }
        Command::Render {
            bbox,
            terrain,
            threshold,
            level,
            output,
        } => (
            FloodMapRequest::new(bbox.bbox(), terrain, threshold, level.unwrap_or(default_level)),
            output,
        ),
        Command::Terrain { bbox, output } => (FloodMapRequest::terrain(bbox.bbox()), output),
        Command::Threshold {
            bbox,
            level,
            output,
        } => (
            FloodMapRequest::threshold(bbox.bbox(), level.unwrap_or(default_level)),
            output,
        ),
    };

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.cancel()) {
        warn!("Could not install Ctrl-C handler: {e}");
    }

    let (payload, _report) = orchestrator.build_response_with_report(&request, &cancel)?;
    write_json(&payload, output.as_deref())
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), CliError> {
    match output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, value)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
