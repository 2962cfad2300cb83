//! End-to-end tests for the request orchestrator with an in-memory tile source.
//!
//! The fixture index covers three tiles of the Bonn box, lists a fourth whose
//! download returns 404, and leaves the rest of the 8 x 6 grid unindexed.

use approx::assert_abs_diff_eq;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use floodmap_dem::{DemError, GeoBoundingBox, TileSource};
use floodmap_runner::{
    CancelFlag, FloodMapConfig, FloodMapRequest, OrchestratorError, RequestOrchestrator,
    ResponsePayload,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const BASE_URL: &str = "https://tiles.example.org/dgm1";

/// (tile id, lower-left x, lower-left y, samples)
const TILES: [(&str, f64, f64, [f32; 4]); 3] = [
    ("323625618", 362_000.0, 5_618_000.0, [17.5, 18.9, 19.2, 19.8]),
    ("323625619", 362_000.0, 5_619_000.0, [21.0, 22.0, 23.0, 24.0]),
    ("323635618", 363_000.0, 5_618_000.0, [16.0, 30.5, f32::NAN, 20.0]),
];

const MISSING_TILE: &str = "323645618";

fn bonn() -> GeoBoundingBox {
    GeoBoundingBox::new(50.70, 7.05, 50.75, 7.15)
}

fn file_name(id: &str) -> String {
    format!("dgm1_32_{}_{}_1_nw_2021.tif", &id[2..5], &id[5..])
}

fn url_for(id: &str) -> String {
    format!("{BASE_URL}/{}", file_name(id))
}

fn geotiff_fixture(x: f64, y: f64, samples: &[f32; 4]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        let mut image = encoder.new_image::<colortype::Gray32Float>(2, 2).unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[500.0f64, 500.0, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelTiepointTag, &[0.0f64, 0.0, 0.0, x, y + 1000.0, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::GeoKeyDirectoryTag, &[1u16, 1, 0, 1, 3072, 0, 1, 25832][..])
            .unwrap();
        image.write_data(&samples[..]).unwrap();
    }
    buf.into_inner()
}

/// Serves the fixture tiles; everything else is a 404.
struct FixtureSource {
    bodies: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
    delay: Duration,
    cancel_on_fetch: Option<CancelFlag>,
}

impl FixtureSource {
    fn new() -> Self {
        let bodies = TILES
            .iter()
            .map(|(id, x, y, samples)| (url_for(id), geotiff_fixture(*x, *y, samples)))
            .collect();
        Self {
            bodies,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            cancel_on_fetch: None,
        }
    }

    /// Sleep this long in every fetch.
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Cancel `flag` from inside the first fetch.
    fn cancelling(flag: CancelFlag) -> Self {
        Self {
            cancel_on_fetch: Some(flag),
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileSource for FixtureSource {
    fn fetch(&self, url: &str) -> floodmap_dem::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = &self.cancel_on_fetch {
            flag.cancel();
        }
        std::thread::sleep(self.delay);
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| DemError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}

struct Fixture {
    dir: TempDir,
    source: Arc<FixtureSource>,
    orchestrator: RequestOrchestrator,
}

impl Fixture {
    fn cache_dir(&self) -> &Path {
        self.dir.path()
    }
}

fn fixture_with(configure: impl FnOnce(&mut FloodMapConfig)) -> Fixture {
    fixture_with_source(FixtureSource::new(), configure)
}

fn fixture_with_source(
    source: FixtureSource,
    configure: impl FnOnce(&mut FloodMapConfig),
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let index: HashMap<String, String> = TILES
        .iter()
        .map(|(id, ..)| id.to_string())
        .chain(std::iter::once(MISSING_TILE.to_string()))
        .map(|id| (id.clone(), url_for(&id)))
        .collect();
    let index_path = dir.path().join("tile_dict.json");
    std::fs::write(&index_path, serde_json::to_string(&index).unwrap()).unwrap();

    let mut config = FloodMapConfig {
        tile_index: index_path,
        cache_dir: dir.path().to_path_buf(),
        ..FloodMapConfig::default()
    };
    config.fetch.retries = 0;
    config.limits.workers = 2;
    configure(&mut config);

    let source = Arc::new(source);
    let orchestrator =
        RequestOrchestrator::from_config_with_source(&config, Arc::clone(&source)).unwrap();
    Fixture {
        dir,
        source,
        orchestrator,
    }
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn decode_pixels(data_uri: &str) -> Vec<[u8; 4]> {
    let payload = data_uri
        .strip_prefix("data:image/png;base64,")
        .expect("not a PNG data URI");
    let png = STANDARD.decode(payload).unwrap();
    image::load_from_memory(&png)
        .unwrap()
        .to_rgba8()
        .pixels()
        .map(|p| p.0)
        .collect()
}

fn tile_ids(payload: &ResponsePayload) -> Vec<String> {
    let tiles = match (&payload.terrain, &payload.threshold) {
        (Some(terrain), _) => &terrain.tiles,
        (None, Some(threshold)) => &threshold.tiles,
        (None, None) => panic!("payload has no tile block"),
    };
    tiles.iter().map(|t| t.tile_id.clone()).collect()
}

#[test]
fn test_combined_request() {
    let fx = fixture();
    let cancel = CancelFlag::new();
    let (payload, report) = fx
        .orchestrator
        .build_response_with_report(&FloodMapRequest::combined(bonn(), 19.2), &cancel)
        .unwrap();

    // Effective box is grid aligned and contains the request
    let [lon_min, lat_min, lon_max, lat_max] = payload.bbox;
    let effective = GeoBoundingBox::new(lat_min, lon_min, lat_max, lon_max);
    assert!(effective.contains(&bonn()), "{effective:?}");

    let terrain = payload.terrain.as_ref().expect("terrain block");
    assert!(payload.threshold.is_none());
    assert_eq!(terrain.level, Some(19.2));
    let [z_min, z_max] = terrain.range.expect("range");
    assert_abs_diff_eq!(z_min, 16.0);
    assert_abs_diff_eq!(z_max, 30.5);
    assert!(terrain
        .colormap
        .as_deref()
        .is_some_and(|c| c.starts_with("data:image/png;base64,")));

    assert_eq!(tile_ids(&payload), ["323625618", "323625619", "323635618"]);
    let first = &terrain.tiles[0];
    assert_eq!(first.crs, "EPSG:25832");
    assert_eq!(first.bounds, [362_000.0, 5_618_000.0, 363_000.0, 5_619_000.0]);

    // Deep and at-risk are painted over, marginal and safe keep the terrain shading
    let pixels = decode_pixels(&first.raster_image);
    assert_eq!(pixels[0], [0, 0, 255, 255]);
    assert_eq!(pixels[1], [255, 0, 0, 255]);
    assert!(pixels.iter().all(|p| p[3] == 255));

    assert_eq!(report.tiles_requested, 48);
    assert_eq!(report.tiles_loaded, 3);
    assert_eq!(report.downloads, 3);
    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.not_indexed, 44);
    assert_eq!(fx.source.calls(), 4);
}

#[test]
fn test_threshold_request() {
    let fx = fixture();
    let payload = fx
        .orchestrator
        .build_response(&FloodMapRequest::threshold(bonn(), 19.2))
        .unwrap();

    assert!(payload.terrain.is_none());
    let threshold = payload.threshold.as_ref().expect("custom block");
    assert_eq!(threshold.level, 19.2);
    assert_eq!(threshold.tiles.len(), 3);

    let pixels = decode_pixels(&threshold.tiles[0].raster_image);
    assert_eq!(
        pixels,
        [
            [0, 0, 255, 255],
            [255, 0, 0, 255],
            [255, 255, 0, 255],
            [0, 0, 0, 0]
        ]
    );

    // Missing sample in the third tile is transparent
    let pixels = decode_pixels(&threshold.tiles[2].raster_image);
    assert_eq!(pixels[2][3], 0);
}

#[test]
fn test_second_request_is_served_from_cache() {
    let fx = fixture();
    let request = FloodMapRequest::terrain(bonn());
    let cancel = CancelFlag::new();

    let (first, _) = fx
        .orchestrator
        .build_response_with_report(&request, &cancel)
        .unwrap();
    let calls_after_first = fx.source.calls();

    let (second, report) = fx
        .orchestrator
        .build_response_with_report(&request, &cancel)
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(report.cache_hits, 3);
    assert_eq!(report.downloads, 0);
    // Only the 404 tile is requested again
    assert_eq!(fx.source.calls(), calls_after_first + 1);
}

#[test]
fn test_corrupt_cache_file_is_skipped() {
    let fx = fixture();
    std::fs::write(fx.cache_dir().join(file_name("323625619")), b"garbage").unwrap();

    let (payload, report) = fx
        .orchestrator
        .build_response_with_report(&FloodMapRequest::terrain(bonn()), &CancelFlag::new())
        .unwrap();

    assert_eq!(report.decode_failures, 1);
    assert_eq!(tile_ids(&payload), ["323625618", "323635618"]);
    assert!(!fx.cache_dir().join(file_name("323625619")).exists());
}

#[test]
fn test_no_mode_is_configuration_error() {
    let fx = fixture();
    let request = FloodMapRequest::new(bonn(), false, false, 19.2);
    let err = fx.orchestrator.build_response(&request).unwrap_err();

    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert!(err.is_client_error());
    assert_eq!(fx.source.calls(), 0);
}

#[test]
fn test_tile_limit() {
    let fx = fixture_with(|config| config.limits.max_tiles = 10);
    let err = fx
        .orchestrator
        .build_response(&FloodMapRequest::terrain(bonn()))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert_eq!(fx.source.calls(), 0);
}

#[test]
fn test_cancelled_request() {
    let fx = fixture();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = fx
        .orchestrator
        .build_response_with_report(&FloodMapRequest::terrain(bonn()), &cancel)
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Cancelled));
    assert_eq!(fx.source.calls(), 0);
}

#[test]
fn test_continent_sized_box_is_rejected_before_enumeration() {
    let fx = fixture();
    // Roughly 9.8 million cells; enumerating them would take seconds
    let europe = GeoBoundingBox::new(35.0, -10.0, 70.0, 30.0);
    let started = std::time::Instant::now();

    let err = fx
        .orchestrator
        .build_response(&FloodMapRequest::terrain(europe))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)), "{err}");

    let err = fx.orchestrator.plan(&europe).unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)), "{err}");

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(fx.source.calls(), 0);
}

#[test]
fn test_plan_respects_tile_limit() {
    let fx = fixture_with(|config| config.limits.max_tiles = 10);
    let err = fx.orchestrator.plan(&bonn()).unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)));
}

#[test]
fn test_deadline_stops_slow_fetches() {
    let fx = fixture_with_source(FixtureSource::slow(Duration::from_millis(700)), |config| {
        config.limits.request_timeout_secs = 1;
        config.limits.workers = 1;
    });

    let err = fx
        .orchestrator
        .build_response(&FloodMapRequest::terrain(bonn()))
        .unwrap_err();

    assert!(
        matches!(err, OrchestratorError::DeadlineExceeded(d) if d == Duration::from_secs(1)),
        "{err}"
    );
    assert!(!err.is_client_error());
    // Four indexed tiles, but the deadline passes before the last fetch
    assert!(fx.source.calls() < 4, "calls = {}", fx.source.calls());
}

#[test]
fn test_cancel_while_resolving() {
    let cancel = CancelFlag::new();
    let fx = fixture_with_source(FixtureSource::cancelling(cancel.clone()), |config| {
        config.limits.workers = 1;
    });

    let err = fx
        .orchestrator
        .build_response_with_report(&FloodMapRequest::terrain(bonn()), &cancel)
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Cancelled), "{err}");
    assert_eq!(fx.source.calls(), 1);
}

#[test]
fn test_box_without_coverage() {
    let fx = fixture();
    // North Sea, far from any indexed tile
    let bbox = GeoBoundingBox::new(54.50, 6.00, 54.52, 6.03);
    let (payload, report) = fx
        .orchestrator
        .build_response_with_report(&FloodMapRequest::terrain(bbox), &CancelFlag::new())
        .unwrap();

    let terrain = payload.terrain.expect("terrain block");
    assert!(terrain.colormap.is_none());
    assert!(terrain.range.is_none());
    assert!(terrain.tiles.is_empty());
    assert_eq!(report.tiles_loaded, 0);
    assert!(report.tiles_requested > 0);

    let value = serde_json::to_value(&ResponsePayload {
        terrain: Some(terrain),
        ..payload
    })
    .unwrap();
    assert!(value["terrain"]["colormap"].is_null());
}

#[test]
fn test_invalid_bbox_is_projection_error() {
    let fx = fixture();
    let bbox = GeoBoundingBox::new(95.0, 7.05, 96.0, 7.15);
    let err = fx
        .orchestrator
        .build_response(&FloodMapRequest::terrain(bbox))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Projection(_)));
    assert!(err.is_client_error());
}

#[test]
fn test_plan_lists_tiles_without_fetching() {
    let fx = fixture();
    let plan = fx.orchestrator.plan(&bonn()).unwrap();

    assert_eq!(plan.projected, [362_000, 5_618_000, 370_000, 5_624_000]);
    assert_eq!(plan.tiles.len(), 48);
    assert_eq!(plan.tiles[0].tile_id, "323625618");
    assert_eq!(plan.tiles[0].url.as_deref(), Some(url_for("323625618").as_str()));
    assert!(!plan.tiles[0].cached);
    assert!(plan.tiles[47].url.is_none());
    assert_eq!(fx.source.calls(), 0);
}
