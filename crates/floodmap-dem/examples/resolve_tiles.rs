//! Example: Resolve the DGM1 tiles covering a bounding box.
//!
//! Usage: cargo run --example resolve_tiles -- <lat_min> <lon_min> <lat_max> <lon_max> [tile_dir]

use floodmap_dem::{
    derive_tile_ids, snap_to_grid, CoordinateTransform, GeoBoundingBox, HttpTileSource, TileCache,
    TileIndex, TileOutcome, DEFAULT_ZONE_PREFIX,
};
use std::env;
use std::sync::Arc;
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 5 {
        eprintln!("Usage: {} <lat_min> <lon_min> <lat_max> <lon_max> [tile_dir]", args[0]);
        eprintln!("Example: {} 50.70 7.05 50.75 7.15 ./dgm1_tiles", args[0]);
        std::process::exit(1);
    }

    let coords: Vec<f64> = args[1..5]
        .iter()
        .map(|s| s.parse().expect("Invalid coordinate"))
        .collect();
    let tile_dir = args.get(5).map(|s| s.as_str()).unwrap_or("dgm1_tiles");

    let bbox = GeoBoundingBox::new(coords[0], coords[1], coords[2], coords[3]);
    let transform = CoordinateTransform::utm32().expect("Failed to build UTM32 transform");
    let snapped = snap_to_grid(&transform, &bbox).expect("Bounding box cannot be projected");
    let ids = derive_tile_ids(&snapped, DEFAULT_ZONE_PREFIX);

    println!(
        "Snapped box: x {}..{}, y {}..{} ({} tiles)",
        snapped.x_min,
        snapped.x_max,
        snapped.y_min,
        snapped.y_max,
        ids.len()
    );

    let index = TileIndex::from_json_file(format!("{tile_dir}/tile_dict.json"))
        .expect("Failed to load tile index");
    let source = HttpTileSource::new().expect("Failed to build HTTP client");
    let cache = TileCache::new(Arc::new(index), tile_dir, source).expect("Failed to open cache");

    let start = Instant::now();
    for id in &ids {
        match cache.resolve(id) {
            TileOutcome::Loaded { tile, origin } => {
                let range = tile.elevation_range();
                println!("{id}: {origin:?}, {} range {range:?}", tile.crs());
            }
            TileOutcome::NotIndexed => println!("{id}: not indexed"),
            TileOutcome::FetchFailed(e) => println!("{id}: fetch failed: {e}"),
            TileOutcome::DecodeFailed(e) => println!("{id}: decode failed: {e}"),
        }
    }

    let stats = cache.stats();
    println!(
        "\nResolved {} tiles in {:.2}s: {} cached, {} downloaded ({} bytes)",
        ids.len(),
        start.elapsed().as_secs_f64(),
        stats.cache_hits,
        stats.tiles_downloaded,
        stats.bytes_downloaded
    );
}
