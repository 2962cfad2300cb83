//! Tile addressing on the 1 km grid of the projected system.
//!
//! A tile covers a `TILE_SIZE` x `TILE_SIZE` cell whose lower-left corner is a
//! multiple of `TILE_SIZE`. Its identifier is the zone prefix followed by the
//! corner coordinates in kilometres, e.g. `32` + `362` + `5618` = `323625618`.

use crate::{CoordinateTransform, ProjectionError};
use std::fmt;

/// Side length of a tile in projected units (metres).
pub const TILE_SIZE: i64 = 1000;

/// Default zone prefix for UTM zone 32 tile identifiers.
pub const DEFAULT_ZONE_PREFIX: &str = "32";

/// Geographic bounding box in degrees.
///
/// `lat_min <= lat_max` and `lon_min <= lon_max` are expected but not checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBoundingBox {
    /// Southern edge.
    pub lat_min: f64,
    /// Western edge.
    pub lon_min: f64,
    /// Northern edge.
    pub lat_max: f64,
    /// Eastern edge.
    pub lon_max: f64,
}

impl GeoBoundingBox {
    /// Create a box from its four edges.
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        }
    }

    /// Whether `other` lies entirely inside this box (edges inclusive).
    pub fn contains(&self, other: &GeoBoundingBox) -> bool {
        self.lat_min <= other.lat_min
            && self.lon_min <= other.lon_min
            && self.lat_max >= other.lat_max
            && self.lon_max >= other.lon_max
    }

    /// Edges as `[lon_min, lat_min, lon_max, lat_max]`.
    pub fn to_lon_lat_array(&self) -> [f64; 4] {
        [self.lon_min, self.lat_min, self.lon_max, self.lat_max]
    }
}

/// Grid-aligned box in projected units.
///
/// Produced by [`snap_to_grid`], so every edge is a multiple of [`TILE_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectedBoundingBox {
    /// Western edge (rounded down).
    pub x_min: i64,
    /// Southern edge (rounded down).
    pub y_min: i64,
    /// Eastern edge (rounded up).
    pub x_max: i64,
    /// Northern edge (rounded up).
    pub y_max: i64,
}

impl ProjectedBoundingBox {
    /// Number of grid cells spanned in x and y.
    pub fn cell_span(&self) -> (i64, i64) {
        let nx = self.x_max.div_euclid(TILE_SIZE) - self.x_min.div_euclid(TILE_SIZE);
        let ny = self.y_max.div_euclid(TILE_SIZE) - self.y_min.div_euclid(TILE_SIZE);
        (nx.max(0), ny.max(0))
    }

    /// Number of tiles [`derive_tile_ids`] will produce for this box.
    pub fn tile_count(&self) -> usize {
        let (nx, ny) = self.cell_span();
        usize::try_from(nx.saturating_mul(ny)).unwrap_or(usize::MAX)
    }
}

/// Identifier of one grid cell, the join key into the tile index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(String);

impl TileId {
    /// Identifier of the cell whose lower-left corner is `(x_km, y_km)` kilometres.
    pub fn from_cell(zone_prefix: &str, x_km: i64, y_km: i64) -> Self {
        TileId(format!("{zone_prefix}{x_km}{y_km}"))
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TileId {
    fn from(value: String) -> Self {
        TileId(value)
    }
}

impl From<&str> for TileId {
    fn from(value: &str) -> Self {
        TileId(value.to_string())
    }
}

impl AsRef<str> for TileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn round_down(value: f64) -> i64 {
    (value / TILE_SIZE as f64).floor() as i64 * TILE_SIZE
}

fn round_up(value: f64) -> i64 {
    (value / TILE_SIZE as f64).ceil() as i64 * TILE_SIZE
}

/// Project both corners of `bbox` and snap them outwards to the tile grid.
///
/// The result is a superset of the box's projected footprint.
pub fn snap_to_grid(
    transform: &CoordinateTransform,
    bbox: &GeoBoundingBox,
) -> Result<ProjectedBoundingBox, ProjectionError> {
    let (x_min, y_min) = transform.to_projected(bbox.lat_min, bbox.lon_min)?;
    let (x_max, y_max) = transform.to_projected(bbox.lat_max, bbox.lon_max)?;

    Ok(ProjectedBoundingBox {
        x_min: round_down(x_min),
        y_min: round_down(y_min),
        x_max: round_up(x_max),
        y_max: round_up(y_max),
    })
}

/// Enumerate the tiles inside a snapped box.
///
/// Upper bounds are exclusive, so a box lying exactly on a grid line does not
/// pull in the cell beyond it. Order is x-major, then y.
pub fn derive_tile_ids(bbox: &ProjectedBoundingBox, zone_prefix: &str) -> Vec<TileId> {
    let x_range = bbox.x_min.div_euclid(TILE_SIZE)..bbox.x_max.div_euclid(TILE_SIZE);
    let y_range = bbox.y_min.div_euclid(TILE_SIZE)..bbox.y_max.div_euclid(TILE_SIZE);

    let mut ids = Vec::with_capacity(bbox.tile_count());
    for x in x_range {
        for y in y_range.clone() {
            ids.push(TileId::from_cell(zone_prefix, x, y));
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_box() -> GeoBoundingBox {
        GeoBoundingBox::new(50.70, 7.05, 50.75, 7.15)
    }

    #[test]
    fn test_snap_scenario_box() {
        let t = CoordinateTransform::utm32().unwrap();
        let snapped = snap_to_grid(&t, &scenario_box()).unwrap();
        assert_eq!(
            snapped,
            ProjectedBoundingBox {
                x_min: 362_000,
                y_min: 5_618_000,
                x_max: 370_000,
                y_max: 5_624_000,
            }
        );
        assert_eq!(snapped.cell_span(), (8, 6));
    }

    #[test]
    fn test_effective_box_contains_request() {
        let t = CoordinateTransform::utm32().unwrap();
        let boxes = [
            scenario_box(),
            GeoBoundingBox::new(52.37, 9.73, 52.40, 9.78), // Hannover
            GeoBoundingBox::new(50.92, 6.93, 50.95, 6.98), // Cologne
            GeoBoundingBox::new(51.95, 7.60, 51.97, 7.65), // Münster
        ];

        for requested in boxes {
            let snapped = snap_to_grid(&t, &requested).unwrap();
            let effective = t.to_geographic_box(&snapped).unwrap();
            assert!(
                effective.contains(&requested),
                "{effective:?} does not contain {requested:?}"
            );
        }
    }

    #[test]
    fn test_derive_tile_ids_order_and_format() {
        let bbox = ProjectedBoundingBox {
            x_min: 362_000,
            y_min: 5_618_000,
            x_max: 364_000,
            y_max: 5_620_000,
        };
        let ids = derive_tile_ids(&bbox, "32");
        let ids: Vec<&str> = ids.iter().map(TileId::as_str).collect();
        assert_eq!(ids, ["323625618", "323625619", "323635618", "323635619"]);
    }

    #[test]
    fn test_tile_count_matches_span() {
        let t = CoordinateTransform::utm32().unwrap();
        let snapped = snap_to_grid(&t, &scenario_box()).unwrap();
        let ids = derive_tile_ids(&snapped, DEFAULT_ZONE_PREFIX);
        assert_eq!(ids.len(), 48);
        assert_eq!(ids.len(), snapped.tile_count());
        assert_eq!(ids[0].as_str(), "323625618");
        assert_eq!(ids[47].as_str(), "323695623");
    }

    #[test]
    fn test_tile_count_of_large_box_without_enumerating() {
        let t = CoordinateTransform::utm32().unwrap();
        let europe = GeoBoundingBox::new(35.0, -10.0, 70.0, 30.0);
        let snapped = snap_to_grid(&t, &europe).unwrap();
        let (nx, ny) = snapped.cell_span();
        assert!(nx > 2000 && ny > 3000, "{nx} x {ny}");
        assert_eq!(snapped.tile_count(), (nx * ny) as usize);
    }

    #[test]
    fn test_degenerate_box_yields_no_tiles() {
        let flat = ProjectedBoundingBox {
            x_min: 362_000,
            y_min: 5_618_000,
            x_max: 362_000,
            y_max: 5_620_000,
        };
        assert_eq!(flat.cell_span(), (0, 2));
        assert!(derive_tile_ids(&flat, "32").is_empty());
    }

    #[test]
    fn test_snapping_is_floor_for_negative_values() {
        assert_eq!(round_down(-1.0), -1000);
        assert_eq!(round_up(-1.0), 0);
        assert_eq!(round_down(1000.0), 1000);
        assert_eq!(round_up(1000.0), 1000);
    }
}
