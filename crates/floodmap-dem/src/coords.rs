//! Conversion between the geographic system used at the API boundary and the
//! planar projected system the tile grid lives in.
//!
//! The deployment default is EPSG:4326 (WGS 84, degrees) and EPSG:25832
//! (ETRS89 / UTM zone 32N, metres), the system the DGM1 tiles are published in.
//! Axis order is always longitude/x first.

use crate::grid::{GeoBoundingBox, ProjectedBoundingBox};
use crate::ProjectionError;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// Default geographic system (WGS 84).
pub const DEFAULT_GEOGRAPHIC_EPSG: u16 = 4326;

/// Default projected system (ETRS89 / UTM zone 32N).
pub const DEFAULT_PROJECTED_EPSG: u16 = 25832;

/// Decimal places kept when reporting geographic coordinates.
const GEOGRAPHIC_DECIMALS: i32 = 6;

/// A fixed geographic ↔ projected coordinate pair.
///
/// Built once per process; conversions are pure and safe to call from
/// several threads at once.
#[derive(Debug, Clone)]
pub struct CoordinateTransform {
    geographic: Proj,
    projected: Proj,
    geographic_epsg: u16,
    projected_epsg: u16,
}

impl CoordinateTransform {
    /// Build a transform between two EPSG codes.
    ///
    /// `projected_epsg` must name a planar system measured in metres.
    pub fn new(geographic_epsg: u16, projected_epsg: u16) -> Result<Self, ProjectionError> {
        let geographic = Proj::from_epsg_code(geographic_epsg)
            .map_err(|_| ProjectionError::UnknownEpsg(geographic_epsg))?;
        let projected = Proj::from_epsg_code(projected_epsg)
            .map_err(|_| ProjectionError::UnknownEpsg(projected_epsg))?;

        Ok(Self {
            geographic,
            projected,
            geographic_epsg,
            projected_epsg,
        })
    }

    /// WGS 84 ↔ ETRS89 / UTM zone 32N.
    pub fn utm32() -> Result<Self, ProjectionError> {
        Self::new(DEFAULT_GEOGRAPHIC_EPSG, DEFAULT_PROJECTED_EPSG)
    }

    /// EPSG code of the geographic system.
    pub fn geographic_epsg(&self) -> u16 {
        self.geographic_epsg
    }

    /// EPSG code of the projected system.
    pub fn projected_epsg(&self) -> u16 {
        self.projected_epsg
    }

    /// Convert a geographic coordinate (degrees) into projected units.
    ///
    /// Returns `(x, y)`.
    pub fn to_projected(&self, lat: f64, lon: f64) -> Result<(f64, f64), ProjectionError> {
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
            return Err(ProjectionError::GeographicOutOfDomain { lat, lon });
        }

        let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
        transform(&self.geographic, &self.projected, &mut point)
            .map_err(|e| ProjectionError::Proj(format!("{e:?}")))?;

        if !point.0.is_finite() || !point.1.is_finite() {
            return Err(ProjectionError::NonFinite(lon, lat));
        }
        Ok((point.0, point.1))
    }

    /// Convert a projected coordinate back to geographic degrees.
    ///
    /// Returns `(lon, lat)` rounded to six decimal places.
    pub fn to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::ProjectedOutOfDomain { x, y });
        }

        let mut point = (x, y, 0.0);
        transform(&self.projected, &self.geographic, &mut point)
            .map_err(|e| ProjectionError::Proj(format!("{e:?}")))?;

        let lon = point.0.to_degrees();
        let lat = point.1.to_degrees();
        if !lon.is_finite() || !lat.is_finite() {
            return Err(ProjectionError::NonFinite(x, y));
        }
        Ok((round_decimals(lon), round_decimals(lat)))
    }

    /// Convert the lower-left and upper-right corners of a projected box.
    pub fn to_geographic_box(
        &self,
        bbox: &ProjectedBoundingBox,
    ) -> Result<GeoBoundingBox, ProjectionError> {
        let (lon_min, lat_min) = self.to_geographic(bbox.x_min as f64, bbox.y_min as f64)?;
        let (lon_max, lat_max) = self.to_geographic(bbox.x_max as f64, bbox.y_max as f64)?;
        Ok(GeoBoundingBox {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        })
    }
}

fn round_decimals(value: f64) -> f64 {
    let scale = 10f64.powi(GEOGRAPHIC_DECIMALS);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_central_meridian_maps_to_false_easting() {
        let t = CoordinateTransform::utm32().unwrap();
        let (x, y) = t.to_projected(0.0, 9.0).unwrap();
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 0.01);
        assert_abs_diff_eq!(y, 0.0, epsilon = 0.01);

        let (x, _) = t.to_projected(50.73, 9.0).unwrap();
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 0.01);
    }

    #[test]
    fn test_bonn() {
        let t = CoordinateTransform::utm32().unwrap();
        let (x, y) = t.to_projected(50.70, 7.05).unwrap();
        assert_abs_diff_eq!(x, 362_294.03, epsilon = 1.0);
        assert_abs_diff_eq!(y, 5_618_278.30, epsilon = 1.0);
    }

    #[test]
    fn test_roundtrip_is_rounded_to_six_decimals() {
        let t = CoordinateTransform::utm32().unwrap();
        let (x, y) = t.to_projected(51.512345, 7.465432).unwrap();
        let (lon, lat) = t.to_geographic(x, y).unwrap();
        assert_abs_diff_eq!(lon, 7.465432, epsilon = 1e-6);
        assert_abs_diff_eq!(lat, 51.512345, epsilon = 1e-6);
        assert_eq!(lon, (lon * 1e6).round() / 1e6);
        assert_eq!(lat, (lat * 1e6).round() / 1e6);
    }

    #[test]
    fn test_out_of_domain_input() {
        let t = CoordinateTransform::utm32().unwrap();
        assert!(matches!(
            t.to_projected(91.0, 7.0),
            Err(ProjectionError::GeographicOutOfDomain { .. })
        ));
        assert!(matches!(
            t.to_projected(50.0, f64::NAN),
            Err(ProjectionError::GeographicOutOfDomain { .. })
        ));
        assert!(matches!(
            t.to_geographic(f64::INFINITY, 0.0),
            Err(ProjectionError::ProjectedOutOfDomain { .. })
        ));
    }
}
