//! Single DEM tile decoded from a GeoTIFF file.

use crate::{DemError, Result, TileId};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;
use tiff::tags::Tag;

/// GeoKey holding the EPSG code of a projected CRS.
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
/// GeoKey holding the EPSG code of a geographic CRS.
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
/// GeoKey value meaning "user defined", i.e. not an EPSG code.
const USER_DEFINED: u16 = 32767;

/// DGM1 tiles cover one square kilometre.
const DGM1_TILE_SIZE_M: f64 = 1000.0;

/// Bounds of a raster in its native CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterBounds {
    /// Western edge.
    pub left: f64,
    /// Southern edge.
    pub bottom: f64,
    /// Eastern edge.
    pub right: f64,
    /// Northern edge.
    pub top: f64,
}

impl RasterBounds {
    /// Bounds as `[left, bottom, right, top]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.left, self.bottom, self.right, self.top]
    }
}

/// A DEM tile loaded from a GeoTIFF file.
///
/// DGM1 tiles are 1000 x 1000 samples at 1 m spacing. Samples equal to the
/// file's no-data value are stored as NaN.
#[derive(Debug, Clone)]
pub struct RasterTile {
    /// Tile this raster was resolved for.
    id: TileId,
    /// Elevation data in row-major order (north to south, west to east).
    data: Vec<f32>,
    /// Width of the tile in pixels.
    width: u32,
    /// Height of the tile in pixels.
    height: u32,
    /// Bounds in the native CRS.
    bounds: RasterBounds,
    /// Native CRS, e.g. `EPSG:25832`.
    crs: String,
}

impl RasterTile {
    /// Load a tile from a GeoTIFF file.
    ///
    /// `fallback_epsg` is reported as the CRS when the file carries no EPSG GeoKey.
    pub fn from_file<P: AsRef<Path>>(path: P, id: TileId, fallback_epsg: u16) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_name = path.file_name().and_then(|s| s.to_str());
        Self::decode(BufReader::new(file), id, fallback_epsg, file_name)
    }

    /// Decode a tile from any seekable reader.
    pub fn from_reader<R: Read + Seek>(reader: R, id: TileId, fallback_epsg: u16) -> Result<Self> {
        Self::decode(reader, id, fallback_epsg, None)
    }

    /// Assemble a tile from already decoded samples.
    pub fn from_parts(
        id: TileId,
        data: Vec<f32>,
        width: u32,
        height: u32,
        bounds: RasterBounds,
        crs: impl Into<String>,
    ) -> Result<Self> {
        if data.len() != width as usize * height as usize {
            return Err(DemError::SampleCountMismatch {
                width,
                height,
                actual: data.len(),
            });
        }
        Ok(Self {
            id,
            data,
            width,
            height,
            bounds,
            crs: crs.into(),
        })
    }

    fn decode<R: Read + Seek>(
        reader: R,
        id: TileId,
        fallback_epsg: u16,
        file_name: Option<&str>,
    ) -> Result<Self> {
        let mut decoder = Decoder::new(reader)?;
        let (width, height) = decoder.dimensions()?;
        match decoder.colortype()? {
            ColorType::Gray(_) | ColorType::GrayA(_) | ColorType::RGB(_) | ColorType::RGBA(_) => {}
            other => return Err(DemError::UnsupportedDataType(format!("{other:?}"))),
        }

        let bounds = Self::read_bounds(&mut decoder, width, height, file_name)?;
        let crs = Self::read_crs(&mut decoder).unwrap_or(fallback_epsg);
        let no_data_value = Self::read_nodata_value(&mut decoder);
        let samples_per_pixel = decoder
            .get_tag_u32(Tag::SamplesPerPixel)
            .unwrap_or(1)
            .max(1) as usize;

        let mut data = Self::decode_elevation_data(&mut decoder)?;

        // Keep band 1 only.
        if samples_per_pixel > 1 {
            data = data.into_iter().step_by(samples_per_pixel).collect();
        }

        if let Some(nodata) = no_data_value {
            for value in data.iter_mut() {
                if (*value - nodata).abs() < 0.001 {
                    *value = f32::NAN;
                }
            }
        }

        Self::from_parts(id, data, width, height, bounds, format!("EPSG:{crs}"))
    }

    /// Read the raster bounds from GeoTIFF tags, falling back to the file name.
    fn read_bounds<R: Read + Seek>(
        decoder: &mut Decoder<R>,
        width: u32,
        height: u32,
        file_name: Option<&str>,
    ) -> Result<RasterBounds> {
        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
        let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

        if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
            if tiepoint.len() >= 6 && scale.len() >= 2 {
                // Tiepoint format: [i, j, k, x, y, z] ties pixel (i, j) to model (x, y)
                let left = tiepoint[3] - tiepoint[0] * scale[0];
                let top = tiepoint[4] + tiepoint[1] * scale[1];
                return Ok(RasterBounds {
                    left,
                    bottom: top - height as f64 * scale[1],
                    right: left + width as f64 * scale[0],
                    top,
                });
            }
        }

        if let Ok(m) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
            // Row-major 4x4 affine; only axis-aligned rasters are supported
            if m.len() >= 16 && m[1] == 0.0 && m[4] == 0.0 {
                let (x0, x1) = (m[3], m[3] + m[0] * width as f64);
                let (y0, y1) = (m[7], m[7] + m[5] * height as f64);
                return Ok(RasterBounds {
                    left: x0.min(x1),
                    bottom: y0.min(y1),
                    right: x0.max(x1),
                    top: y0.max(y1),
                });
            }
        }

        file_name
            .and_then(Self::bounds_from_filename)
            .ok_or_else(|| {
                DemError::InvalidGeoTiff(format!(
                    "no georeferencing tags in {}",
                    file_name.unwrap_or("<memory>")
                ))
            })
    }

    /// Parse bounds from a DGM1 filename like `dgm1_32_362_5618_1_nw_2021.tif`.
    ///
    /// The easting and northing fields are the lower-left corner in kilometres.
    fn bounds_from_filename(filename: &str) -> Option<RasterBounds> {
        let stem = filename.strip_suffix(".tif")?;
        let mut parts = stem.split('_');

        if parts.next()? != "dgm1" {
            return None;
        }
        let zone = parts.next()?;
        let easting = parts.next()?;
        let northing = parts.next()?;
        if zone.len() != 2 || easting.len() != 3 || northing.len() != 4 {
            return None;
        }

        let left = easting.parse::<f64>().ok()? * DGM1_TILE_SIZE_M;
        let bottom = northing.parse::<f64>().ok()? * DGM1_TILE_SIZE_M;
        Some(RasterBounds {
            left,
            bottom,
            right: left + DGM1_TILE_SIZE_M,
            top: bottom + DGM1_TILE_SIZE_M,
        })
    }

    /// Read the EPSG code from the GeoKeyDirectory.
    fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u16> {
        let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).ok()?;
        parse_geo_key_epsg(&keys)
    }

    /// Decode elevation data from the TIFF decoder.
    fn decode_elevation_data<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>> {
        let result = decoder.read_image()?;

        match result {
            DecodingResult::F32(data) => Ok(data),
            DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        }
    }

    /// Try to read the no-data value from the GDAL_NODATA tag.
    fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
        let text = decoder.get_tag_ascii_string(Tag::GdalNodata).ok()?;
        text.trim_matches(char::from(0)).trim().parse().ok()
    }

    /// Tile identifier.
    pub fn id(&self) -> &TileId {
        &self.id
    }

    /// Elevation samples, row-major from the north-west corner.
    pub fn elevations(&self) -> &[f32] {
        &self.data
    }

    /// Get the dimensions of this tile in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bounds in the native CRS.
    pub fn bounds(&self) -> RasterBounds {
        self.bounds
    }

    /// Native CRS identifier.
    pub fn crs(&self) -> &str {
        &self.crs
    }

    /// Sample at pixel `(col, row)`; NaN marks missing data.
    pub fn get(&self, col: u32, row: u32) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.data.get((row * self.width + col) as usize).copied()
    }

    /// Minimum and maximum over the finite samples, or `None` if there are none.
    pub fn elevation_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Find the EPSG code in a raw GeoKeyDirectory.
///
/// The directory is a header `[version, revision, minor, count]` followed by
/// `count` entries of `[key id, tag location, count, value]`. Only inline
/// values (tag location 0) can carry an EPSG code. A projected CRS wins over a
/// geographic one.
fn parse_geo_key_epsg(keys: &[u16]) -> Option<u16> {
    let count = *keys.get(3)? as usize;
    let mut geographic = None;

    for entry in keys[4..].chunks_exact(4).take(count) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == 0 || value == USER_DEFINED {
            continue;
        }
        match key_id {
            PROJECTED_CS_TYPE_GEO_KEY => return Some(value),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(value),
            _ => {}
        }
    }

    geographic
}
