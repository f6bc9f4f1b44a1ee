use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Unix timestamp of the ATLAS standard data product epoch (2018-01-01T00:00:00Z)
pub const ATLAS_SDP_EPOCH_UNIX: i64 = 1_514_764_800;

/// Coordinate reference system of a point set or grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// Geographic WGS84 longitude/latitude (EPSG:4326)
    Wgs84,
    /// WGS84 / UTM zone (EPSG:326xx north, 327xx south)
    Utm { zone: u8, north: bool },
}

impl Crs {
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Utm { zone, north: true } => 32600 + *zone as u32,
            Crs::Utm { zone, north: false } => 32700 + *zone as u32,
        }
    }

    pub fn from_epsg(epsg: u32) -> BathyResult<Self> {
        match epsg {
            4326 => Ok(Crs::Wgs84),
            32601..=32660 => Ok(Crs::Utm { zone: (epsg - 32600) as u8, north: true }),
            32701..=32760 => Ok(Crs::Utm { zone: (epsg - 32700) as u8, north: false }),
            _ => Err(BathyError::InvalidInput(format!("Unsupported EPSG code: {}", epsg))),
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// ICESat-2 ground track (beam) identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Beam {
    Gt1l,
    Gt1r,
    Gt2l,
    Gt2r,
    Gt3l,
    Gt3r,
}

impl Beam {
    pub const ALL: [Beam; 6] = [Beam::Gt1l, Beam::Gt1r, Beam::Gt2l, Beam::Gt2r, Beam::Gt3l, Beam::Gt3r];
}

impl std::fmt::Display for Beam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Beam::Gt1l => write!(f, "gt1l"),
            Beam::Gt1r => write!(f, "gt1r"),
            Beam::Gt2l => write!(f, "gt2l"),
            Beam::Gt2r => write!(f, "gt2r"),
            Beam::Gt3l => write!(f, "gt3l"),
            Beam::Gt3r => write!(f, "gt3r"),
        }
    }
}

impl FromStr for Beam {
    type Err = BathyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gt1l" => Ok(Beam::Gt1l),
            "gt1r" => Ok(Beam::Gt1r),
            "gt2l" => Ok(Beam::Gt2l),
            "gt2r" => Ok(Beam::Gt2r),
            "gt3l" => Ok(Beam::Gt3l),
            "gt3r" => Ok(Beam::Gt3r),
            _ => Err(BathyError::InvalidInput(format!("Invalid beam: {}", s))),
        }
    }
}

/// ATLAS beam energy class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeamStrength {
    Strong,
    Weak,
}

/// One lidar photon return, as decoded from a granule/beam
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhotonRecord {
    /// Longitude (degrees)
    pub x: f64,
    /// Latitude (degrees)
    pub y: f64,
    /// Height above the WGS84 ellipsoid (m)
    pub z_ellip: f64,
    /// Height after geoid, tide and free-to-mean corrections (m)
    pub z_geoid: f64,
    pub geoid_corr: f64,
    pub tide_ocean_corr: f64,
    pub geof2m_corr: f64,
    /// Seconds since the ATLAS SDP epoch
    pub delta_time: f64,
    /// Ocean signal confidence (-2..=4)
    pub oc_sig_conf: i8,
    /// Land signal confidence (-2..=4)
    pub land_sig_conf: i8,
    /// Pointing vector azimuth (radians)
    pub p_vec_az: f64,
    /// Pointing vector elevation (radians)
    pub p_vec_elev: f64,
    /// Dynamic atmospheric correction (m)
    pub dac_corr: f64,
    /// Photon count of the parent 20 m segment
    pub ph_count: i32,
}

impl PhotonRecord {
    /// Acquisition time as a UTC timestamp
    pub fn acquisition_time(&self) -> Option<DateTime<Utc>> {
        if !self.delta_time.is_finite() {
            return None;
        }
        let secs = self.delta_time.floor();
        let nanos = ((self.delta_time - secs) * 1e9).round() as u32;
        Utc.timestamp_opt(ATLAS_SDP_EPOCH_UNIX + secs as i64, nanos.min(999_999_999))
            .single()
    }
}

/// Beam-level metadata carried alongside a beam's photons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamMetadata {
    pub granule_id: String,
    pub beam: Beam,
    pub atmosphere_profile: String,
    pub beam_type: BeamStrength,
    /// Percentage of high-confidence ocean photons in the beam
    pub ocean_high_conf_perc: f64,
    pub data_start_utc: Option<DateTime<Utc>>,
}

/// Seafloor estimate for one accepted KDE window.
///
/// Undefined values are written to JSON as `null` and read back as NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BathymetryPoint {
    /// Elevation at maximum kernel density (m, geoid referenced)
    pub z_kde: f64,
    /// Kernel density at `z_kde`
    pub kde_val: f64,
    /// Seafloor elevation relative to the local sea surface (m)
    #[serde(deserialize_with = "nan_from_null")]
    pub sf_elev_msl: f64,
    /// Refraction-corrected UTM easting (m)
    #[serde(deserialize_with = "nan_from_null")]
    pub easting: f64,
    /// Refraction-corrected UTM northing (m)
    #[serde(deserialize_with = "nan_from_null")]
    pub northing: f64,
    pub easting_raw: f64,
    pub northing_raw: f64,
    /// CRS of the easting/northing fields
    pub crs: Crs,
    pub lon: f64,
    pub lat: f64,
    pub dist_or: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub sea_level_interp: f64,
    pub ph_count: i32,
    #[serde(deserialize_with = "nan_from_null")]
    pub delta_time: f64,
    pub granule_id: String,
    pub beam: Beam,
    pub atm_profile: String,
    pub beam_type: BeamStrength,
    #[serde(deserialize_with = "nan_from_null")]
    pub oc_hconf_perc: f64,
}

fn nan_from_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform from the top-left corner and a square resolution
    pub fn north_up(top_left_x: f64, top_left_y: f64, resolution: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: resolution,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -resolution,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of a cell centre
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (col, row) pixel coordinates of a map position (rotation ignored)
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }
}

/// Grid template: extent, resolution and CRS shared by co-registered rasters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub crs: Crs,
}

impl GridSpec {
    /// North-up grid covering `[min_x, max_x] x [min_y, max_y]` at `resolution`
    pub fn covering(
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
        resolution: f64,
        crs: Crs,
    ) -> BathyResult<Self> {
        if !(resolution > 0.0) || !(max_x >= min_x) || !(max_y >= min_y) {
            return Err(BathyError::InvalidInput(format!(
                "Invalid grid bounds ({}, {}, {}, {}) at resolution {}",
                min_x, min_y, max_x, max_y, resolution
            )));
        }
        let width = (((max_x - min_x) / resolution).ceil() as usize).max(1);
        let height = (((max_y - min_y) / resolution).ceil() as usize).max(1);
        Ok(Self {
            transform: GeoTransform::north_up(min_x, max_y, resolution),
            width,
            height,
            crs,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Cell-centre x coordinates, one per column
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.width).map(|c| self.transform.cell_center(0, c).0).collect()
    }

    /// Cell-centre y coordinates, one per row
    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.height).map(|r| self.transform.cell_center(r, 0).1).collect()
    }
}

/// Error types for bathymetry processing
#[derive(Debug, thiserror::Error)]
pub enum BathyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Beam {beam} not present in granule {granule}")]
    MissingBeam { granule: String, beam: Beam },

    #[error("Configuration error in stage '{stage}': {message}")]
    Configuration { stage: String, message: String },

    #[error("CRS mismatch: points are in {points}, template grid is in {template}")]
    CrsMismatch { points: Crs, template: Crs },

    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    #[error("Granule {granule} exceeded its processing time limit of {limit:?}")]
    Timeout { granule: String, limit: Duration },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("GDAL error: {0}")]
    Gdal(String),
}

#[cfg(feature = "gdal")]
impl From<gdal::errors::GdalError> for BathyError {
    fn from(err: gdal::errors::GdalError) -> Self {
        BathyError::Gdal(err.to_string())
    }
}

impl BathyError {
    pub fn configuration(stage: &str, message: impl Into<String>) -> Self {
        BathyError::Configuration {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Errors that abort a whole run rather than a single beam or granule
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BathyError::Configuration { .. } | BathyError::CrsMismatch { .. }
        )
    }
}

/// Result type for bathymetry operations
pub type BathyResult<T> = Result<T, BathyError>;
