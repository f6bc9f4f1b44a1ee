use crate::core::projection::UtmProjection;
use crate::io::photon_source::BeamPhotons;
use crate::types::{BathyError, BathyResult, Crs, PhotonRecord};
use std::collections::BTreeSet;
use std::ops::Range;

/// Derived columns a pipeline stage may attach to a photon table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    /// `gebco_elev`
    GebcoElev,
    /// `sea_level_interp` and `sea_level_std_dev`
    SeaLevel,
    /// `z_refr`, `easting_corr` and `northing_corr`
    Refraction,
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Column::GebcoElev => write!(f, "gebco_elev"),
            Column::SeaLevel => write!(f, "sea_level_interp"),
            Column::Refraction => write!(f, "z_refr"),
        }
    }
}

/// One photon with its projected position and any attached derived values.
///
/// Derived values stay NaN until the corresponding [`Column`] is attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonRow {
    pub photon: PhotonRecord,
    /// Along-track distance from the beam's first photon (m)
    pub dist_or: f64,
    pub easting: f64,
    pub northing: f64,
    pub gebco_elev: f64,
    pub sea_level_interp: f64,
    pub sea_level_std_dev: f64,
    /// Refraction-corrected elevation (m)
    pub z_refr: f64,
    pub easting_corr: f64,
    pub northing_corr: f64,
}

impl PhotonRow {
    pub fn new(photon: PhotonRecord, easting: f64, northing: f64, dist_or: f64) -> Self {
        Self {
            photon,
            dist_or,
            easting,
            northing,
            gebco_elev: f64::NAN,
            sea_level_interp: f64::NAN,
            sea_level_std_dev: f64::NAN,
            z_refr: f64::NAN,
            easting_corr: f64::NAN,
            northing_corr: f64::NAN,
        }
    }

    /// Geoid-referenced depth below the local sea surface (positive downwards)
    pub fn depth(&self) -> f64 {
        self.sea_level_interp - self.photon.z_geoid
    }
}

/// Photons of one beam in along-track order, narrowed by the filter stages
#[derive(Debug, Clone, PartialEq)]
pub struct PhotonTable {
    rows: Vec<PhotonRow>,
    crs: Crs,
    columns: BTreeSet<Column>,
}

impl PhotonTable {
    pub fn empty(crs: Crs) -> Self {
        Self::from_rows(Vec::new(), crs)
    }

    /// Table over pre-projected rows, with no derived columns attached
    pub fn from_rows(mut rows: Vec<PhotonRow>, crs: Crs) -> Self {
        rows.sort_by(|a, b| a.dist_or.total_cmp(&b.dist_or));
        Self {
            rows,
            crs,
            columns: BTreeSet::new(),
        }
    }

    /// Project a beam to its UTM zone and order photons by along-track distance
    pub fn from_beam(beam: &BeamPhotons) -> BathyResult<Self> {
        let photons = beam.photons();
        if photons.is_empty() {
            return Ok(Self::empty(Crs::Wgs84));
        }

        let lonlat: Vec<(f64, f64)> = photons.iter().map(|p| (p.x, p.y)).collect();
        let projection = UtmProjection::estimate(&lonlat)?;
        let projected: Vec<(f64, f64)> = lonlat
            .iter()
            .map(|&(lon, lat)| projection.forward(lon, lat))
            .collect();

        let (x0, y0) = projected[0];
        let rows = photons
            .iter()
            .zip(&projected)
            .map(|(photon, &(e, n))| {
                let dist = ((e - x0).powi(2) + (n - y0).powi(2)).sqrt();
                PhotonRow::new(*photon, e, n, dist)
            })
            .collect();

        log::debug!(
            "{}/{}: {} photons projected to {}",
            beam.metadata().granule_id,
            beam.metadata().beam,
            photons.len(),
            projection.crs()
        );
        Ok(Self::from_rows(rows, projection.crs()))
    }

    pub fn rows(&self) -> &[PhotonRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    /// Fail with a configuration error naming `stage` when `column` is not attached
    pub fn require_column(&self, column: Column, stage: &str) -> BathyResult<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(BathyError::configuration(
                stage,
                format!("column '{}' has not been attached", column),
            ))
        }
    }

    /// Keep only rows satisfying `keep`
    pub fn filter<F>(mut self, keep: F) -> Self
    where
        F: Fn(&PhotonRow) -> bool,
    {
        self.rows.retain(|row| keep(row));
        self
    }

    /// Fill a derived column row by row and mark it attached
    pub fn with_column<F>(mut self, column: Column, mut fill: F) -> Self
    where
        F: FnMut(usize, &mut PhotonRow),
    {
        for (i, row) in self.rows.iter_mut().enumerate() {
            fill(i, row);
        }
        self.columns.insert(column);
        self
    }

    pub fn lonlat(&self) -> Vec<(f64, f64)> {
        self.rows.iter().map(|r| (r.photon.x, r.photon.y)).collect()
    }

    pub fn dist_or(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.dist_or).collect()
    }

    pub fn is_sorted_by_distance(&self) -> bool {
        self.rows.windows(2).all(|w| w[0].dist_or <= w[1].dist_or)
    }

    pub fn into_rows(self) -> Vec<PhotonRow> {
        self.rows
    }
}

/// Index range of the centred window of `window` points around `index`,
/// `None` when the window runs past either end of `len` items.
pub(crate) fn centered_span(index: usize, window: usize, len: usize) -> Option<Range<usize>> {
    if window == 0 {
        return None;
    }
    let start = index.checked_sub(window / 2)?;
    let end = start + window;
    if end > len {
        return None;
    }
    Some(start..end)
}

/// For each photon, the number of photons in its centred `window_pts` window whose
/// along-track distance lies strictly within `window_meters / 2` of it.
/// Incomplete edge windows give NaN.
pub fn neighbor_counts(table: &PhotonTable, window_pts: usize, window_meters: f64) -> Vec<f64> {
    let rows = table.rows();
    let half = window_meters / 2.0;
    (0..rows.len())
        .map(|i| match centered_span(i, window_pts, rows.len()) {
            Some(span) => {
                let centre = rows[i].dist_or;
                rows[span]
                    .iter()
                    .filter(|r| r.dist_or > centre - half && r.dist_or < centre + half)
                    .count() as f64
            }
            None => f64::NAN,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Beam, BeamMetadata, BeamStrength};

    fn record(lat: f64, t: f64) -> PhotonRecord {
        PhotonRecord {
            x: -80.5,
            y: lat,
            z_ellip: -30.0,
            z_geoid: -5.0,
            geoid_corr: -25.0,
            tide_ocean_corr: 0.0,
            geof2m_corr: 0.0,
            delta_time: t,
            oc_sig_conf: 2,
            land_sig_conf: 0,
            p_vec_az: 0.0,
            p_vec_elev: std::f64::consts::FRAC_PI_2,
            dac_corr: 0.0,
            ph_count: 20,
        }
    }

    fn beam(records: Vec<PhotonRecord>) -> BeamPhotons {
        let metadata = BeamMetadata {
            granule_id: "g".to_string(),
            beam: Beam::Gt1r,
            atmosphere_profile: "2".to_string(),
            beam_type: BeamStrength::Strong,
            ocean_high_conf_perc: 50.0,
            data_start_utc: None,
        };
        BeamPhotons::new(metadata, records).unwrap()
    }

    fn row(dist: f64) -> PhotonRow {
        PhotonRow::new(record(24.7, 0.0), 0.0, dist, dist)
    }

    #[test]
    fn test_from_beam_projects_and_measures_distance() {
        // descending track: first photon is the northernmost
        let table = PhotonTable::from_beam(&beam(vec![
            record(24.72, 1.0),
            record(24.71, 2.0),
            record(24.70, 3.0),
        ]))
        .unwrap();

        assert_eq!(table.crs(), Crs::Utm { zone: 17, north: true });
        assert!(table.is_sorted_by_distance());
        assert_eq!(table.rows()[0].dist_or, 0.0);
        assert_eq!(table.rows()[0].photon.delta_time, 1.0);
        // 0.01 degree of latitude is about 1107 m here
        let d = table.rows()[2].dist_or;
        assert!(d > 2200.0 && d < 2230.0, "distance {}", d);
        assert!(table.rows()[0].gebco_elev.is_nan());
    }

    #[test]
    fn test_empty_beam_gives_empty_table() {
        let table = PhotonTable::from_beam(&beam(vec![])).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_require_column() {
        let table = PhotonTable::from_rows(vec![row(0.0)], Crs::Wgs84);
        let err = table.require_column(Column::GebcoElev, "nearshore").unwrap_err();
        match err {
            BathyError::Configuration { stage, message } => {
                assert_eq!(stage, "nearshore");
                assert!(message.contains("gebco_elev"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        let table = table.with_column(Column::GebcoElev, |_, r| r.gebco_elev = -3.0);
        assert!(table.require_column(Column::GebcoElev, "nearshore").is_ok());
        assert_eq!(table.rows()[0].gebco_elev, -3.0);
    }

    #[test]
    fn test_centered_span() {
        assert_eq!(centered_span(2, 4, 10), Some(0..4));
        assert_eq!(centered_span(1, 4, 10), None);
        assert_eq!(centered_span(8, 4, 10), None);
        assert_eq!(centered_span(7, 4, 10), Some(5..9));
        assert_eq!(centered_span(1, 3, 3), Some(0..3));
    }

    #[test]
    fn test_neighbor_counts() {
        let rows = vec![row(0.0), row(1.0), row(2.0), row(10.0), row(11.0)];
        let table = PhotonTable::from_rows(rows, Crs::Wgs84);
        let counts = neighbor_counts(&table, 3, 4.0);
        assert!(counts[0].is_nan());
        assert_eq!(counts[1], 3.0);
        assert_eq!(counts[2], 2.0);
        assert_eq!(counts[3], 2.0);
        assert!(counts[4].is_nan());
    }
}
