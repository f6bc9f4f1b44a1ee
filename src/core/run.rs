//! Photons-to-fused-grid driver for one survey site

use crate::config::RunConfig;
use crate::core::aggregate::{AggregatedBathymetry, GranuleBathymetryAggregator};
use crate::core::kalman::{FusedGrid, SequentialGridFusion};
use crate::core::kriging::{ElevationField, KrigedSurface, Kriger, SurveyPoints};
use crate::core::projection::reproject_point;
use crate::core::validation::{grid_error, GridError};
use crate::io::photon_source::PhotonSource;
use crate::io::prior_grid::GeoRaster;
use crate::types::{BathyError, BathyResult, BathymetryPoint, Crs, GridSpec};
use std::collections::BTreeMap;

/// Everything a site run produces
#[derive(Debug, Clone)]
pub struct SiteRunOutput {
    pub bathymetry: AggregatedBathymetry,
    /// Points that were kriged, in the output CRS
    pub survey: SurveyPoints,
    /// Prior grid resampled onto the output grid
    pub prior: GeoRaster,
    pub surface: KrigedSurface,
    pub fused: FusedGrid,
}

impl SiteRunOutput {
    pub fn grid(&self) -> &GridSpec {
        &self.surface.grid
    }
}

/// Errors of the prior, kriged and fused grids against a reference grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteComparison {
    pub prior: GridError,
    pub kriged: GridError,
    pub fused: GridError,
}

/// Runs aggregation, kriging and Kalman fusion with one [`RunConfig`]
pub struct SiteFusionRun {
    config: RunConfig,
}

impl SiteFusionRun {
    pub fn new() -> Self {
        Self::with_config(RunConfig::default())
    }

    pub fn with_config(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run<S: PhotonSource>(&self, sources: &[S], prior: &GeoRaster) -> BathyResult<SiteRunOutput> {
        self.config.validate()?;
        log::info!("Starting site run over {} granules", sources.len());

        let bathymetry =
            GranuleBathymetryAggregator::with_params(self.config.aggregation.clone(), prior).run(sources)?;
        if bathymetry.is_empty() {
            return Err(BathyError::Processing(format!(
                "No bathymetry to grid: {}",
                bathymetry.summary()
            )));
        }

        let survey = survey_points(&bathymetry.points, self.config.kriging.elevation)?;
        let grid = output_grid(&survey, self.config.resolution)?;
        log::info!(
            "Output grid {}x{} at {} m in {}",
            grid.width,
            grid.height,
            self.config.resolution,
            grid.crs
        );

        let prior_subset = prior.subset_to_grid(&grid, self.config.prior_valid_range)?;
        let surface = Kriger::with_params(self.config.kriging.clone()).interpolate(&survey, &grid)?;
        let fused =
            SequentialGridFusion::with_params(self.config.fusion.clone()).fuse_surface(&prior_subset, &surface)?;

        Ok(SiteRunOutput {
            bathymetry,
            survey,
            prior: prior_subset,
            surface,
            fused,
        })
    }

    /// Resample `reference` onto the run's output grid and measure each product against it
    pub fn compare(&self, output: &SiteRunOutput, reference: &GeoRaster) -> BathyResult<SiteComparison> {
        let truth = reference.subset_to_grid(output.grid(), self.config.prior_valid_range)?;
        let comparison = SiteComparison {
            prior: grid_error(output.prior.data(), truth.data())?,
            kriged: grid_error(&output.surface.elevation, truth.data())?,
            fused: grid_error(&output.fused.elevation, truth.data())?,
        };
        log::info!(
            "RMSE against reference: prior {:.3} m, kriged {:.3} m, fused {:.3} m",
            comparison.prior.rmse,
            comparison.kriged.rmse,
            comparison.fused.rmse
        );
        Ok(comparison)
    }
}

impl Default for SiteFusionRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Most common CRS among the points; ties go to the lowest EPSG code
fn dominant_crs(points: &[BathymetryPoint]) -> BathyResult<Crs> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for p in points {
        *counts.entry(p.crs.epsg()).or_insert(0) += 1;
    }
    let epsg = counts
        .iter()
        .fold(None, |best: Option<(u32, usize)>, (&code, &n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((code, n)),
        })
        .map(|(code, _)| code)
        .ok_or_else(|| BathyError::InvalidInput("No points to choose a CRS from".to_string()))?;
    Crs::from_epsg(epsg)
}

/// Points of every beam in one CRS, even when granules straddle UTM zones
fn survey_points(points: &[BathymetryPoint], field: ElevationField) -> BathyResult<SurveyPoints> {
    let crs = dominant_crs(points)?;
    let mut x = Vec::with_capacity(points.len());
    let mut y = Vec::with_capacity(points.len());
    let mut z = Vec::with_capacity(points.len());
    for p in points {
        let (px, py) = reproject_point(p.easting, p.northing, p.crs, crs)?;
        x.push(px);
        y.push(py);
        z.push(match field {
            ElevationField::ZKde => p.z_kde,
            ElevationField::SfElevMsl => p.sf_elev_msl,
        });
    }
    SurveyPoints::new(crs, x, y, z)
}

fn output_grid(survey: &SurveyPoints, resolution: f64) -> BathyResult<GridSpec> {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (&x, &y) in survey.x.iter().zip(&survey.y) {
        if x.is_finite() && y.is_finite() {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }
    GridSpec::covering(min_x, min_y, max_x, max_y, resolution, survey.crs)
}
