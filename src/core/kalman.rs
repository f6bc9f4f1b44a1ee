use crate::core::kriging::KrigedSurface;
use crate::io::prior_grid::{GeoRaster, GEBCO_NODATA};
use crate::types::{BathyError, BathyResult, GridSpec};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Prior-grid fusion parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    /// Standard deviation assumed for every prior cell (m)
    pub prior_std: f64,
    /// Extra nodata value of the prior grid, besides -32767
    pub nodata: Option<f64>,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            prior_std: 2.0, // GEBCO vertical uncertainty
            nodata: None,
        }
    }
}

impl FusionParams {
    pub fn validate(&self) -> BathyResult<()> {
        if !(self.prior_std > 0.0) || !self.prior_std.is_finite() {
            return Err(BathyError::configuration(
                "fusion",
                format!("prior_std {} must be positive", self.prior_std),
            ));
        }
        Ok(())
    }
}

/// Scalar Kalman update of one cell, returning `(elevation, variance)`.
///
/// NaN in any input gives NaN. A zero-variance measurement replaces the prior,
/// an infinite-variance one leaves it untouched.
pub fn kalman_update(prior: f64, prior_variance: f64, measured: f64, measurement_variance: f64) -> (f64, f64) {
    if prior.is_nan() || prior_variance.is_nan() || measured.is_nan() || measurement_variance.is_nan() {
        return (f64::NAN, f64::NAN);
    }
    if prior_variance == 0.0 {
        return (prior, 0.0);
    }
    if measurement_variance == 0.0 {
        return (measured, 0.0);
    }
    let gain = prior_variance / (prior_variance + measurement_variance);
    (prior + gain * (measured - prior), (1.0 - gain) * prior_variance)
}

/// Fused elevation and variance grids
#[derive(Debug, Clone, PartialEq)]
pub struct FusedGrid {
    pub elevation: Array2<f64>,
    pub variance: Array2<f64>,
    pub grid: Option<GridSpec>,
}

impl FusedGrid {
    pub fn dim(&self) -> (usize, usize) {
        self.elevation.dim()
    }

    /// Use this grid as the prior of another measurement
    pub fn update(&self, measured: &Array2<f64>, measurement_variance: &Array2<f64>) -> BathyResult<FusedGrid> {
        let (elevation, variance) = fuse_arrays(&self.elevation, &self.variance, measured, measurement_variance)?;
        Ok(FusedGrid {
            elevation,
            variance,
            grid: self.grid,
        })
    }
}

fn check_shape(name: &str, expected: (usize, usize), actual: (usize, usize)) -> BathyResult<()> {
    if expected != actual {
        return Err(BathyError::Processing(format!(
            "{} grid is {}x{}, expected {}x{}",
            name, actual.0, actual.1, expected.0, expected.1
        )));
    }
    Ok(())
}

fn fuse_arrays(
    prior: &Array2<f64>,
    prior_variance: &Array2<f64>,
    measured: &Array2<f64>,
    measurement_variance: &Array2<f64>,
) -> BathyResult<(Array2<f64>, Array2<f64>)> {
    let shape = prior.dim();
    check_shape("Prior variance", shape, prior_variance.dim())?;
    check_shape("Measurement", shape, measured.dim())?;
    check_shape("Measurement variance", shape, measurement_variance.dim())?;

    let mut elevation = Array2::zeros(shape);
    let mut variance = Array2::zeros(shape);
    Zip::from(&mut elevation)
        .and(&mut variance)
        .and(prior)
        .and(prior_variance)
        .and(measured)
        .and(measurement_variance)
        .for_each(|e, v, &p, &pv, &m, &mv| {
            let (fe, fv) = kalman_update(p, pv, m, mv);
            *e = fe;
            *v = fv;
        });
    Ok((elevation, variance))
}

/// Cell-wise Kalman update of a prior grid with interpolated measurements
#[derive(Debug, Clone, Default)]
pub struct SequentialGridFusion {
    params: FusionParams,
}

impl SequentialGridFusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: FusionParams) -> Self {
        Self { params }
    }

    /// Prior elevations with nodata replaced by NaN, and the constant prior variance
    fn prior_state(&self, prior: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let nodata = self.params.nodata;
        let elevation = prior.mapv(|v| {
            if v == GEBCO_NODATA || Some(v) == nodata {
                f64::NAN
            } else {
                v
            }
        });
        let variance = Array2::from_elem(prior.dim(), self.params.prior_std * self.params.prior_std);
        (elevation, variance)
    }

    pub fn fuse(
        &self,
        prior: &Array2<f64>,
        measured: &Array2<f64>,
        measurement_variance: &Array2<f64>,
    ) -> BathyResult<FusedGrid> {
        self.fuse_sequence(prior, &[(measured, measurement_variance)])
    }

    /// Fuse measurements in order, each fused result becoming the next prior
    pub fn fuse_sequence(
        &self,
        prior: &Array2<f64>,
        measurements: &[(&Array2<f64>, &Array2<f64>)],
    ) -> BathyResult<FusedGrid> {
        self.params.validate()?;
        let (elevation, variance) = self.prior_state(prior);
        let mut fused = FusedGrid {
            elevation,
            variance,
            grid: None,
        };
        for (i, (measured, measurement_variance)) in measurements.iter().enumerate() {
            fused = fused.update(measured, measurement_variance)?;
            log::debug!("Applied measurement grid {} of {}", i + 1, measurements.len());
        }
        Ok(fused)
    }

    /// Fuse a kriged surface into a prior raster on the same grid
    pub fn fuse_surface(&self, prior: &GeoRaster, surface: &KrigedSurface) -> BathyResult<FusedGrid> {
        let spec = prior.spec();
        if spec.crs != surface.grid.crs {
            return Err(BathyError::CrsMismatch {
                points: surface.grid.crs,
                template: spec.crs,
            });
        }
        log::info!(
            "Fusing kriged surface ({} points) into {}x{} prior grid",
            surface.points_used,
            spec.width,
            spec.height
        );
        let mut fused = self.fuse(prior.data(), &surface.elevation, &surface.variance)?;
        fused.grid = Some(spec);
        Ok(fused)
    }
}
