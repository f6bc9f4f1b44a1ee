use crate::core::projection::reproject_point;
use crate::core::subsample::{SpatialSubsampler, SubsampleParams};
use crate::types::{BathyError, BathyResult, BathymetryPoint, Crs, GridSpec};
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordinary kriging, or universal kriging with a regional linear drift in x and y
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KrigingMethod {
    Ordinary,
    Universal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariogramModel {
    Linear,
    Power,
    Gaussian,
    Spherical,
    Exponential,
}

impl VariogramModel {
    /// Unit-amplitude model shape at lag `h` for range (or exponent) `shape`
    fn basis(&self, h: f64, shape: f64) -> f64 {
        match self {
            VariogramModel::Linear => h,
            VariogramModel::Power => h.powf(shape),
            VariogramModel::Gaussian => {
                let r = 4.0 * shape / 7.0;
                1.0 - (-(h * h) / (r * r)).exp()
            }
            VariogramModel::Spherical => {
                if h < shape {
                    let q = h / shape;
                    1.5 * q - 0.5 * q * q * q
                } else {
                    1.0
                }
            }
            VariogramModel::Exponential => 1.0 - (-h / (shape / 3.0)).exp(),
        }
    }
}

/// Semivariogram with explicit parameters; `psill` is the partial sill (sill minus nugget)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Variogram {
    Linear { slope: f64, nugget: f64 },
    Power { scale: f64, exponent: f64, nugget: f64 },
    Gaussian { psill: f64, range: f64, nugget: f64 },
    Spherical { psill: f64, range: f64, nugget: f64 },
    Exponential { psill: f64, range: f64, nugget: f64 },
}

impl Variogram {
    fn from_fit(model: VariogramModel, amplitude: f64, shape: f64, nugget: f64) -> Self {
        match model {
            VariogramModel::Linear => Variogram::Linear { slope: amplitude, nugget },
            VariogramModel::Power => Variogram::Power { scale: amplitude, exponent: shape, nugget },
            VariogramModel::Gaussian => Variogram::Gaussian { psill: amplitude, range: shape, nugget },
            VariogramModel::Spherical => Variogram::Spherical { psill: amplitude, range: shape, nugget },
            VariogramModel::Exponential => Variogram::Exponential { psill: amplitude, range: shape, nugget },
        }
    }

    pub fn model(&self) -> VariogramModel {
        match self {
            Variogram::Linear { .. } => VariogramModel::Linear,
            Variogram::Power { .. } => VariogramModel::Power,
            Variogram::Gaussian { .. } => VariogramModel::Gaussian,
            Variogram::Spherical { .. } => VariogramModel::Spherical,
            Variogram::Exponential { .. } => VariogramModel::Exponential,
        }
    }

    fn parts(&self) -> (f64, f64, f64) {
        match *self {
            Variogram::Linear { slope, nugget } => (slope, 0.0, nugget),
            Variogram::Power { scale, exponent, nugget } => (scale, exponent, nugget),
            Variogram::Gaussian { psill, range, nugget }
            | Variogram::Spherical { psill, range, nugget }
            | Variogram::Exponential { psill, range, nugget } => (psill, range, nugget),
        }
    }

    /// Semivariance at lag `h`; zero at zero lag
    pub fn gamma(&self, h: f64) -> f64 {
        if h == 0.0 {
            return 0.0;
        }
        let (amplitude, shape, nugget) = self.parts();
        amplitude * self.model().basis(h, shape) + nugget
    }

    pub fn validate(&self) -> BathyResult<()> {
        let (amplitude, shape, nugget) = self.parts();
        let shape_ok = match self.model() {
            VariogramModel::Linear => true,
            VariogramModel::Power => shape > 0.0 && shape < 2.0,
            _ => shape > 0.0,
        };
        if !(amplitude >= 0.0) || !(nugget >= 0.0) || !shape_ok {
            return Err(BathyError::configuration(
                "kriging",
                format!("invalid variogram parameters {:?}", self),
            ));
        }
        Ok(())
    }
}

/// Binned semivariance of a point set
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentalVariogram {
    pub lags: Vec<f64>,
    pub semivariance: Vec<f64>,
    pub counts: Vec<usize>,
}

impl ExperimentalVariogram {
    /// Mean lag and semivariance of all point pairs in `nlags` equal-width distance bins.
    /// Empty bins are left out.
    pub fn compute(x: &[f64], y: &[f64], z: &[f64], nlags: usize) -> Self {
        let n = z.len();
        let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let d = ((x[i] - x[j]).powi(2) + (y[i] - y[j]).powi(2)).sqrt();
                pairs.push((d, 0.5 * (z[i] - z[j]).powi(2)));
            }
        }
        let empty = Self { lags: Vec::new(), semivariance: Vec::new(), counts: Vec::new() };
        if pairs.is_empty() || nlags == 0 {
            return empty;
        }

        let dmin = pairs.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let dmax = pairs.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let width = (dmax - dmin) / nlags as f64;

        let mut lag_sum = vec![0.0; nlags];
        let mut gamma_sum = vec![0.0; nlags];
        let mut counts = vec![0usize; nlags];
        for &(d, g) in &pairs {
            let bin = if width > 0.0 {
                (((d - dmin) / width) as usize).min(nlags - 1)
            } else {
                0
            };
            lag_sum[bin] += d;
            gamma_sum[bin] += g;
            counts[bin] += 1;
        }

        let mut out = empty;
        for bin in 0..nlags {
            if counts[bin] > 0 {
                out.lags.push(lag_sum[bin] / counts[bin] as f64);
                out.semivariance.push(gamma_sum[bin] / counts[bin] as f64);
                out.counts.push(counts[bin]);
            }
        }
        out
    }

    /// Least-squares fit of `model`: grid search over the range (or exponent),
    /// closed-form non-negative amplitude and nugget for each candidate.
    pub fn fit(&self, model: VariogramModel) -> BathyResult<Variogram> {
        if self.lags.is_empty() {
            return Err(BathyError::Processing(
                "Cannot fit a variogram without point pairs".to_string(),
            ));
        }
        let max_lag = self.lags.iter().copied().fold(0.0, f64::max);
        let candidates: Vec<f64> = match model {
            VariogramModel::Linear => vec![0.0],
            VariogramModel::Power => (1..200).map(|i| i as f64 * 0.01).collect(),
            _ => (1..=400).map(|i| max_lag * i as f64 / 200.0).collect(),
        };

        let mut best: Option<(f64, Variogram)> = None;
        for shape in candidates {
            if model != VariogramModel::Linear && model != VariogramModel::Power && !(shape > 0.0) {
                continue;
            }
            let basis: Vec<f64> = self.lags.iter().map(|&h| model.basis(h, shape)).collect();
            let (amplitude, nugget, sse) = fit_non_negative(&basis, &self.semivariance);
            if best.as_ref().map_or(true, |(b, _)| sse < *b) {
                best = Some((sse, Variogram::from_fit(model, amplitude, shape, nugget)));
            }
        }
        let (sse, variogram) = best.ok_or_else(|| {
            BathyError::Processing(format!("Variogram fit for {:?} found no candidate", model))
        })?;
        log::debug!("Fitted variogram {:?} (sse {:.4})", variogram, sse);
        Ok(variogram)
    }
}

/// Least squares `y ~ a * f + b` with `a, b >= 0`, returning `(a, b, sse)`
fn fit_non_negative(f: &[f64], y: &[f64]) -> (f64, f64, f64) {
    let n = f.len() as f64;
    let sf: f64 = f.iter().sum();
    let sy: f64 = y.iter().sum();
    let sff: f64 = f.iter().map(|v| v * v).sum();
    let sfy: f64 = f.iter().zip(y).map(|(a, b)| a * b).sum();
    let sse = |a: f64, b: f64| -> f64 { f.iter().zip(y).map(|(fi, yi)| (a * fi + b - yi).powi(2)).sum() };

    let mut candidates = Vec::with_capacity(3);
    let det = n * sff - sf * sf;
    if det.abs() > 1e-12 * (n * sff).max(1.0) {
        let a = (n * sfy - sf * sy) / det;
        let b = (sy - a * sf) / n;
        if a >= 0.0 && b >= 0.0 {
            candidates.push((a, b));
        }
    }
    candidates.push((if sff > 0.0 { (sfy / sff).max(0.0) } else { 0.0 }, 0.0));
    candidates.push((0.0, (sy / n).max(0.0)));

    candidates
        .into_iter()
        .map(|(a, b)| (a, b, sse(a, b)))
        .fold((0.0, 0.0, f64::INFINITY), |best, c| if c.2 < best.2 { c } else { best })
}

/// Which bathymetry point elevation is interpolated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationField {
    /// Geoid-referenced elevation at maximum density
    ZKde,
    /// Elevation relative to the local sea surface
    SfElevMsl,
}

/// Kriging parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrigingParams {
    pub method: KrigingMethod,
    pub variogram_model: VariogramModel,
    /// Explicit variogram; fitted to the experimental variogram when absent
    pub variogram: Option<Variogram>,
    pub nlags: usize,
    pub subsample: SubsampleParams,
    pub elevation: ElevationField,
}

impl Default for KrigingParams {
    fn default() -> Self {
        Self {
            method: KrigingMethod::Universal,
            variogram_model: VariogramModel::Spherical,
            variogram: None,
            nlags: 6,
            subsample: SubsampleParams::default(), // 2000 points
            elevation: ElevationField::ZKde,
        }
    }
}

impl KrigingParams {
    pub fn validate(&self) -> BathyResult<()> {
        if self.nlags == 0 {
            return Err(BathyError::configuration("kriging", "nlags must be positive"));
        }
        if let Some(v) = &self.variogram {
            v.validate()?;
            if v.model() != self.variogram_model {
                return Err(BathyError::configuration(
                    "kriging",
                    format!(
                        "explicit variogram is {:?} but variogram_model is {:?}",
                        v.model(),
                        self.variogram_model
                    ),
                ));
            }
        }
        self.subsample.validate()
    }
}

/// Scattered elevations in one CRS
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyPoints {
    pub crs: Crs,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl SurveyPoints {
    pub fn new(crs: Crs, x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> BathyResult<Self> {
        if x.len() != y.len() || x.len() != z.len() {
            return Err(BathyError::InvalidInput(format!(
                "Point coordinate lengths differ: {} {} {}",
                x.len(),
                y.len(),
                z.len()
            )));
        }
        Ok(Self { crs, x, y, z })
    }

    /// Refraction-corrected positions of bathymetry points, which must share one CRS
    pub fn from_bathymetry(points: &[BathymetryPoint], field: ElevationField) -> BathyResult<Self> {
        let crs = points.first().map_or(Crs::Wgs84, |p| p.crs);
        if let Some(other) = points.iter().find(|p| p.crs != crs) {
            return Err(BathyError::InvalidInput(format!(
                "Bathymetry points mix {} and {}; reproject them first",
                crs, other.crs
            )));
        }
        let z = points
            .iter()
            .map(|p| match field {
                ElevationField::ZKde => p.z_kde,
                ElevationField::SfElevMsl => p.sf_elev_msl,
            })
            .collect();
        Self::new(
            crs,
            points.iter().map(|p| p.easting).collect(),
            points.iter().map(|p| p.northing).collect(),
            z,
        )
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    /// Finite points with coincident locations merged into one point at their mean elevation,
    /// in order of first occurrence
    pub fn merge_coincident(&self) -> Self {
        let mut slots: HashMap<(u64, u64), usize> = HashMap::new();
        let mut merged: Vec<(f64, f64, f64, usize)> = Vec::new();
        for i in 0..self.len() {
            let (x, y, z) = (self.x[i], self.y[i], self.z[i]);
            if !(x.is_finite() && y.is_finite() && z.is_finite()) {
                continue;
            }
            // + 0.0 folds -0.0 into 0.0
            let key = ((x + 0.0).to_bits(), (y + 0.0).to_bits());
            match slots.get(&key) {
                Some(&slot) => {
                    merged[slot].2 += z;
                    merged[slot].3 += 1;
                }
                None => {
                    slots.insert(key, merged.len());
                    merged.push((x, y, z, 1));
                }
            }
        }
        if merged.len() < self.len() {
            log::debug!(
                "Merged {} input points into {} distinct locations",
                self.len(),
                merged.len()
            );
        }
        Self {
            crs: self.crs,
            x: merged.iter().map(|m| m.0).collect(),
            y: merged.iter().map(|m| m.1).collect(),
            z: merged.iter().map(|m| m.2 / m.3 as f64).collect(),
        }
    }

    pub fn reprojected(&self, to: Crs) -> BathyResult<Self> {
        let mut x = Vec::with_capacity(self.len());
        let mut y = Vec::with_capacity(self.len());
        for (&px, &py) in self.x.iter().zip(&self.y) {
            let (qx, qy) = reproject_point(px, py, self.crs, to)?;
            x.push(qx);
            y.push(qy);
        }
        Self::new(to, x, y, self.z.clone())
    }
}

/// Interpolated elevation and estimation variance on a template grid
#[derive(Debug, Clone)]
pub struct KrigedSurface {
    pub elevation: Array2<f64>,
    pub variance: Array2<f64>,
    pub grid: GridSpec,
    pub variogram: Variogram,
    pub points_used: usize,
}

/// Kriging interpolator onto a template grid
#[derive(Debug, Clone, Default)]
pub struct Kriger {
    params: KrigingParams,
}

impl Kriger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: KrigingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KrigingParams {
        &self.params
    }

    /// Subsample, fit (or take) the variogram and krige every template cell
    pub fn interpolate(&self, points: &SurveyPoints, template: &GridSpec) -> BathyResult<KrigedSurface> {
        self.params.validate()?;
        if points.crs != template.crs {
            return Err(BathyError::CrsMismatch {
                points: points.crs,
                template: template.crs,
            });
        }

        let points = &points.merge_coincident();
        let xy: Vec<(f64, f64)> = points.x.iter().copied().zip(points.y.iter().copied()).collect();
        let idx = SpatialSubsampler::with_params(self.params.subsample.clone()).select(&xy)?;
        let n = idx.len();
        if n < 3 {
            return Err(BathyError::Processing(format!(
                "Kriging needs at least 3 points, got {}",
                n
            )));
        }

        log::info!(
            "{:?} kriging of {} points onto {}x{} grid",
            self.params.method,
            n,
            template.width,
            template.height
        );

        let mean_x = idx.iter().map(|&i| points.x[i]).sum::<f64>() / n as f64;
        let mean_y = idx.iter().map(|&i| points.y[i]).sum::<f64>() / n as f64;
        let x: Vec<f64> = idx.iter().map(|&i| points.x[i] - mean_x).collect();
        let y: Vec<f64> = idx.iter().map(|&i| points.y[i] - mean_y).collect();
        let z: Vec<f64> = idx.iter().map(|&i| points.z[i]).collect();

        let variogram = match self.params.variogram {
            Some(v) => v,
            None => ExperimentalVariogram::compute(&x, &y, &z, self.params.nlags).fit(self.params.variogram_model)?,
        };
        log::info!("Using variogram {:?}", variogram);

        let system = KrigingSystem::assemble(&x, &y, variogram, self.params.method)?;
        let (elevation, variance) = system.solve_grid(template, mean_x, mean_y, &z)?;

        Ok(KrigedSurface {
            elevation,
            variance,
            grid: *template,
            variogram,
            points_used: n,
        })
    }
}

/// Factorised kriging matrix over centred point coordinates
struct KrigingSystem<'a> {
    x: &'a [f64],
    y: &'a [f64],
    variogram: Variogram,
    method: KrigingMethod,
    drift_scale: f64,
    lu: LU<f64, Dyn, Dyn>,
}

impl<'a> KrigingSystem<'a> {
    fn drift_terms(method: KrigingMethod) -> usize {
        match method {
            KrigingMethod::Ordinary => 1,
            KrigingMethod::Universal => 3,
        }
    }

    fn assemble(x: &'a [f64], y: &'a [f64], variogram: Variogram, method: KrigingMethod) -> BathyResult<Self> {
        let n = x.len();
        let m = n + Self::drift_terms(method);
        let drift_scale = x
            .iter()
            .chain(y.iter())
            .fold(0.0f64, |acc, v| acc.max(v.abs()))
            .max(1.0);

        let mut a = DMatrix::<f64>::zeros(m, m);
        for i in 0..n {
            for j in (i + 1)..n {
                let h = ((x[i] - x[j]).powi(2) + (y[i] - y[j]).powi(2)).sqrt();
                if h == 0.0 {
                    return Err(BathyError::Processing(format!(
                        "Duplicate point locations at indices {} and {}",
                        i, j
                    )));
                }
                let g = variogram.gamma(h);
                a[(i, j)] = g;
                a[(j, i)] = g;
            }
            a[(i, n)] = 1.0;
            a[(n, i)] = 1.0;
            if method == KrigingMethod::Universal {
                a[(i, n + 1)] = x[i] / drift_scale;
                a[(n + 1, i)] = x[i] / drift_scale;
                a[(i, n + 2)] = y[i] / drift_scale;
                a[(n + 2, i)] = y[i] / drift_scale;
            }
        }

        let lu = a.lu();
        if !lu.is_invertible() {
            return Err(BathyError::Processing(
                "Kriging matrix is singular".to_string(),
            ));
        }
        Ok(Self {
            x,
            y,
            variogram,
            method,
            drift_scale,
            lu,
        })
    }

    /// Estimate and variance at a centred location
    fn solve_at(&self, x0: f64, y0: f64, z: &[f64]) -> BathyResult<(f64, f64)> {
        let n = self.x.len();
        let m = n + Self::drift_terms(self.method);
        let mut rhs = DVector::<f64>::zeros(m);
        for i in 0..n {
            let h = ((self.x[i] - x0).powi(2) + (self.y[i] - y0).powi(2)).sqrt();
            rhs[i] = self.variogram.gamma(h);
        }
        rhs[n] = 1.0;
        if self.method == KrigingMethod::Universal {
            rhs[n + 1] = x0 / self.drift_scale;
            rhs[n + 2] = y0 / self.drift_scale;
        }

        let solution = self
            .lu
            .solve(&rhs)
            .ok_or_else(|| BathyError::Processing("Kriging solve failed".to_string()))?;
        let estimate: f64 = (0..n).map(|i| solution[i] * z[i]).sum();
        let variance: f64 = (0..m).map(|i| solution[i] * rhs[i]).sum();
        Ok((estimate, variance.max(0.0)))
    }

    #[cfg(feature = "parallel")]
    fn solve_grid(&self, grid: &GridSpec, mean_x: f64, mean_y: f64, z: &[f64]) -> BathyResult<(Array2<f64>, Array2<f64>)> {
        use rayon::prelude::*;

        let rows = (0..grid.height)
            .into_par_iter()
            .map(|row| self.solve_row(grid, row, mean_x, mean_y, z))
            .collect::<BathyResult<Vec<_>>>()?;
        Ok(Self::stack(grid, rows))
    }

    #[cfg(not(feature = "parallel"))]
    fn solve_grid(&self, grid: &GridSpec, mean_x: f64, mean_y: f64, z: &[f64]) -> BathyResult<(Array2<f64>, Array2<f64>)> {
        let rows = (0..grid.height)
            .map(|row| self.solve_row(grid, row, mean_x, mean_y, z))
            .collect::<BathyResult<Vec<_>>>()?;
        Ok(Self::stack(grid, rows))
    }

    fn solve_row(&self, grid: &GridSpec, row: usize, mean_x: f64, mean_y: f64, z: &[f64]) -> BathyResult<Vec<(f64, f64)>> {
        (0..grid.width)
            .map(|col| {
                let (cx, cy) = grid.transform.cell_center(row, col);
                self.solve_at(cx - mean_x, cy - mean_y, z)
            })
            .collect()
    }

    fn stack(grid: &GridSpec, rows: Vec<Vec<(f64, f64)>>) -> (Array2<f64>, Array2<f64>) {
        let mut elevation = Array2::zeros(grid.shape());
        let mut variance = Array2::zeros(grid.shape());
        for (r, cells) in rows.into_iter().enumerate() {
            for (c, (est, var)) in cells.into_iter().enumerate() {
                elevation[[r, c]] = est;
                variance[[r, c]] = var;
            }
        }
        (elevation, variance)
    }
}
