use crate::core::projection::reproject_point;
use crate::core::stats::nan_median;
use crate::io::prior_grid::PriorGridSampler;
use crate::types::{BathyError, BathyResult, BathymetryPoint, Crs};
use ndarray::{Array2, Zip};
use serde::Serialize;

/// Accuracy of estimated elevations against reference elevations
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub rmse: f64,
    pub mae: f64,
    /// Mean signed error (estimate minus truth)
    pub mean_error: f64,
    pub median_abs_error: f64,
    /// Mean absolute error relative to the reference magnitude, as a fraction
    pub mape: f64,
    /// Pairs where both values were finite
    pub count: usize,
}

/// Error metrics over the pairs where both values are finite; all NaN when there are none
pub fn error_metrics(estimated: &[f64], truth: &[f64]) -> BathyResult<ErrorMetrics> {
    if estimated.len() != truth.len() {
        return Err(BathyError::InvalidInput(format!(
            "{} estimates for {} reference values",
            estimated.len(),
            truth.len()
        )));
    }
    let pairs: Vec<(f64, f64)> = estimated
        .iter()
        .zip(truth)
        .filter(|(e, t)| e.is_finite() && t.is_finite())
        .map(|(&e, &t)| (e, t))
        .collect();
    let count = pairs.len();
    if count == 0 {
        return Ok(ErrorMetrics {
            rmse: f64::NAN,
            mae: f64::NAN,
            mean_error: f64::NAN,
            median_abs_error: f64::NAN,
            mape: f64::NAN,
            count,
        });
    }

    let n = count as f64;
    let abs: Vec<f64> = pairs.iter().map(|(e, t)| (e - t).abs()).collect();
    Ok(ErrorMetrics {
        rmse: (pairs.iter().map(|(e, t)| (e - t).powi(2)).sum::<f64>() / n).sqrt(),
        mae: abs.iter().sum::<f64>() / n,
        mean_error: pairs.iter().map(|(e, t)| e - t).sum::<f64>() / n,
        median_abs_error: nan_median(&abs),
        mape: pairs
            .iter()
            .map(|(e, t)| (e - t).abs() / t.abs().max(f64::EPSILON))
            .sum::<f64>()
            / n,
        count,
    })
}

/// Compare `sf_elev_msl` of bathymetry points with a reference raster sampled
/// at their refraction-corrected positions
pub fn point_error_metrics(points: &[BathymetryPoint], reference: &dyn PriorGridSampler) -> BathyResult<ErrorMetrics> {
    let lonlat = points
        .iter()
        .map(|p| reproject_point(p.easting, p.northing, p.crs, Crs::Wgs84))
        .collect::<BathyResult<Vec<_>>>()?;
    let truth = reference.sample(&lonlat);
    let estimated: Vec<f64> = points.iter().map(|p| p.sf_elev_msl).collect();
    let metrics = error_metrics(&estimated, &truth)?;
    log::info!(
        "Point accuracy over {} of {} points: RMSE {:.3} m, MAE {:.3} m",
        metrics.count,
        points.len(),
        metrics.rmse,
        metrics.mae
    );
    Ok(metrics)
}

/// RMSE and MAE between two co-registered grids over cells finite in both
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridError {
    pub rmse: f64,
    pub mae: f64,
    pub count: usize,
}

pub fn grid_error(measured: &Array2<f64>, truth: &Array2<f64>) -> BathyResult<GridError> {
    if measured.dim() != truth.dim() {
        return Err(BathyError::Processing(format!(
            "Grid shapes differ: {:?} vs {:?}",
            measured.dim(),
            truth.dim()
        )));
    }
    let mut sum_sq = 0.0;
    let mut sum_abs = 0.0;
    let mut count = 0usize;
    Zip::from(measured).and(truth).for_each(|&m, &t| {
        if m.is_finite() && t.is_finite() {
            sum_sq += (m - t).powi(2);
            sum_abs += (m - t).abs();
            count += 1;
        }
    });
    let n = count as f64;
    Ok(GridError {
        rmse: if count > 0 { (sum_sq / n).sqrt() } else { f64::NAN },
        mae: if count > 0 { sum_abs / n } else { f64::NAN },
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_error_metrics() {
        let metrics = error_metrics(&[-5.0, -7.0, f64::NAN, -2.0], &[-4.0, -8.0, -3.0, -2.0]).unwrap();
        assert_eq!(metrics.count, 3);
        assert_abs_diff_eq!(metrics.rmse, (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.mae, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.mean_error, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.median_abs_error, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.mape, (0.25 + 0.125) / 3.0, epsilon = 1e-12);

        assert!(error_metrics(&[1.0], &[]).is_err());
        assert!(error_metrics(&[f64::NAN], &[1.0]).unwrap().rmse.is_nan());
    }

    #[test]
    fn test_grid_error_skips_nan() {
        let measured = array![[1.0, 2.0], [f64::NAN, 4.0]];
        let truth = array![[1.0, 4.0], [0.0, 4.0]];
        let err = grid_error(&measured, &truth).unwrap();
        assert_eq!(err.count, 3);
        assert_abs_diff_eq!(err.rmse, (4.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(err.mae, 2.0 / 3.0, epsilon = 1e-12);
        assert!(grid_error(&measured, &Array2::zeros((3, 3))).is_err());
    }
}
