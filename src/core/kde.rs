use crate::core::deadline::Deadline;
use crate::core::photon_table::{centered_span, Column, PhotonTable};
use crate::core::stats::{nan_mean, nan_std};
use crate::types::{BathyError, BathyResult};
use serde::{Deserialize, Serialize};

/// Number of windows between two deadline polls
const DEADLINE_POLL_INTERVAL: usize = 256;

/// One-dimensional Gaussian kernel density estimate with Scott's bandwidth
#[derive(Debug, Clone)]
pub struct GaussianKde {
    samples: Vec<f64>,
    /// Kernel variance, `n^(-2/5) * var(samples)`
    kernel_variance: f64,
}

impl GaussianKde {
    /// Fit on the finite values of `samples`.
    ///
    /// Fewer than two finite samples or zero spread cannot define a bandwidth
    /// and give [`BathyError::NumericDegeneracy`].
    pub fn fit(samples: &[f64]) -> BathyResult<Self> {
        let samples: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        let n = samples.len();
        if n < 2 {
            return Err(BathyError::NumericDegeneracy(format!(
                "KDE needs at least 2 samples, got {}",
                n
            )));
        }
        let std = nan_std(&samples);
        if !(std > 0.0) {
            return Err(BathyError::NumericDegeneracy(
                "KDE samples have zero variance".to_string(),
            ));
        }
        let factor = (n as f64).powf(-0.2);
        Ok(Self {
            samples,
            kernel_variance: factor * factor * std * std,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn bandwidth(&self) -> f64 {
        self.kernel_variance.sqrt()
    }

    pub fn density(&self, x: f64) -> f64 {
        let norm = 1.0 / (self.samples.len() as f64 * (2.0 * std::f64::consts::PI * self.kernel_variance).sqrt());
        let sum: f64 = self
            .samples
            .iter()
            .map(|&xi| (-0.5 * (x - xi) * (x - xi) / self.kernel_variance).exp())
            .sum();
        sum * norm
    }

    /// Sample with the highest density among the samples themselves, and that density
    pub fn peak(&self) -> WindowEstimate {
        let mut best = WindowEstimate::NAN;
        for &x in &self.samples {
            let d = self.density(x);
            if !(d <= best.kde_val) {
                best = WindowEstimate { z_kde: x, kde_val: d };
            }
        }
        best
    }
}

/// Seafloor candidate of one window: elevation at maximum density and that density
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowEstimate {
    pub z_kde: f64,
    pub kde_val: f64,
}

impl WindowEstimate {
    pub const NAN: WindowEstimate = WindowEstimate {
        z_kde: f64::NAN,
        kde_val: f64::NAN,
    };

    pub fn is_valid(&self) -> bool {
        self.z_kde.is_finite() && self.kde_val.is_finite()
    }
}

/// Extent of the window centred on each photon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSpec {
    /// Fixed number of photons; incomplete windows at the ends give NaN
    Points(usize),
    /// All photons within half this along-track distance (m) of the centre
    Distance(f64),
}

/// Rolling KDE parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdeParams {
    pub window: WindowSpec,
    /// Acceptance threshold in standard deviations below the mean window score
    pub threshold_val: f64,
    /// Absolute floor on accepted window scores
    pub min_kde: f64,
    /// Optional along-track width (m) each window is narrowed to
    pub window_meters: Option<f64>,
    /// Minimum photons left after narrowing to `window_meters`
    pub min_photons: Option<usize>,
}

impl Default for KdeParams {
    fn default() -> Self {
        Self {
            window: WindowSpec::Points(100), // 100 photons
            threshold_val: 0.0,              // Above the mean score
            min_kde: 0.1,
            window_meters: None,
            min_photons: None,
        }
    }
}

impl KdeParams {
    pub fn validate(&self) -> BathyResult<()> {
        match self.window {
            WindowSpec::Points(w) if w < 2 => {
                return Err(BathyError::configuration(
                    "kde",
                    format!("window of {} points is too small", w),
                ))
            }
            WindowSpec::Distance(m) if !(m > 0.0) => {
                return Err(BathyError::configuration(
                    "kde",
                    format!("window distance {} must be positive", m),
                ))
            }
            _ => {}
        }
        if let Some(m) = self.window_meters {
            if !(m > 0.0) {
                return Err(BathyError::configuration("kde", "window_meters must be positive"));
            }
        }
        Ok(())
    }
}

/// Sliding-window KDE seafloor extractor over refraction-corrected elevations
#[derive(Debug, Clone, Default)]
pub struct RollingKde {
    params: KdeParams,
}

impl RollingKde {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: KdeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KdeParams {
        &self.params
    }

    /// One estimate per table row, from the window centred on that row
    pub fn extract(&self, table: &PhotonTable, deadline: &Deadline) -> BathyResult<Vec<WindowEstimate>> {
        table.require_column(Column::Refraction, "kde")?;
        let rows = table.rows();
        let n = rows.len();

        let mut order: Vec<usize> = (0..n).collect();
        if !table.is_sorted_by_distance() {
            order.sort_by(|&a, &b| rows[a].dist_or.total_cmp(&rows[b].dist_or));
        }
        let dist: Vec<f64> = order.iter().map(|&i| rows[i].dist_or).collect();
        let z: Vec<f64> = order.iter().map(|&i| rows[i].z_refr).collect();

        let mut estimates = vec![WindowEstimate::NAN; n];
        let mut degenerate = 0usize;
        for pos in 0..n {
            if pos % DEADLINE_POLL_INTERVAL == 0 {
                deadline.check()?;
            }
            let span = match self.params.window {
                WindowSpec::Points(w) => centered_span(pos, w, n),
                WindowSpec::Distance(m) => {
                    let half = m / 2.0;
                    let start = dist.partition_point(|&d| d < dist[pos] - half);
                    let end = dist.partition_point(|&d| d <= dist[pos] + half);
                    Some(start..end)
                }
            };
            let Some(span) = span else { continue };

            let samples: Vec<f64> = match self.params.window_meters {
                Some(width) => {
                    let half = width / 2.0;
                    let centre = dist[pos];
                    let narrowed: Vec<f64> = span
                        .filter(|&j| dist[j] > centre - half && dist[j] < centre + half)
                        .map(|j| z[j])
                        .collect();
                    if narrowed.len() < self.params.min_photons.unwrap_or(0) {
                        continue;
                    }
                    narrowed
                }
                None => z[span].to_vec(),
            };

            match GaussianKde::fit(&samples) {
                Ok(kde) => estimates[order[pos]] = kde.peak(),
                Err(BathyError::NumericDegeneracy(_)) => degenerate += 1,
                Err(e) => return Err(e),
            }
        }

        if degenerate > 0 {
            log::debug!("{} of {} KDE windows were degenerate", degenerate, n);
        }
        Ok(estimates)
    }

    /// Score a window must exceed to be accepted
    pub fn acceptance_threshold(&self, estimates: &[WindowEstimate]) -> f64 {
        acceptance_threshold(estimates, self.params.threshold_val, self.params.min_kde)
    }
}

/// `max(mean - k * std, min_kde)` over the finite window scores
pub fn acceptance_threshold(estimates: &[WindowEstimate], k: f64, min_kde: f64) -> f64 {
    let scores: Vec<f64> = estimates.iter().map(|e| e.kde_val).collect();
    let threshold = nan_mean(&scores) - k * nan_std(&scores);
    threshold.max(min_kde)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::photon_table::PhotonRow;
    use crate::types::{Crs, PhotonRecord};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn table(samples: &[(f64, f64)]) -> PhotonTable {
        let rows: Vec<PhotonRow> = samples
            .iter()
            .enumerate()
            .map(|(i, &(dist, _))| {
                let photon = PhotonRecord {
                    x: -80.5,
                    y: 24.7,
                    z_ellip: 0.0,
                    z_geoid: 0.0,
                    geoid_corr: 0.0,
                    tide_ocean_corr: 0.0,
                    geof2m_corr: 0.0,
                    delta_time: i as f64,
                    oc_sig_conf: 1,
                    land_sig_conf: 0,
                    p_vec_az: 0.0,
                    p_vec_elev: 1.57,
                    dac_corr: 0.0,
                    ph_count: 10,
                };
                PhotonRow::new(photon, 0.0, dist, dist)
            })
            .collect();
        let z: Vec<f64> = samples.iter().map(|&(_, z)| z).collect();
        PhotonTable::from_rows(rows, Crs::Utm { zone: 17, north: true })
            .with_column(Column::Refraction, |i, r| r.z_refr = z[i])
    }

    #[test]
    fn test_kde_matches_scott_bandwidth() {
        let kde = GaussianKde::fit(&[0.0, 1.0, 2.0, 3.0]).unwrap();
        // var(ddof=1) = 5/3, factor = 4^(-1/5)
        let expected = (5.0f64 / 3.0).sqrt() * 4f64.powf(-0.2);
        assert!((kde.bandwidth() - expected).abs() < 1e-12);
        let h = expected;
        let manual: f64 = [0.0, 1.0, 2.0, 3.0]
            .iter()
            .map(|&xi: &f64| (-0.5 * ((1.5 - xi) / h).powi(2)).exp())
            .sum::<f64>()
            / (4.0 * h * (2.0 * std::f64::consts::PI).sqrt());
        assert!((kde.density(1.5) - manual).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_windows() {
        assert!(matches!(GaussianKde::fit(&[1.0]), Err(BathyError::NumericDegeneracy(_))));
        assert!(matches!(GaussianKde::fit(&[2.0, 2.0, 2.0]), Err(BathyError::NumericDegeneracy(_))));
        assert!(matches!(GaussianKde::fit(&[2.0, f64::NAN]), Err(BathyError::NumericDegeneracy(_))));
    }

    #[test]
    fn test_cluster_beats_noise() {
        let mut rng = StdRng::seed_from_u64(7);
        let cluster = Normal::new(-10.0, 0.2).unwrap();
        let mut mixed: Vec<f64> = (0..30).map(|_| cluster.sample(&mut rng)).collect();
        mixed.extend((0..20).map(|_| rng.gen_range(-20.0..0.0)));
        let noise: Vec<f64> = (0..50).map(|_| rng.gen_range(-20.0..0.0)).collect();

        let mixed_peak = GaussianKde::fit(&mixed).unwrap().peak();
        let noise_peak = GaussianKde::fit(&noise).unwrap().peak();
        assert!(mixed_peak.z_kde > -10.6 && mixed_peak.z_kde < -9.4, "{:?}", mixed_peak);
        assert!(mixed_peak.kde_val > noise_peak.kde_val);
    }

    #[test]
    fn test_point_windows_leave_edges_nan() {
        let samples: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, -5.0 - (i % 3) as f64)).collect();
        let kde = RollingKde::with_params(KdeParams {
            window: WindowSpec::Points(4),
            ..KdeParams::default()
        });
        let estimates = kde.extract(&table(&samples), &Deadline::unlimited("g")).unwrap();
        assert_eq!(estimates.len(), 10);
        assert!(!estimates[0].is_valid());
        assert!(!estimates[1].is_valid());
        assert!(estimates[2..9].iter().all(|e| e.is_valid()));
        assert!(!estimates[9].is_valid());
        assert!(estimates[2..9].iter().all(|e| e.z_kde <= -5.0 && e.z_kde >= -7.0));
    }

    #[test]
    fn test_flat_window_is_nan_not_panic() {
        let samples: Vec<(f64, f64)> = (0..6).map(|i| (i as f64, -4.0)).collect();
        let kde = RollingKde::with_params(KdeParams {
            window: WindowSpec::Points(3),
            ..KdeParams::default()
        });
        let estimates = kde.extract(&table(&samples), &Deadline::unlimited("g")).unwrap();
        assert!(estimates.iter().all(|e| !e.is_valid()));
    }

    #[test]
    fn test_distance_window_and_min_photons() {
        // two clumps 100 m apart
        let mut samples: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, -5.0 - 0.1 * i as f64)).collect();
        samples.extend((0..3).map(|i| (100.0 + i as f64, -8.0 - 0.1 * i as f64)));

        let by_distance = RollingKde::with_params(KdeParams {
            window: WindowSpec::Distance(10.0),
            ..KdeParams::default()
        });
        let estimates = by_distance.extract(&table(&samples), &Deadline::unlimited("g")).unwrap();
        assert!(estimates.iter().all(|e| e.is_valid()));
        assert!(estimates[..5].iter().all(|e| e.z_kde > -6.0));
        assert!(estimates[5..].iter().all(|e| e.z_kde < -7.0));

        let narrowed = RollingKde::with_params(KdeParams {
            window: WindowSpec::Points(5),
            window_meters: Some(10.0),
            min_photons: Some(4),
            ..KdeParams::default()
        });
        let estimates = narrowed.extract(&table(&samples), &Deadline::unlimited("g")).unwrap();
        // centre 2 sees the whole first clump, centre 5 only 3 photons of its own clump
        assert!(estimates[2].is_valid());
        assert!(!estimates[5].is_valid());
    }

    #[test]
    fn test_missing_refraction_column() {
        let t = PhotonTable::empty(Crs::Wgs84);
        let err = RollingKde::new().extract(&t, &Deadline::unlimited("g")).unwrap_err();
        assert!(matches!(err, BathyError::Configuration { .. }));
    }

    #[test]
    fn test_expired_deadline_stops_extraction() {
        let samples: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, -5.0 - i as f64)).collect();
        let deadline = Deadline::new("g", Some(std::time::Duration::ZERO));
        let err = RollingKde::new().extract(&table(&samples), &deadline).unwrap_err();
        assert!(matches!(err, BathyError::Timeout { .. }));
    }

    #[test]
    fn test_acceptance_threshold() {
        let estimates = vec![
            WindowEstimate { z_kde: -5.0, kde_val: 0.2 },
            WindowEstimate { z_kde: -5.0, kde_val: 0.4 },
            WindowEstimate::NAN,
        ];
        assert!((acceptance_threshold(&estimates, 0.0, 0.1) - 0.3).abs() < 1e-12);
        assert_eq!(acceptance_threshold(&estimates, 0.0, 0.5), 0.5);
        assert_eq!(acceptance_threshold(&[], 1.0, 0.1), 0.1);
    }
}
