use crate::core::photon_table::{centered_span, PhotonTable};
use crate::core::stats::{nan_median, nan_std};
use serde::{Deserialize, Serialize};

/// Ocean signal confidence treated as high confidence
pub const HIGH_CONFIDENCE: i8 = 4;

/// How the local sea-surface elevation is derived from high-confidence ocean photons
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SeaSurfacePolicy {
    /// One median level for the whole beam
    ConstantPerGranule,
    /// Centred rolling median over `window` high-confidence photons,
    /// interpolated by along-track distance onto every photon
    RollingInterpolated { window: usize },
}

impl Default for SeaSurfacePolicy {
    fn default() -> Self {
        SeaSurfacePolicy::ConstantPerGranule
    }
}

/// Sea level per table row plus the beam-wide spread of high-confidence elevations
#[derive(Debug, Clone, PartialEq)]
pub struct SeaSurfaceEstimate {
    pub levels: Vec<f64>,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SeaSurfaceEstimator {
    policy: SeaSurfacePolicy,
}

impl SeaSurfaceEstimator {
    pub fn new(policy: SeaSurfacePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SeaSurfacePolicy {
        self.policy
    }

    /// Estimate the sea surface for every row of `table` (expected in along-track order).
    /// Without high-confidence photons every level is NaN.
    pub fn estimate(&self, table: &PhotonTable) -> SeaSurfaceEstimate {
        let rows = table.rows();
        let high_conf: Vec<(f64, f64)> = rows
            .iter()
            .filter(|r| r.photon.oc_sig_conf >= HIGH_CONFIDENCE)
            .map(|r| (r.dist_or, r.photon.z_geoid))
            .collect();
        let std_dev = nan_std(
            &rows
                .iter()
                .filter(|r| r.photon.oc_sig_conf == HIGH_CONFIDENCE)
                .map(|r| r.photon.z_geoid)
                .collect::<Vec<_>>(),
        );

        let levels = match self.policy {
            SeaSurfacePolicy::ConstantPerGranule => {
                let z: Vec<f64> = high_conf.iter().map(|&(_, z)| z).collect();
                vec![nan_median(&z); rows.len()]
            }
            SeaSurfacePolicy::RollingInterpolated { window } => {
                let knots = rolling_median_knots(&high_conf, window);
                rows.iter().map(|r| interpolate(&knots, r.dist_or)).collect()
            }
        };

        log::debug!(
            "Sea surface ({:?}): {} high-confidence photons, std {:.3} m",
            self.policy,
            high_conf.len(),
            std_dev
        );
        SeaSurfaceEstimate { levels, std_dev }
    }
}

/// Centred rolling median of `(dist, z)` samples, one knot per complete window.
/// The window is clamped to the number of samples.
fn rolling_median_knots(samples: &[(f64, f64)], window: usize) -> Vec<(f64, f64)> {
    let window = window.min(samples.len());
    let z: Vec<f64> = samples.iter().map(|&(_, z)| z).collect();
    (0..samples.len())
        .filter_map(|i| {
            let span = centered_span(i, window, samples.len())?;
            let level = nan_median(&z[span]);
            level.is_finite().then(|| (samples[i].0, level))
        })
        .collect()
}

/// Linear interpolation over knots sorted by distance, constant beyond the ends
fn interpolate(knots: &[(f64, f64)], dist: f64) -> f64 {
    let (first, last) = match (knots.first(), knots.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return f64::NAN,
    };
    if !dist.is_finite() {
        return f64::NAN;
    }
    if dist <= first.0 {
        return first.1;
    }
    if dist >= last.0 {
        return last.1;
    }
    let upper = knots.partition_point(|&(d, _)| d <= dist);
    let (d0, z0) = knots[upper - 1];
    let (d1, z1) = knots[upper];
    if d1 > d0 {
        z0 + (z1 - z0) * (dist - d0) / (d1 - d0)
    } else {
        z0
    }
}
