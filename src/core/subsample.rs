use crate::types::{BathyError, BathyResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point thinning strategy applied before kriging
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SubsampleMethod {
    /// Poisson-disk style thinning with a shrinking exclusion radius
    RelaxationDartThrowing {
        decay: f64,
        /// Starting exclusion radius; `sqrt(bbox_area / count)` when absent
        initial_radius: Option<f64>,
    },
    /// Uniform sample without replacement
    Random,
}

impl Default for SubsampleMethod {
    fn default() -> Self {
        SubsampleMethod::RelaxationDartThrowing {
            decay: 0.9,
            initial_radius: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsampleParams {
    /// Target number of points
    pub count: usize,
    pub method: SubsampleMethod,
    pub seed: u64,
}

impl Default for SubsampleParams {
    fn default() -> Self {
        Self {
            count: 2000,
            method: SubsampleMethod::default(),
            seed: 0,
        }
    }
}

impl SubsampleParams {
    pub fn validate(&self) -> BathyResult<()> {
        if self.count == 0 {
            return Err(BathyError::configuration("subsample", "count must be positive"));
        }
        if let SubsampleMethod::RelaxationDartThrowing { decay, initial_radius } = self.method {
            if !(decay > 0.0 && decay < 1.0) {
                return Err(BathyError::configuration(
                    "subsample",
                    format!("decay {} must lie in (0, 1)", decay),
                ));
            }
            if let Some(r) = initial_radius {
                if !(r > 0.0) {
                    return Err(BathyError::configuration("subsample", "initial_radius must be positive"));
                }
            }
        }
        Ok(())
    }
}

/// Spatially decorrelating point selector
#[derive(Debug, Clone, Default)]
pub struct SpatialSubsampler {
    params: SubsampleParams,
}

impl SpatialSubsampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: SubsampleParams) -> Self {
        Self { params }
    }

    /// Sorted indices of the selected points. Asking for at least as many
    /// points as available selects all of them.
    pub fn select(&self, points: &[(f64, f64)]) -> BathyResult<Vec<usize>> {
        self.params.validate()?;
        let n = points.len();
        let count = self.params.count;
        if count >= n {
            log::debug!("Subsample of {} requested from {} points, using all", count, n);
            return Ok((0..n).collect());
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut selected = match self.params.method {
            SubsampleMethod::Random => rand::seq::index::sample(&mut rng, n, count).into_vec(),
            SubsampleMethod::RelaxationDartThrowing { decay, initial_radius } => {
                let mut order: Vec<usize> = (0..n).collect();
                order.shuffle(&mut rng);
                let radius = initial_radius.unwrap_or_else(|| default_radius(points, count));
                dart_throwing(points, &order, count, radius, decay)
            }
        };
        selected.sort_unstable();
        log::info!("Subsampled {} of {} points ({:?})", selected.len(), n, self.params.method);
        Ok(selected)
    }
}

/// `sqrt(area / count)` of the bounding box of the points
fn default_radius(points: &[(f64, f64)], count: usize) -> f64 {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    let area = (max_x - min_x) * (max_y - min_y);
    if area > 0.0 {
        (area / count as f64).sqrt()
    } else {
        // collinear points: spread the count along the longer side
        (max_x - min_x).max(max_y - min_y) / count as f64
    }
}

/// Visit points in `order`, accepting those farther than `radius` from every accepted point.
/// A pass that ends short restarts with the radius shrunk by `decay`.
fn dart_throwing(points: &[(f64, f64)], order: &[usize], count: usize, mut radius: f64, decay: f64) -> Vec<usize> {
    let mut passes = 0;
    loop {
        passes += 1;
        if !(radius > 1e-9) {
            return order.iter().take(count).copied().collect();
        }

        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        let mut accepted = Vec::with_capacity(count);
        let cell = |x: f64, y: f64| ((x / radius).floor() as i64, (y / radius).floor() as i64);

        for &idx in order {
            if accepted.len() == count {
                break;
            }
            let (x, y) = points[idx];
            let (cx, cy) = cell(x, y);
            let blocked = (cx - 1..=cx + 1).any(|gx| {
                (cy - 1..=cy + 1).any(|gy| {
                    grid.get(&(gx, gy)).map_or(false, |members| {
                        members.iter().any(|&j| {
                            let (px, py) = points[j];
                            (px - x).powi(2) + (py - y).powi(2) < radius * radius
                        })
                    })
                })
            });
            if !blocked {
                grid.entry((cx, cy)).or_default().push(idx);
                accepted.push(idx);
            }
        }

        if accepted.len() == count {
            log::debug!("Dart throwing converged after {} passes at radius {:.3}", passes, radius);
            return accepted;
        }
        radius *= decay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points(side: usize, spacing: f64) -> Vec<(f64, f64)> {
        (0..side * side)
            .map(|i| ((i % side) as f64 * spacing, (i / side) as f64 * spacing))
            .collect()
    }

    #[test]
    fn test_request_more_than_available_returns_all() {
        let points = grid_points(3, 1.0);
        let sampler = SpatialSubsampler::with_params(SubsampleParams {
            count: 50,
            ..SubsampleParams::default()
        });
        assert_eq!(sampler.select(&points).unwrap(), (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_dart_throwing_is_spread_out() {
        let points = grid_points(30, 1.0);
        let sampler = SpatialSubsampler::with_params(SubsampleParams {
            count: 100,
            seed: 42,
            ..SubsampleParams::default()
        });
        let selected = sampler.select(&points).unwrap();
        assert_eq!(selected.len(), 100);
        let mut deduped = selected.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), 100);

        // no two selected points are grid neighbours
        let min_dist = selected
            .iter()
            .flat_map(|&a| selected.iter().filter(move |&&b| b != a).map(move |&b| (a, b)))
            .map(|(a, b)| {
                let (pa, pb) = (points[a], points[b]);
                ((pa.0 - pb.0).powi(2) + (pa.1 - pb.1).powi(2)).sqrt()
            })
            .fold(f64::INFINITY, f64::min);
        assert!(min_dist > 1.0, "min distance {}", min_dist);
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let points = grid_points(20, 2.0);
        for method in [SubsampleMethod::Random, SubsampleMethod::default()] {
            let params = SubsampleParams { count: 40, method, seed: 9 };
            let a = SpatialSubsampler::with_params(params.clone()).select(&points).unwrap();
            let b = SpatialSubsampler::with_params(params).select(&points).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.len(), 40);
        }
    }

    #[test]
    fn test_invalid_decay() {
        let sampler = SpatialSubsampler::with_params(SubsampleParams {
            method: SubsampleMethod::RelaxationDartThrowing {
                decay: 1.5,
                initial_radius: None,
            },
            ..SubsampleParams::default()
        });
        assert!(sampler.select(&[(0.0, 0.0)]).is_err());
    }
}
