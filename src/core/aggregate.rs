use crate::core::deadline::Deadline;
use crate::core::kde::{KdeParams, RollingKde};
use crate::core::photon_filter::{FilterContext, FilterParams, PhotonFilterPipeline};
use crate::core::photon_table::PhotonTable;
use crate::io::photon_source::{BeamPhotons, PhotonSource};
use crate::io::prior_grid::PriorGridSampler;
use crate::types::{BathyError, BathyResult, BathymetryPoint, Beam};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Granule/beam aggregation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationParams {
    pub filter: FilterParams,
    pub kde: KdeParams,
    /// Minimum percentage of high-confidence ocean photons for a beam to be processed
    pub req_perc_hconf: f64,
    /// Accepted points need a segment photon count above this
    pub min_ph_count: i32,
    /// Beams to process; empty means every beam the granule advertises
    pub beams: Vec<Beam>,
    /// Per-granule processing time limit in seconds
    pub granule_timeout_secs: Option<u64>,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            filter: FilterParams::default(),
            kde: KdeParams::default(),
            req_perc_hconf: 0.0,      // Keep every beam
            min_ph_count: 0,
            beams: Vec::new(),
            granule_timeout_secs: None,
        }
    }
}

impl AggregationParams {
    pub fn validate(&self) -> BathyResult<()> {
        self.filter.validate()?;
        self.kde.validate()?;
        if !(0.0..=100.0).contains(&self.req_perc_hconf) {
            return Err(BathyError::configuration(
                "beam_gating",
                format!("req_perc_hconf {} is not a percentage", self.req_perc_hconf),
            ));
        }
        Ok(())
    }

    pub fn granule_timeout(&self) -> Option<Duration> {
        self.granule_timeout_secs.map(Duration::from_secs)
    }
}

/// What happened to one beam of a granule
#[derive(Debug, Clone, PartialEq)]
pub enum BeamStatus {
    Accepted(usize),
    Missing,
    LowConfidence(f64),
    NoSignal,
    Failed(String),
}

impl BeamStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BeamStatus::Accepted(_) => "accepted",
            BeamStatus::Missing => "missing",
            BeamStatus::LowConfidence(_) => "low_confidence",
            BeamStatus::NoSignal => "no_signal",
            BeamStatus::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GranuleStatus {
    Completed,
    TimedOut(Duration),
}

/// Result of one granule task
#[derive(Debug, Clone)]
pub struct GranuleOutcome {
    pub granule_id: String,
    pub status: GranuleStatus,
    pub beams: Vec<(Beam, BeamStatus)>,
    pub points: Vec<BathymetryPoint>,
}

/// Counts describing an aggregation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub granules: usize,
    pub granules_timed_out: usize,
    pub beams: BTreeMap<&'static str, usize>,
    pub points: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.points == 0 {
            write!(f, "no bathymetry points found")?;
        } else {
            write!(f, "{} bathymetry points", self.points)?;
        }
        write!(
            f,
            " ({} granules, {} timed out; beams:",
            self.granules, self.granules_timed_out
        )?;
        for (label, count) in &self.beams {
            write!(f, " {}={}", label, count)?;
        }
        write!(f, ")")
    }
}

/// Bathymetry points of a whole run, flattened over granules and beams
#[derive(Debug, Clone, Default)]
pub struct AggregatedBathymetry {
    pub points: Vec<BathymetryPoint>,
    summary: RunSummary,
}

impl AggregatedBathymetry {
    pub fn from_outcomes(outcomes: Vec<GranuleOutcome>) -> Self {
        let mut summary = RunSummary {
            granules: outcomes.len(),
            ..RunSummary::default()
        };
        let mut points = Vec::new();
        for outcome in outcomes {
            if let GranuleStatus::TimedOut(_) = outcome.status {
                summary.granules_timed_out += 1;
            }
            for (_, status) in &outcome.beams {
                *summary.beams.entry(status.label()).or_insert(0) += 1;
            }
            points.extend(outcome.points);
        }
        summary.points = points.len();
        Self { points, summary }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Runs photon filtering and rolling KDE over every beam of every granule
pub struct GranuleBathymetryAggregator<'a> {
    params: AggregationParams,
    pipeline: PhotonFilterPipeline,
    kde: RollingKde,
    prior: &'a dyn PriorGridSampler,
}

impl<'a> GranuleBathymetryAggregator<'a> {
    pub fn new(prior: &'a dyn PriorGridSampler) -> Self {
        Self::with_params(AggregationParams::default(), prior)
    }

    pub fn with_params(params: AggregationParams, prior: &'a dyn PriorGridSampler) -> Self {
        let kde = RollingKde::with_params(params.kde.clone());
        Self {
            params,
            pipeline: PhotonFilterPipeline::standard(),
            kde,
            prior,
        }
    }

    pub fn params(&self) -> &AggregationParams {
        &self.params
    }

    /// Process all granules, one task per granule.
    ///
    /// Configuration and CRS errors abort the run; anything else only costs its beam or granule.
    #[cfg(feature = "parallel")]
    pub fn run<S: PhotonSource>(&self, sources: &[S]) -> BathyResult<AggregatedBathymetry> {
        use rayon::prelude::*;

        self.params.validate()?;
        log::info!("Extracting bathymetry from {} granules in parallel", sources.len());
        let outcomes = sources
            .par_iter()
            .map(|source| self.process_granule(source))
            .collect::<BathyResult<Vec<_>>>()?;
        Ok(self.finish(outcomes))
    }

    /// Process all granules, one after another
    #[cfg(not(feature = "parallel"))]
    pub fn run<S: PhotonSource>(&self, sources: &[S]) -> BathyResult<AggregatedBathymetry> {
        self.params.validate()?;
        log::info!("Extracting bathymetry from {} granules", sources.len());
        let outcomes = sources
            .iter()
            .map(|source| self.process_granule(source))
            .collect::<BathyResult<Vec<_>>>()?;
        Ok(self.finish(outcomes))
    }

    fn finish(&self, outcomes: Vec<GranuleOutcome>) -> AggregatedBathymetry {
        let aggregated = AggregatedBathymetry::from_outcomes(outcomes);
        log::info!("Run summary: {}", aggregated.summary());
        aggregated
    }

    /// Process the beams of one granule sequentially
    pub fn process_granule<S: PhotonSource + ?Sized>(&self, source: &S) -> BathyResult<GranuleOutcome> {
        let granule_id = source.granule_id().to_string();
        let deadline = Deadline::new(granule_id.clone(), self.params.granule_timeout());
        let beams = if self.params.beams.is_empty() {
            source.beams()
        } else {
            self.params.beams.clone()
        };

        let mut outcome = GranuleOutcome {
            granule_id: granule_id.clone(),
            status: GranuleStatus::Completed,
            beams: Vec::with_capacity(beams.len()),
            points: Vec::new(),
        };

        for beam in beams {
            let result = deadline.check().and_then(|_| self.process_beam(source, beam, &deadline));
            match result {
                Ok((status, points)) => {
                    if let BeamStatus::Accepted(n) = status {
                        log::debug!("{}/{}: {} bathymetry points", granule_id, beam, n);
                    } else {
                        log::warn!("{}/{}: skipped ({:?})", granule_id, beam, status);
                    }
                    outcome.beams.push((beam, status));
                    outcome.points.extend(points);
                }
                Err(BathyError::Timeout { limit, .. }) => {
                    log::warn!(
                        "{}: exceeded time limit of {:?} at beam {}, discarding granule",
                        granule_id,
                        limit,
                        beam
                    );
                    outcome.status = GranuleStatus::TimedOut(limit);
                    outcome.points.clear();
                    return Ok(outcome);
                }
                Err(e) if e.is_fatal() => {
                    log::error!("{}/{}: {}", granule_id, beam, e);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("{}/{}: {}", granule_id, beam, e);
                    outcome.beams.push((beam, BeamStatus::Failed(e.to_string())));
                }
            }
        }
        log::info!(
            "{}: {} points from {} beams in {:.2}s",
            granule_id,
            outcome.points.len(),
            outcome.beams.len(),
            deadline.elapsed().as_secs_f64()
        );
        Ok(outcome)
    }

    fn process_beam<S: PhotonSource + ?Sized>(
        &self,
        source: &S,
        beam: Beam,
        deadline: &Deadline,
    ) -> BathyResult<(BeamStatus, Vec<BathymetryPoint>)> {
        let photons = match source.load_beam(beam) {
            Ok(Some(photons)) => photons,
            Ok(None) | Err(BathyError::MissingBeam { .. }) => return Ok((BeamStatus::Missing, Vec::new())),
            Err(e) => return Err(e),
        };

        let hconf = photons.metadata().ocean_high_conf_perc;
        if hconf < self.params.req_perc_hconf {
            return Ok((BeamStatus::LowConfidence(hconf), Vec::new()));
        }

        let points = self.extract_beam(&photons, deadline)?;
        if points.is_empty() {
            Ok((BeamStatus::NoSignal, points))
        } else {
            Ok((BeamStatus::Accepted(points.len()), points))
        }
    }

    /// Filter, window and threshold one beam into bathymetry points
    pub fn extract_beam(&self, photons: &BeamPhotons, deadline: &Deadline) -> BathyResult<Vec<BathymetryPoint>> {
        let ctx = FilterContext::new(&self.params.filter, self.prior);
        let table = self.pipeline.run(PhotonTable::from_beam(photons)?, &ctx)?;
        if table.is_empty() {
            return Ok(Vec::new());
        }

        let estimates = self.kde.extract(&table, deadline)?;
        let threshold = self.kde.acceptance_threshold(&estimates);
        log::debug!(
            "{}/{}: KDE acceptance threshold {:.4}",
            photons.metadata().granule_id,
            photons.metadata().beam,
            threshold
        );

        let metadata = photons.metadata();
        let crs = table.crs();
        let points = table
            .rows()
            .iter()
            .zip(&estimates)
            .filter(|(row, est)| {
                est.kde_val > threshold && row.photon.ph_count.abs() > self.params.min_ph_count
            })
            .map(|(row, est)| BathymetryPoint {
                z_kde: est.z_kde,
                kde_val: est.kde_val,
                sf_elev_msl: est.z_kde - row.sea_level_interp,
                easting: row.easting + row.easting_corr,
                northing: row.northing + row.northing_corr,
                easting_raw: row.easting,
                northing_raw: row.northing,
                crs,
                lon: row.photon.x,
                lat: row.photon.y,
                dist_or: row.dist_or,
                sea_level_interp: row.sea_level_interp,
                ph_count: row.photon.ph_count,
                delta_time: row.photon.delta_time,
                granule_id: metadata.granule_id.clone(),
                beam: metadata.beam,
                atm_profile: metadata.atmosphere_profile.clone(),
                beam_type: metadata.beam_type,
                oc_hconf_perc: metadata.ocean_high_conf_perc,
            })
            .collect();
        Ok(points)
    }
}
