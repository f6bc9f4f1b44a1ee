use crate::core::photon_table::{Column, PhotonTable};
use crate::core::refraction::correct_refraction;
use crate::core::sea_surface::{SeaSurfaceEstimator, SeaSurfacePolicy};
use crate::io::prior_grid::PriorGridSampler;
use crate::types::{BathyError, BathyResult};
use serde::{Deserialize, Serialize};

/// Photon filtering parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Prior-grid elevation lower bound of the nearshore zone (m, exclusive)
    pub low_limit: f64,
    /// Prior-grid elevation upper bound of the nearshore zone (m, exclusive)
    pub high_limit: f64,
    /// Sea-surface policy
    pub sea_surface: SeaSurfacePolicy,
    /// Beams with a sea surface at or above this elevation are dropped (m)
    pub max_sea_surf_elev: f64,
    /// Absolute elevation floor (m)
    pub filter_below_z: f64,
    /// Floor on elevation relative to the sea surface (m)
    pub filter_below_depth: f64,
    /// Surface band half-width in sea-surface standard deviations
    pub n: f64,
    /// Minimum surface band half-width (m)
    pub min_remove: f64,
    /// Elevation ceiling above the geoid (m)
    pub max_geoid_high_z: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            low_limit: -50.0,                            // Deeper than any lidar return
            high_limit: 6.0,                             // Keep the intertidal fringe
            sea_surface: SeaSurfacePolicy::default(),    // Median per beam
            max_sea_surf_elev: 2.0,                      // Suspicious sea surface
            filter_below_z: -40.0,                       // Beyond extinction depth
            filter_below_depth: -40.0,                   // Same, relative to sea level
            n: 1.0,                                      // One standard deviation
            min_remove: 1.0,                             // At least 1 m of surface band
            max_geoid_high_z: 5.0,                       // Land, clouds and birds
        }
    }
}

impl FilterParams {
    pub fn validate(&self) -> BathyResult<()> {
        if !(self.low_limit < self.high_limit) {
            return Err(BathyError::configuration(
                "nearshore",
                format!(
                    "low_limit ({}) must be below high_limit ({})",
                    self.low_limit, self.high_limit
                ),
            ));
        }
        if !(self.n >= 0.0) || !(self.min_remove >= 0.0) {
            return Err(BathyError::configuration(
                "surface_exclusion",
                "n and min_remove must be non-negative",
            ));
        }
        if let SeaSurfacePolicy::RollingInterpolated { window: 0 } = self.sea_surface {
            return Err(BathyError::configuration(
                "sea_surface",
                "rolling window must be positive",
            ));
        }
        Ok(())
    }
}

/// Everything a stage may read besides the table itself
pub struct FilterContext<'a> {
    pub params: &'a FilterParams,
    pub prior: &'a dyn PriorGridSampler,
}

impl<'a> FilterContext<'a> {
    pub fn new(params: &'a FilterParams, prior: &'a dyn PriorGridSampler) -> Self {
        Self { params, prior }
    }
}

pub type StageFn = fn(PhotonTable, &FilterContext<'_>) -> BathyResult<PhotonTable>;

/// One named step of the filter pipeline
#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    pub run: StageFn,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// Ordered photon filter stages, narrowing a beam to subsurface candidates
#[derive(Debug, Clone)]
pub struct PhotonFilterPipeline {
    stages: Vec<Stage>,
}

impl PhotonFilterPipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Prior-grid gating, sea surface, depth and surface filters, then refraction
    pub fn standard() -> Self {
        Self::new(vec![
            Stage { name: "attach_prior_elevation", run: attach_prior_elevation },
            Stage { name: "nearshore", run: filter_nearshore },
            Stage { name: "sea_surface", run: attach_sea_surface },
            Stage { name: "sea_surface_ceiling", run: filter_sea_surface_ceiling },
            Stage { name: "below_z", run: filter_below_z },
            Stage { name: "below_depth", run: filter_below_depth },
            Stage { name: "surface_exclusion", run: filter_surface_photons },
            Stage { name: "above_geoid", run: filter_above_geoid },
            Stage { name: "confidence", run: filter_low_confidence },
            Stage { name: "refraction", run: apply_refraction },
        ])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn run(&self, table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
        let input = table.len();
        let mut table = table;
        for stage in &self.stages {
            let before = table.len();
            table = (stage.run)(table, ctx)?;
            log::debug!("Stage '{}': {} -> {} photons", stage.name, before, table.len());
        }
        log::debug!("Photon filtering kept {} of {} photons", table.len(), input);
        Ok(table)
    }
}

impl Default for PhotonFilterPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

/// Sample the prior grid under every photon into `gebco_elev`
pub fn attach_prior_elevation(table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    let values = ctx.prior.sample(&table.lonlat());
    if values.len() != table.len() {
        return Err(BathyError::Processing(format!(
            "Prior grid returned {} values for {} photons",
            values.len(),
            table.len()
        )));
    }
    Ok(table.with_column(Column::GebcoElev, |i, row| row.gebco_elev = values[i]))
}

pub fn filter_nearshore(table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    table.require_column(Column::GebcoElev, "nearshore")?;
    let (low, high) = (ctx.params.low_limit, ctx.params.high_limit);
    Ok(table.filter(|r| r.gebco_elev > low && r.gebco_elev < high))
}

pub fn attach_sea_surface(table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    let estimate = SeaSurfaceEstimator::new(ctx.params.sea_surface).estimate(&table);
    Ok(table.with_column(Column::SeaLevel, |i, row| {
        row.sea_level_interp = estimate.levels[i];
        row.sea_level_std_dev = estimate.std_dev;
    }))
}

pub fn filter_sea_surface_ceiling(table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    table.require_column(Column::SeaLevel, "sea_surface_ceiling")?;
    let ceiling = ctx.params.max_sea_surf_elev;
    Ok(table.filter(|r| r.sea_level_interp < ceiling))
}

pub fn filter_below_z(table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    let floor = ctx.params.filter_below_z;
    Ok(table.filter(|r| r.photon.z_geoid > floor))
}

pub fn filter_below_depth(table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    table.require_column(Column::SeaLevel, "below_depth")?;
    let floor = ctx.params.filter_below_depth;
    Ok(table.filter(|r| r.photon.z_geoid - r.sea_level_interp > floor))
}

/// Drop the sea-surface band `max(n * std, min_remove)` below the sea level and everything above it.
/// An undefined spread falls back to `min_remove`.
pub fn filter_surface_photons(table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    table.require_column(Column::SeaLevel, "surface_exclusion")?;
    let (n, min_remove) = (ctx.params.n, ctx.params.min_remove);
    Ok(table.filter(|r| {
        let band = (n * r.sea_level_std_dev).max(min_remove);
        r.photon.z_geoid < r.sea_level_interp - band
    }))
}

pub fn filter_above_geoid(table: PhotonTable, ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    let ceiling = ctx.params.max_geoid_high_z;
    Ok(table.filter(|r| r.photon.z_geoid < ceiling))
}

/// Drop transmitter echo path and non-associated photons
pub fn filter_low_confidence(table: PhotonTable, _ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    Ok(table.filter(|r| r.photon.oc_sig_conf >= 0))
}

pub fn apply_refraction(table: PhotonTable, _ctx: &FilterContext<'_>) -> BathyResult<PhotonTable> {
    table.require_column(Column::SeaLevel, "refraction")?;
    Ok(table.with_column(Column::Refraction, |_, row| {
        let shift = correct_refraction(row.depth(), row.photon.p_vec_az, row.photon.p_vec_elev);
        row.z_refr = row.photon.z_geoid + shift.vertical;
        row.easting_corr = shift.easting;
        row.northing_corr = shift.northing;
    }))
}
