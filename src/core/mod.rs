//! Core bathymetry processing modules

pub mod aggregate;
pub mod deadline;
pub mod kalman;
pub mod kde;
pub mod kriging;
pub mod photon_filter;
pub mod photon_table;
pub mod projection;
pub mod refraction;
pub mod run;
pub mod sea_surface;
pub mod stats;
pub mod subsample;
pub mod validation;

// Re-export main types
pub use aggregate::{
    AggregatedBathymetry, AggregationParams, BeamStatus, GranuleBathymetryAggregator, GranuleOutcome,
    GranuleStatus, RunSummary,
};
pub use deadline::Deadline;
pub use kalman::{kalman_update, FusedGrid, FusionParams, SequentialGridFusion};
pub use kde::{GaussianKde, KdeParams, RollingKde, WindowEstimate, WindowSpec};
pub use kriging::{
    ElevationField, ExperimentalVariogram, KrigedSurface, Kriger, KrigingMethod, KrigingParams, SurveyPoints,
    Variogram, VariogramModel,
};
pub use photon_filter::{FilterContext, FilterParams, PhotonFilterPipeline, Stage};
pub use photon_table::{neighbor_counts, Column, PhotonRow, PhotonTable};
pub use projection::{reproject_point, UtmProjection};
pub use refraction::{correct_refraction, RefractionShift};
pub use run::{SiteComparison, SiteFusionRun, SiteRunOutput};
pub use sea_surface::{SeaSurfaceEstimate, SeaSurfaceEstimator, SeaSurfacePolicy};
pub use subsample::{SpatialSubsampler, SubsampleMethod, SubsampleParams};
pub use validation::{error_metrics, grid_error, point_error_metrics, ErrorMetrics, GridError};
