//! bathyfuse: nearshore bathymetry from ICESat-2 photons
//!
//! Geolocated ATL03 photons are filtered, refraction corrected and reduced to
//! seafloor elevations with a rolling kernel density estimate. The resulting
//! points are kriged onto a regular grid and fused into a prior global
//! bathymetry grid (GEBCO) with a cell-wise Kalman update.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    BathyError, BathyResult, BathymetryPoint, Beam, BeamMetadata, BeamStrength, Crs, GeoTransform, GridSpec,
    PhotonRecord,
};

pub use config::RunConfig;
pub use crate::core::SiteFusionRun;
pub use io::{GeoRaster, InMemoryGranule, PhotonSource, PriorGridSampler};
