//! Photon sources, prior grids and result persistence

pub mod persist;
pub mod photon_source;
pub mod prior_grid;
#[cfg(feature = "gdal")]
pub mod raster;

pub use persist::{load_points, read_geojson, save_points, write_geojson};
pub use photon_source::{BeamPhotons, InMemoryGranule, PhotonSource, RawPhotonArrays, SegmentArrays};
pub use prior_grid::{GeoRaster, PriorGridSampler, DEFAULT_VALID_RANGE, GEBCO_NODATA};
#[cfg(feature = "gdal")]
pub use raster::{read_geo_raster, save_fused_grid, save_kriged_surface, write_grid_pair};
