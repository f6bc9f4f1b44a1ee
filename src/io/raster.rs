//! GeoTIFF input and output of prior and result grids
use crate::core::kalman::FusedGrid;
use crate::core::kriging::KrigedSurface;
use crate::io::prior_grid::GeoRaster;
use crate::types::{BathyError, BathyResult, Crs, GeoTransform, GridSpec};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Read band 1 of a raster; nodata values become NaN
pub fn read_geo_raster<P: AsRef<Path>>(path: P) -> BathyResult<GeoRaster> {
    log::info!("Reading prior grid from: {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;

    let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    let crs = match dataset.spatial_ref().and_then(|srs| srs.auth_code()) {
        Ok(code) if code > 0 => Crs::from_epsg(code as u32)?,
        _ => {
            log::warn!("Raster has no EPSG code, assuming WGS84");
            Crs::Wgs84
        }
    };
    log::debug!("Raster size: {}x{}, {}", width, height, crs);

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let band_data = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| BathyError::Processing(format!("Failed to reshape raster data: {}", e)))?;

    Ok(GeoRaster::new(data, geo_transform, crs, nodata))
}

/// Write elevation and variance as bands 1 and 2 of a float32 GeoTIFF
pub fn write_grid_pair<P: AsRef<Path>>(
    elevation: &Array2<f64>,
    variance: &Array2<f64>,
    spec: &GridSpec,
    output_path: P,
) -> BathyResult<()> {
    let (height, width) = elevation.dim();
    if variance.dim() != (height, width) || spec.shape() != (height, width) {
        return Err(BathyError::Processing(format!(
            "Cannot write {}x{} grids with variance {:?} on a {}x{} grid",
            height,
            width,
            variance.dim(),
            spec.height,
            spec.width
        )));
    }
    log::info!("Saving {}x{} grid as GeoTIFF: {}", width, height, output_path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<f32, _>(output_path.as_ref(), width as isize, height as isize, 2)?;
    dataset.set_geo_transform(&spec.transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(spec.crs.epsg())?)?;

    for (index, band) in [elevation, variance].into_iter().enumerate() {
        let mut rasterband = dataset.rasterband(index as isize + 1)?;
        let flat_data: Vec<f32> = band.iter().map(|&v| v as f32).collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(f64::NAN))?;
    }
    Ok(())
}

pub fn save_kriged_surface<P: AsRef<Path>>(surface: &KrigedSurface, output_path: P) -> BathyResult<()> {
    write_grid_pair(&surface.elevation, &surface.variance, &surface.grid, output_path)
}

pub fn save_fused_grid<P: AsRef<Path>>(fused: &FusedGrid, output_path: P) -> BathyResult<()> {
    let spec = fused
        .grid
        .ok_or_else(|| BathyError::InvalidInput("Fused grid has no georeference".to_string()))?;
    write_grid_pair(&fused.elevation, &fused.variance, &spec, output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_write_then_read_first_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        let spec = GridSpec {
            transform: GeoTransform::north_up(560_000.0, 2_731_000.0, 10.0),
            width: 3,
            height: 2,
            crs: Crs::Utm { zone: 17, north: true },
        };
        let elevation = array![[-1.0, -2.0, -3.0], [-4.0, f64::NAN, -6.0]];
        let variance = Array2::from_elem((2, 3), 0.5);
        write_grid_pair(&elevation, &variance, &spec, &path).unwrap();

        let raster = read_geo_raster(&path).unwrap();
        assert_eq!(raster.spec(), spec);
        assert_eq!(raster.data()[[1, 2]], -6.0);
        assert!(raster.data()[[1, 1]].is_nan());
    }
}
