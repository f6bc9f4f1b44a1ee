use crate::core::projection::reproject_point;
use crate::types::{BathyError, BathyResult, Crs, GeoTransform, GridSpec};
use ndarray::Array2;

/// GEBCO stores missing elevations with this sentinel
pub const GEBCO_NODATA: f64 = -32767.0;

/// Physically plausible nearshore elevation range (m) kept when subsetting the prior grid
pub const DEFAULT_VALID_RANGE: (f64, f64) = (-40.0, 2.0);

/// Samples a raster at WGS84 lon/lat positions, one value per point, NaN where unavailable
pub trait PriorGridSampler: Send + Sync {
    fn sample(&self, lonlat: &[(f64, f64)]) -> Vec<f64>;
}

/// Single-band raster held in memory with nodata already converted to NaN
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRaster {
    data: Array2<f64>,
    transform: GeoTransform,
    crs: Crs,
}

impl GeoRaster {
    /// Build a raster, replacing `nodata` and the GEBCO sentinel by NaN
    pub fn new(mut data: Array2<f64>, transform: GeoTransform, crs: Crs, nodata: Option<f64>) -> Self {
        data.mapv_inplace(|v| {
            if Some(v) == nodata || v == GEBCO_NODATA {
                f64::NAN
            } else {
                v
            }
        });
        Self { data, transform, crs }
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn spec(&self) -> GridSpec {
        let (height, width) = self.data.dim();
        GridSpec {
            transform: self.transform,
            width,
            height,
            crs: self.crs,
        }
    }

    pub fn into_data(self) -> Array2<f64> {
        self.data
    }

    /// Value of the cell containing the map position, NaN outside the raster
    pub fn value_at(&self, x: f64, y: f64) -> f64 {
        let (col, row) = self.transform.map_to_pixel(x, y);
        let (height, width) = self.data.dim();
        if !(col >= 0.0 && row >= 0.0 && col < width as f64 && row < height as f64) {
            return f64::NAN;
        }
        self.data[[row as usize, col as usize]]
    }

    /// Bilinear interpolation between cell centres, NaN outside the raster or next to nodata
    pub fn bilinear_at(&self, x: f64, y: f64) -> f64 {
        let (height, width) = self.data.dim();
        if width == 0 || height == 0 {
            return f64::NAN;
        }
        let (col, row) = self.transform.map_to_pixel(x, y);
        if !(col >= 0.0 && row >= 0.0 && col <= width as f64 && row <= height as f64) {
            return f64::NAN;
        }

        // Half-cell borders clamp to the edge centres
        let cx = (col - 0.5).clamp(0.0, (width - 1) as f64);
        let cy = (row - 0.5).clamp(0.0, (height - 1) as f64);

        let x1 = cx.floor() as usize;
        let y1 = cy.floor() as usize;
        let x2 = (x1 + 1).min(width - 1);
        let y2 = (y1 + 1).min(height - 1);
        let dx = cx - x1 as f64;
        let dy = cy - y1 as f64;

        let v11 = self.data[[y1, x1]];
        let v21 = self.data[[y1, x2]];
        let v12 = self.data[[y2, x1]];
        let v22 = self.data[[y2, x2]];

        v11 * (1.0 - dx) * (1.0 - dy) + v21 * dx * (1.0 - dy) + v12 * (1.0 - dx) * dy + v22 * dx * dy
    }

    /// Resample (bilinear) and reproject onto `target`, masking values outside `valid_range`
    pub fn subset_to_grid(&self, target: &GridSpec, valid_range: (f64, f64)) -> BathyResult<GeoRaster> {
        let (min_valid, max_valid) = valid_range;
        if !(min_valid < max_valid) {
            return Err(BathyError::InvalidInput(format!(
                "Invalid valid range ({}, {})",
                min_valid, max_valid
            )));
        }
        log::info!(
            "Subsetting prior grid onto {}x{} cells in {}",
            target.width,
            target.height,
            target.crs
        );

        let mut data = Array2::from_elem(target.shape(), f64::NAN);
        let mut valid = 0usize;
        for row in 0..target.height {
            for col in 0..target.width {
                let (x, y) = target.transform.cell_center(row, col);
                let (sx, sy) = reproject_point(x, y, target.crs, self.crs)?;
                let value = self.bilinear_at(sx, sy);
                if value.is_finite() && value >= min_valid && value <= max_valid {
                    data[[row, col]] = value;
                    valid += 1;
                }
            }
        }

        let coverage = valid as f64 / (target.width * target.height) as f64 * 100.0;
        log::debug!("Prior grid subset coverage: {:.1}%", coverage);

        Ok(GeoRaster {
            data,
            transform: target.transform,
            crs: target.crs,
        })
    }
}

impl PriorGridSampler for GeoRaster {
    fn sample(&self, lonlat: &[(f64, f64)]) -> Vec<f64> {
        lonlat
            .iter()
            .map(|&(lon, lat)| match reproject_point(lon, lat, Crs::Wgs84, self.crs) {
                Ok((x, y)) => self.value_at(x, y),
                Err(_) => f64::NAN,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn wgs84_raster() -> GeoRaster {
        // 0.01 degree cells starting at (-80.6, 24.8)
        let transform = GeoTransform {
            top_left_x: -80.6,
            pixel_width: 0.01,
            rotation_x: 0.0,
            top_left_y: 24.8,
            rotation_y: 0.0,
            pixel_height: -0.01,
        };
        GeoRaster::new(
            array![[-10.0, -12.0, -32767.0], [-14.0, -16.0, 5.0]],
            transform,
            Crs::Wgs84,
            Some(-9999.0),
        )
    }

    #[test]
    fn test_nodata_becomes_nan() {
        let raster = wgs84_raster();
        assert!(raster.data()[[0, 2]].is_nan());
        assert_eq!(raster.data()[[1, 2]], 5.0);
    }

    #[test]
    fn test_sampler_uses_containing_cell() {
        let raster = wgs84_raster();
        let values = raster.sample(&[(-80.595, 24.795), (-80.585, 24.785), (-80.575, 24.795), (-81.0, 24.7)]);
        assert_eq!(values[0], -10.0);
        assert_eq!(values[1], -16.0);
        assert!(values[2].is_nan());
        assert!(values[3].is_nan());
    }

    #[test]
    fn test_bilinear_between_centres() {
        let raster = wgs84_raster();
        // halfway between the centres of cells (0,0) and (0,1)
        let v = raster.bilinear_at(-80.59, 24.795);
        assert!((v - (-11.0)).abs() < 1e-9);
        // centre of the 2x2 block of finite cells
        let v = raster.bilinear_at(-80.59, 24.79);
        assert!((v - (-13.0)).abs() < 1e-9);
    }

    #[test]
    fn test_subset_masks_out_of_range_values() {
        let raster = wgs84_raster();
        let target = GridSpec {
            transform: GeoTransform {
                top_left_x: -80.6,
                pixel_width: 0.01,
                rotation_x: 0.0,
                top_left_y: 24.8,
                rotation_y: 0.0,
                pixel_height: -0.01,
            },
            width: 3,
            height: 2,
            crs: Crs::Wgs84,
        };
        let subset = raster.subset_to_grid(&target, DEFAULT_VALID_RANGE).unwrap();
        assert_eq!(subset.data()[[0, 0]], -10.0);
        assert_eq!(subset.data()[[1, 1]], -16.0);
        // above +2 m is masked
        assert!(subset.data()[[1, 2]].is_nan());
        assert!(raster.subset_to_grid(&target, (1.0, -1.0)).is_err());
    }

    #[test]
    fn test_empty_raster_interpolates_to_nan() {
        let transform = GeoTransform::north_up(-80.6, 24.8, 0.01);
        let empty_rows = GeoRaster::new(Array2::zeros((0, 3)), transform, Crs::Wgs84, None);
        let empty_cols = GeoRaster::new(Array2::zeros((2, 0)), transform, Crs::Wgs84, None);
        for raster in [&empty_rows, &empty_cols] {
            assert!(raster.bilinear_at(-80.6, 24.8).is_nan());
            assert!(raster.value_at(-80.6, 24.8).is_nan());
        }
    }
}
