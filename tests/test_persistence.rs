use approx::assert_abs_diff_eq;
use bathyfuse::core::kriging::{ElevationField, SurveyPoints};
use bathyfuse::core::projection::UtmProjection;
use bathyfuse::core::validation::point_error_metrics;
use bathyfuse::io::{load_points, save_points, GeoRaster};
use bathyfuse::types::{BathymetryPoint, Beam, BeamStrength, Crs, GeoTransform};
use ndarray::Array2;

fn transect(n: usize) -> Vec<BathymetryPoint> {
    let projection = UtmProjection::for_crs(Crs::Utm { zone: 17, north: true }).unwrap();
    (0..n)
        .map(|i| {
            let lon = -80.42;
            let lat = 24.65 + i as f64 * 1e-4;
            let (e, n) = projection.forward(lon, lat);
            let z = -6.0 - 0.1 * i as f64;
            BathymetryPoint {
                z_kde: z,
                kde_val: 0.3 + 0.01 * i as f64,
                sf_elev_msl: z - 0.2,
                easting: e + 0.4,
                northing: n - 0.1,
                easting_raw: e,
                northing_raw: n,
                crs: projection.crs(),
                lon,
                lat,
                dist_or: i as f64 * 11.1,
                sea_level_interp: 0.2,
                ph_count: 20 + i as i32,
                delta_time: 8.1e7 + i as f64 * 0.01,
                granule_id: "ATL03_20210315093012_12561002_005_01".to_string(),
                beam: Beam::Gt1r,
                atm_profile: "1".to_string(),
                beam_type: BeamStrength::Strong,
                oc_hconf_perc: 88.0,
            }
        })
        .collect()
}

#[test]
fn test_saved_points_load_back() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bathymetry.geojson");
    let points = transect(25);
    save_points(&points, &path).expect("Failed to save points");

    let loaded = load_points(&path).expect("Failed to load points");
    assert_eq!(loaded.len(), points.len());
    for (a, b) in loaded.iter().zip(&points) {
        assert_abs_diff_eq!(a.easting, b.easting, epsilon = 1e-6);
        assert_abs_diff_eq!(a.northing, b.northing, epsilon = 1e-6);
        assert_abs_diff_eq!(a.z_kde, b.z_kde, epsilon = 1e-12);
        assert_abs_diff_eq!(a.delta_time, b.delta_time, epsilon = 1e-6);
        assert_eq!(a.crs, b.crs);
        assert_eq!(a.beam, b.beam);
        assert_eq!(a.beam_type, b.beam_type);
        assert_eq!(a.ph_count, b.ph_count);
        assert_eq!(a.granule_id, b.granule_id);
    }

    let survey = SurveyPoints::from_bathymetry(&loaded, ElevationField::SfElevMsl).unwrap();
    assert_eq!(survey.crs, Crs::Utm { zone: 17, north: true });
    assert_eq!(survey.z[3], loaded[3].sf_elev_msl);
    assert_eq!(survey.x[3], loaded[3].easting);
}

#[test]
fn test_empty_collection_and_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.geojson");
    save_points(&[], &path).unwrap();
    assert!(load_points(&path).unwrap().is_empty());

    assert!(load_points(dir.path().join("absent.geojson")).is_err());
}

#[test]
fn test_loaded_points_against_reference_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("points.geojson");
    save_points(&transect(10), &path).unwrap();
    let points = load_points(&path).unwrap();

    let reference = GeoRaster::new(
        Array2::from_elem((50, 50), -7.0),
        GeoTransform::north_up(-80.5, 24.7, 0.005),
        Crs::Wgs84,
        None,
    );
    let metrics = point_error_metrics(&points, &reference).unwrap();
    assert_eq!(metrics.count, 10);
    // sf_elev_msl runs from -6.2 to -7.1
    assert_abs_diff_eq!(metrics.mean_error, 0.35, epsilon = 1e-9);
    assert_abs_diff_eq!(metrics.median_abs_error, 0.35, epsilon = 1e-9);
}
