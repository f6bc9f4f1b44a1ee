use bathyfuse::core::kde::{KdeParams, WindowSpec};
use bathyfuse::core::photon_filter::FilterParams;
use bathyfuse::core::projection::UtmProjection;
use bathyfuse::core::refraction::{REFRACTIVE_INDEX_AIR, REFRACTIVE_INDEX_SEAWATER};
use bathyfuse::core::{AggregationParams, BeamStatus, GranuleBathymetryAggregator, GranuleStatus};
use bathyfuse::io::{BeamPhotons, InMemoryGranule, PriorGridSampler};
use bathyfuse::types::{Beam, BeamMetadata, BeamStrength, Crs, PhotonRecord};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::FRAC_PI_2;

const SEAFLOOR_PHOTONS: usize = 500;
const TRANSECT_LENGTH: f64 = 1000.0;
const SURFACE_EVERY: usize = 10;

struct ConstantPrior(f64);

impl PriorGridSampler for ConstantPrior {
    fn sample(&self, lonlat: &[(f64, f64)]) -> Vec<f64> {
        vec![self.0; lonlat.len()]
    }
}

/// Along-track distance of seafloor photon `i`
fn distance(i: usize) -> f64 {
    i as f64 * TRANSECT_LENGTH / SEAFLOOR_PHOTONS as f64
}

/// Generating profile; rises above sea level beyond roughly 733 m
fn profile(dist: f64) -> f64 {
    -5.0 - 10.0 * (dist / 200.0).sin()
}

fn photon(lon: f64, lat: f64, z: f64, delta_time: f64, conf: i8) -> PhotonRecord {
    PhotonRecord {
        x: lon,
        y: lat,
        z_ellip: z - 26.0,
        z_geoid: z,
        geoid_corr: -26.0,
        tide_ocean_corr: 0.0,
        geof2m_corr: 0.0,
        delta_time,
        oc_sig_conf: conf,
        land_sig_conf: 0,
        p_vec_az: 0.0,
        p_vec_elev: FRAC_PI_2,
        dac_corr: 0.0,
        ph_count: 25,
    }
}

/// 500 photons due north over 1000 m following `profile` with 0.3 m noise, plus
/// 50 sea-surface photons at 0 m. Seafloor photon `i` is acquired at `delta_time = i`.
fn sinusoidal_transect(granule: &str, seed: u64) -> BeamPhotons {
    let projection = UtmProjection::for_crs(Crs::Utm { zone: 17, north: true }).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let floor_noise = Normal::new(0.0, 0.3).unwrap();
    let surface_noise = Normal::new(0.0, 0.05).unwrap();

    let mut photons = Vec::new();
    for i in 0..SEAFLOOR_PHOTONS {
        let dist = distance(i);
        let (lon, lat) = projection.inverse(560_000.0, 2_730_000.0 + dist);
        if i % SURFACE_EVERY == 0 {
            photons.push(photon(lon, lat, surface_noise.sample(&mut rng), i as f64 - 0.5, 4));
        }
        photons.push(photon(lon, lat, profile(dist) + floor_noise.sample(&mut rng), i as f64, 1));
    }

    let metadata = BeamMetadata {
        granule_id: granule.to_string(),
        beam: Beam::Gt2r,
        atmosphere_profile: "2".to_string(),
        beam_type: BeamStrength::Strong,
        ocean_high_conf_perc: 75.0,
        data_start_utc: None,
    };
    BeamPhotons::new(metadata, photons).expect("transect times are increasing")
}

fn scenario_params() -> AggregationParams {
    AggregationParams {
        filter: FilterParams {
            low_limit: -20.0,
            high_limit: 2.0,
            filter_below_z: -20.0,
            filter_below_depth: -20.0,
            n: 1.0,
            ..FilterParams::default()
        },
        kde: KdeParams {
            window: WindowSpec::Points(50),
            ..KdeParams::default()
        },
        ..AggregationParams::default()
    }
}

#[test]
fn test_sinusoidal_profile_is_recovered() {
    let _ = env_logger::builder().is_test(true).try_init();

    let prior = ConstantPrior(-10.0);
    let aggregator = GranuleBathymetryAggregator::with_params(scenario_params(), &prior);
    let scale = REFRACTIVE_INDEX_AIR / REFRACTIVE_INDEX_SEAWATER;

    for seed in [7, 21] {
        let granule = InMemoryGranule::new("ATL03_scenario").with_beam(sinusoidal_transect("ATL03_scenario", seed));
        let result = aggregator.run(&[granule]).expect("Failed to run aggregation");
        println!("{}", result.summary());
        assert!(!result.is_empty());

        let mut errors = Vec::with_capacity(result.points.len());
        for p in &result.points {
            let i = p.delta_time.round() as usize;
            assert_eq!(p.delta_time, i as f64, "surface photon survived filtering");

            let dist = distance(i);
            assert!(dist < 745.0, "point at {} m where the profile is above sea level", dist);
            assert!(p.dist_or < 745.0);

            // z_kde is taken over refraction-corrected elevations: depth below the sea scales by n_air / n_water
            let sea = p.sea_level_interp;
            errors.push(p.z_kde - (sea + (profile(dist) - sea) * scale));
        }

        let rms = (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt();
        println!("Seed {}: {} points, RMS error {:.3} m", seed, errors.len(), rms);
        assert!(errors.len() >= 50, "only {} points accepted", errors.len());
        assert!(rms < 1.0, "RMS error {} m", rms);
    }
}

#[test]
fn test_granule_status_and_beam_accounting() {
    let _ = env_logger::builder().is_test(true).try_init();

    let granules = vec![
        InMemoryGranule::new("g_a").with_beam(sinusoidal_transect("g_a", 3)),
        InMemoryGranule::new("g_b"),
    ];
    let prior = ConstantPrior(-10.0);
    let aggregator = GranuleBathymetryAggregator::with_params(
        AggregationParams {
            beams: vec![Beam::Gt2r],
            ..scenario_params()
        },
        &prior,
    );

    let outcome = aggregator.process_granule(&granules[1]).unwrap();
    assert_eq!(outcome.status, GranuleStatus::Completed);
    assert_eq!(outcome.beams, vec![(Beam::Gt2r, BeamStatus::Missing)]);

    let result = aggregator.run(&granules).unwrap();
    let summary = result.summary();
    assert_eq!(summary.granules, 2);
    assert_eq!(summary.granules_timed_out, 0);
    assert_eq!(summary.beams.get("missing"), Some(&1));
    assert_eq!(summary.beams.get("accepted"), Some(&1));
    assert_eq!(summary.points, result.points.len());
    assert!(result.points.iter().all(|p| p.granule_id == "g_a"));
}

#[test]
fn test_prior_outside_nearshore_band_yields_nothing() {
    let granule = InMemoryGranule::new("deep").with_beam(sinusoidal_transect("deep", 5));
    let prior = ConstantPrior(-500.0);
    let aggregator = GranuleBathymetryAggregator::with_params(scenario_params(), &prior);
    let result = aggregator.run(&[granule]).unwrap();
    assert!(result.is_empty());
    assert!(result.summary().to_string().starts_with("no bathymetry points found"));
}
