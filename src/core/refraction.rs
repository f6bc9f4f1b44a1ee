//! Refraction correction of subsurface photon positions (Parrish et al. 2019,
//! doi:10.3390/rs11141634), including the Earth-curvature term on the incidence angle.

/// Refractive index of air
pub const REFRACTIVE_INDEX_AIR: f64 = 1.00029;
/// Refractive index of sea water
pub const REFRACTIVE_INDEX_SEAWATER: f64 = 1.34116;
/// Nominal ICESat-2 orbital altitude (m)
pub const ICESAT2_ALTITUDE: f64 = 496_000.0;
/// Mean Earth radius (m)
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Position corrections for one photon, all in metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefractionShift {
    pub easting: f64,
    pub northing: f64,
    /// Added to the geoid-referenced elevation to get the corrected elevation
    pub vertical: f64,
}

impl RefractionShift {
    pub const ZERO: RefractionShift = RefractionShift {
        easting: 0.0,
        northing: 0.0,
        vertical: 0.0,
    };

    pub const NAN: RefractionShift = RefractionShift {
        easting: f64::NAN,
        northing: f64::NAN,
        vertical: f64::NAN,
    };
}

/// Corrections for a photon at apparent `depth` below the surface, given the
/// pointing vector azimuth and elevation in radians.
///
/// Zero depth gives an exact zero shift; negative or non-finite input gives NaN.
pub fn correct_refraction(depth: f64, azimuth: f64, elevation: f64) -> RefractionShift {
    if !(depth.is_finite() && azimuth.is_finite() && elevation.is_finite()) || depth < 0.0 {
        return RefractionShift::NAN;
    }
    if depth == 0.0 {
        return RefractionShift::ZERO;
    }

    let mut theta_air = std::f64::consts::FRAC_PI_2 - elevation;
    theta_air += (ICESAT2_ALTITUDE * theta_air.tan() / EARTH_RADIUS).atan();
    let theta_water = (REFRACTIVE_INDEX_AIR * theta_air.sin() / REFRACTIVE_INDEX_SEAWATER).asin();

    let slant = depth / theta_air.cos();
    let refracted = slant * (REFRACTIVE_INDEX_AIR / REFRACTIVE_INDEX_SEAWATER);

    let lambda = std::f64::consts::FRAC_PI_2 - theta_air;
    let p = (refracted * refracted + slant * slant
        - 2.0 * refracted * slant * (theta_air - theta_water).cos())
    .sqrt();
    let phi = theta_air - theta_water;
    let alpha = (refracted * phi.sin() / p).asin();
    let beta = lambda - alpha;

    let horizontal = p * beta.cos();
    RefractionShift {
        easting: horizontal * azimuth.sin(),
        northing: horizontal * azimuth.cos(),
        vertical: p * beta.sin(),
    }
}
