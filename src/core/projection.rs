use crate::types::{BathyError, BathyResult, Crs};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// WGS84 / UTM transverse Mercator projection for one zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmProjection {
    zone: u8,
    north: bool,
}

impl UtmProjection {
    pub fn new(zone: u8, north: bool) -> BathyResult<Self> {
        if !(1..=60).contains(&zone) {
            return Err(BathyError::InvalidInput(format!("UTM zone {} out of range", zone)));
        }
        Ok(Self { zone, north })
    }

    pub fn for_crs(crs: Crs) -> BathyResult<Self> {
        match crs {
            Crs::Utm { zone, north } => Self::new(zone, north),
            Crs::Wgs84 => Err(BathyError::InvalidInput(
                "A projected (UTM) CRS is required".to_string(),
            )),
        }
    }

    /// Pick the UTM zone containing the centre of the lon/lat bounds of `points`
    pub fn estimate(points: &[(f64, f64)]) -> BathyResult<Self> {
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        for &(lon, lat) in points.iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
            min_lon = min_lon.min(lon);
            max_lon = max_lon.max(lon);
            min_lat = min_lat.min(lat);
            max_lat = max_lat.max(lat);
        }
        if !min_lon.is_finite() {
            return Err(BathyError::InvalidInput(
                "Cannot estimate a UTM zone without finite coordinates".to_string(),
            ));
        }
        let lon = 0.5 * (min_lon + max_lon);
        let lat = 0.5 * (min_lat + max_lat);
        let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8;
        Self::new(zone, lat >= 0.0)
    }

    pub fn crs(&self) -> Crs {
        Crs::Utm { zone: self.zone, north: self.north }
    }

    fn central_meridian(&self) -> f64 {
        ((self.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
    }

    /// Project lon/lat (degrees) to easting/northing (m)
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let ep2 = e2 / (1.0 - e2);
        let (e4, e6) = (e2 * e2, e2 * e2 * e2);

        let phi = lat.to_radians();
        let (sin_phi, cos_phi, tan_phi) = (phi.sin(), phi.cos(), phi.tan());

        let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = cos_phi * (lon.to_radians() - self.central_meridian());

        let m = WGS84_A
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

        let easting = UTM_K0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
            + FALSE_EASTING;

        let mut northing = UTM_K0
            * (m + n
                * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
        if !self.north {
            northing += FALSE_NORTHING_SOUTH;
        }

        (easting, northing)
    }

    /// Unproject easting/northing (m) back to lon/lat (degrees)
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let ep2 = e2 / (1.0 - e2);
        let (e4, e6) = (e2 * e2, e2 * e2 * e2);

        let x = easting - FALSE_EASTING;
        let y = if self.north { northing } else { northing - FALSE_NORTHING_SOUTH };

        let m = y / UTM_K0;
        let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1, tan1) = (phi1.sin(), phi1.cos(), phi1.tan());
        let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
        let t1 = tan1 * tan1;
        let c1 = ep2 * cos1 * cos1;
        let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
        let d = x / (n1 * UTM_K0);

        let phi = phi1
            - (n1 * tan1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lambda = self.central_meridian()
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                    * d.powi(5)
                    / 120.0)
                / cos1;

        (lambda.to_degrees(), phi.to_degrees())
    }
}

/// Transform a coordinate pair between two supported CRSs
pub fn reproject_point(x: f64, y: f64, from: Crs, to: Crs) -> BathyResult<(f64, f64)> {
    if from == to {
        return Ok((x, y));
    }
    let (lon, lat) = match from {
        Crs::Wgs84 => (x, y),
        Crs::Utm { .. } => UtmProjection::for_crs(from)?.inverse(x, y),
    };
    match to {
        Crs::Wgs84 => Ok((lon, lat)),
        Crs::Utm { .. } => Ok(UtmProjection::for_crs(to)?.forward(lon, lat)),
    }
}
