use glam::DVec2;
use serde::{Deserialize, Serialize};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Coordinate reference system of the output raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Crs {
    /// Geographic WGS-84, x = longitude, y = latitude (EPSG:4326).
    #[default]
    Wgs84,
    /// WGS-84 / UTM, x = easting, y = northing in meters.
    Utm { zone: u8, north: bool },
}

impl Crs {
    pub fn epsg(&self) -> u16 {
        match *self {
            Crs::Wgs84 => 4326,
            Crs::Utm { zone, north: true } => 32600 + zone as u16,
            Crs::Utm { zone, north: false } => 32700 + zone as u16,
        }
    }

    pub fn from_epsg(code: u16) -> Option<Crs> {
        match code {
            4326 => Some(Crs::Wgs84),
            32601..=32660 => Some(Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Some(Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            _ => None,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// Projects a WGS-84 position into this CRS.
    pub fn project(&self, latitude: f64, longitude: f64) -> DVec2 {
        match *self {
            Crs::Wgs84 => DVec2::new(longitude, latitude),
            Crs::Utm { zone, north } => utm_forward(latitude, longitude, zone, north),
        }
    }
}

/// Ground length of one degree of longitude and latitude at `latitude` on
/// the WGS-84 ellipsoid, in meters.
pub fn meters_per_degree(latitude: f64) -> DVec2 {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let (sin_phi, cos_phi) = latitude.to_radians().sin_cos();
    let w = 1.0 - e2 * sin_phi * sin_phi;
    let prime_vertical = WGS84_A / w.sqrt();
    let meridional = WGS84_A * (1.0 - e2) / w.powf(1.5);
    DVec2::new(prime_vertical * cos_phi, meridional) * std::f64::consts::PI / 180.0
}

/// Transverse Mercator forward projection on the WGS-84 ellipsoid.
fn utm_forward(latitude: f64, longitude: f64, zone: u8, north: bool) -> DVec2 {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let lon0 = ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians();
    let phi = latitude.to_radians();
    let lambda = longitude.to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();
    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lambda - lon0);

    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

    let easting = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;
    let mut northing = UTM_K0
        * (m + n
            * tan_phi
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if !north {
        northing += UTM_FALSE_NORTHING_SOUTH;
    }
    DVec2::new(easting, northing)
}
