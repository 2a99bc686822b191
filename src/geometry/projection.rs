//! Coordinate references used by the pipeline and their closed-form
//! projections on the WGS84 ellipsoid.
//!
//! Area is measured in one of the three EASE-Grid 2.0 projections, which are
//! all equal-area: a cylindrical one for most of the globe and a Lambert
//! azimuthal one for each polar cap.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use geo::Coord;

use crate::error::{PipelineError, Result};

const SEMI_MAJOR: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_223_563;
/// Web Mercator cannot represent the poles
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;
const UTM_SCALE: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Latitude at or beyond which a geometry counts as polar
pub const LATITUDE_POLES: f64 = 80.0;
pub const LATITUDE_EQUATOR: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// EPSG:4326, longitude/latitude degrees
    Wgs84,
    /// EPSG:3857
    WebMercator,
    /// EPSG:6931, EASE-Grid 2.0 North
    EaseNorth,
    /// EPSG:6932, EASE-Grid 2.0 South
    EaseSouth,
    /// EPSG:6933, EASE-Grid 2.0 Global
    EaseGlobal,
    /// EPSG:326xx / 327xx, WGS84 UTM zone 1..=60
    Utm { zone: u8, north: bool },
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self> {
        match code {
            4326 => Ok(Crs::Wgs84),
            3857 | 900913 => Ok(Crs::WebMercator),
            6931 => Ok(Crs::EaseNorth),
            6932 => Ok(Crs::EaseSouth),
            6933 => Ok(Crs::EaseGlobal),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            other => Err(PipelineError::UnsupportedCrs(other)),
        }
    }

    pub fn epsg(self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::EaseNorth => 6931,
            Crs::EaseSouth => 6932,
            Crs::EaseGlobal => 6933,
            Crs::Utm { zone, north: true } => 32600 + u32::from(zone),
            Crs::Utm { zone, north: false } => 32700 + u32::from(zone),
        }
    }

    /// Whether coordinates in this reference can be turned back into degrees.
    pub fn is_invertible(self) -> bool {
        matches!(self, Crs::Wgs84 | Crs::WebMercator | Crs::Utm { .. })
    }

    /// Project a longitude/latitude pair (degrees) into this reference.
    pub fn from_geographic(self, c: Coord<f64>) -> Coord<f64> {
        let lambda = c.x.to_radians();
        let phi = c.y.to_radians();
        match self {
            Crs::Wgs84 => c,
            Crs::WebMercator => {
                let phi = c.y.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
                Coord {
                    x: SEMI_MAJOR * lambda,
                    y: SEMI_MAJOR * (FRAC_PI_4 + phi / 2.0).tan().ln(),
                }
            }
            Crs::EaseGlobal => {
                let phi_ts = 30f64.to_radians();
                let k0 = phi_ts.cos() / (1.0 - e2() * phi_ts.sin().powi(2)).sqrt();
                Coord {
                    x: SEMI_MAJOR * k0 * lambda,
                    y: SEMI_MAJOR * authalic_q(phi) / (2.0 * k0),
                }
            }
            Crs::EaseNorth => {
                let rho = SEMI_MAJOR * (q_pole() - authalic_q(phi)).max(0.0).sqrt();
                Coord {
                    x: rho * lambda.sin(),
                    y: -rho * lambda.cos(),
                }
            }
            Crs::EaseSouth => {
                // Mirror of the north case; the pole maps exactly to the origin
                let rho = SEMI_MAJOR * (q_pole() - authalic_q(-phi)).max(0.0).sqrt();
                Coord {
                    x: rho * lambda.sin(),
                    y: rho * lambda.cos(),
                }
            }
            Crs::Utm { zone, north } => utm_forward(zone, north, lambda, phi),
        }
    }

    /// Convert a coordinate of this reference back to longitude/latitude.
    pub fn to_geographic(self, c: Coord<f64>) -> Result<Coord<f64>> {
        match self {
            Crs::Wgs84 => Ok(c),
            Crs::WebMercator => Ok(Coord {
                x: (c.x / SEMI_MAJOR).to_degrees(),
                y: (2.0 * (c.y / SEMI_MAJOR).exp().atan() - FRAC_PI_2).to_degrees(),
            }),
            Crs::Utm { zone, north } => Ok(utm_inverse(zone, north, c)),
            other => Err(PipelineError::UnsupportedCrs(other.epsg())),
        }
    }
}

fn utm_central_meridian(zone: u8) -> f64 {
    (f64::from(zone) * 6.0 - 183.0).to_radians()
}

/// Meridian arc length from the equator (Snyder 3-21).
fn meridian_arc(phi: f64) -> f64 {
    let e2 = e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    SEMI_MAJOR
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Transverse Mercator series (Snyder 8-9, 8-10) with UTM constants.
fn utm_forward(zone: u8, north: bool, lambda: f64, phi: f64) -> Coord<f64> {
    let e2 = e2();
    let ep2 = e2 / (1.0 - e2);
    let (sin, cos) = phi.sin_cos();
    let n = SEMI_MAJOR / (1.0 - e2 * sin * sin).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * cos * cos;
    let a = (lambda - utm_central_meridian(zone)) * cos;

    let x = UTM_SCALE
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);
    let y = UTM_SCALE
        * (meridian_arc(phi)
            + n * phi.tan()
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    Coord {
        x: x + UTM_FALSE_EASTING,
        y: if north { y } else { y + UTM_FALSE_NORTHING_SOUTH },
    }
}

/// Inverse of [`utm_forward`] through the footpoint latitude (Snyder 8-18..8-25).
fn utm_inverse(zone: u8, north: bool, c: Coord<f64>) -> Coord<f64> {
    let e2 = e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);
    let northing = if north { c.y } else { c.y - UTM_FALSE_NORTHING_SOUTH };

    let m = northing / UTM_SCALE;
    let mu = m / (SEMI_MAJOR * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin1, cos1) = phi1.sin_cos();
    let c1 = ep2 * cos1 * cos1;
    let t1 = phi1.tan().powi(2);
    let w = 1.0 - e2 * sin1 * sin1;
    let n1 = SEMI_MAJOR / w.sqrt();
    let r1 = SEMI_MAJOR * (1.0 - e2) / w.powf(1.5);
    let d = (c.x - UTM_FALSE_EASTING) / (n1 * UTM_SCALE);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lambda = utm_central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos1;
    Coord {
        x: lambda.to_degrees(),
        y: phi.to_degrees(),
    }
}

fn e2() -> f64 {
    FLATTENING * (2.0 - FLATTENING)
}

/// Snyder's q(φ) for the authalic sphere.
fn authalic_q(phi: f64) -> f64 {
    let e2 = e2();
    let e = e2.sqrt();
    let s = phi.sin();
    let es = e * s;
    (1.0 - e2) * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln())
}

fn q_pole() -> f64 {
    authalic_q(FRAC_PI_2)
}

/// Pick the equal-area grid for a latitude span.
pub fn ease_grid_for(min_lat: f64, max_lat: f64) -> Crs {
    if max_lat >= LATITUDE_POLES && min_lat >= LATITUDE_EQUATOR {
        return Crs::EaseNorth;
    }
    if min_lat <= -LATITUDE_POLES && max_lat <= LATITUDE_EQUATOR {
        return Crs::EaseSouth;
    }
    Crs::EaseGlobal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_selection() {
        assert_eq!(ease_grid_for(85.0, 90.0), Crs::EaseNorth);
        assert_eq!(ease_grid_for(-90.0, -85.0), Crs::EaseSouth);
        assert_eq!(ease_grid_for(-10.0, 10.0), Crs::EaseGlobal);
        assert_eq!(ease_grid_for(0.0, 80.0), Crs::EaseNorth);
        assert_eq!(ease_grid_for(-80.0, 0.0), Crs::EaseSouth);
        // touching both hemispheres stays global
        assert_eq!(ease_grid_for(-5.0, 85.0), Crs::EaseGlobal);
        assert_eq!(ease_grid_for(-85.0, 85.0), Crs::EaseGlobal);
    }

    #[test]
    fn test_epsg_round_trip() {
        for code in [4326, 3857, 6931, 6932, 6933, 32601, 32633, 32660, 32701, 32760] {
            assert_eq!(Crs::from_epsg(code).unwrap().epsg(), code);
        }
        for code in [2154, 32600, 32661, 32700] {
            assert!(matches!(
                Crs::from_epsg(code),
                Err(PipelineError::UnsupportedCrs(c)) if c == code
            ));
        }
    }

    #[test]
    fn test_utm_central_meridian() {
        let north = Crs::from_epsg(32633).unwrap();
        let origin = north.from_geographic(Coord { x: 15.0, y: 0.0 });
        assert!((origin.x - 500_000.0).abs() < 1e-6);
        assert!(origin.y.abs() < 1e-6);

        // one degree of meridian arc from the equator is about 110.57 km
        let up = north.from_geographic(Coord { x: 15.0, y: 1.0 });
        assert!((up.y / UTM_SCALE - 110_574.0).abs() < 5.0, "arc = {}", up.y);

        let south = Crs::from_epsg(32733).unwrap();
        let below = south.from_geographic(Coord { x: 15.0, y: -1.0 });
        assert!((below.y - (UTM_FALSE_NORTHING_SOUTH - up.y)).abs() < 1e-6);
    }

    #[test]
    fn test_utm_inverse() {
        let places = [(32633, 16.37, 48.21), (32618, -74.0, 40.7), (32756, 151.2, -33.87)];
        for (code, lon, lat) in places {
            let crs = Crs::from_epsg(code).unwrap();
            let c = Coord { x: lon, y: lat };
            let back = crs.to_geographic(crs.from_geographic(c)).unwrap();
            assert!((back.x - lon).abs() < 1e-6, "{}: {:?}", code, back);
            assert!((back.y - lat).abs() < 1e-6, "{}: {:?}", code, back);
        }
    }

    #[test]
    fn test_web_mercator_inverse() {
        let c = Coord { x: 12.5, y: 41.9 };
        let projected = Crs::WebMercator.from_geographic(c);
        let back = Crs::WebMercator.to_geographic(projected).unwrap();
        assert!((back.x - c.x).abs() < 1e-9);
        assert!((back.y - c.y).abs() < 1e-9);
    }

    #[test]
    fn test_polar_origin() {
        let north = Crs::EaseNorth.from_geographic(Coord { x: 0.0, y: 90.0 });
        assert!(north.x.abs() < 1e-6 && north.y.abs() < 1e-6);
        let south = Crs::EaseSouth.from_geographic(Coord { x: 0.0, y: -90.0 });
        assert!(south.x.abs() < 1e-6 && south.y.abs() < 1e-6);
    }

    #[test]
    fn test_polar_grids_mirror() {
        for (lon, lat) in [(0.0, 85.0), (45.0, 80.0), (-120.0, 89.9)] {
            let north = Crs::EaseNorth.from_geographic(Coord { x: lon, y: lat });
            let south = Crs::EaseSouth.from_geographic(Coord { x: lon, y: -lat });
            assert!((north.x - south.x).abs() < 1e-6);
            assert!((north.y + south.y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_ease_inverse_unsupported() {
        assert!(Crs::EaseGlobal.to_geographic(Coord { x: 0.0, y: 0.0 }).is_err());
        assert!(!Crs::EaseNorth.is_invertible());
    }
}
