//! Spherical (Web) Mercator projection.

use crate::geographic::normalize_lon;
use cube_common::crs::WGS84_SEMI_MAJOR_AXIS;
use std::f64::consts::PI;

/// Latitude limit of the square Web Mercator world.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// Half the width of the Web Mercator world in metres.
pub const MAX_EXTENT: f64 = 20_037_508.342_789_244;

/// Project lon/lat degrees to Web Mercator metres.
///
/// Latitudes at or beyond the poles yield NaN.
pub fn forward(lon: f64, lat: f64) -> (f64, f64) {
    if !lon.is_finite() || !lat.is_finite() || lat.abs() >= 90.0 {
        return (f64::NAN, f64::NAN);
    }
    let x = WGS84_SEMI_MAJOR_AXIS * normalize_lon(lon).to_radians();
    let y = WGS84_SEMI_MAJOR_AXIS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Unproject Web Mercator metres to lon/lat degrees.
pub fn inverse(x: f64, y: f64) -> (f64, f64) {
    if !x.is_finite() || !y.is_finite() {
        return (f64::NAN, f64::NAN);
    }
    let lon = (x / WGS84_SEMI_MAJOR_AXIS).to_degrees();
    let lat = (2.0 * (y / WGS84_SEMI_MAJOR_AXIS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}
