//! Lambert Conformal Conic projection on a sphere.
//!
//! Maps a cone tangent or secant to the sphere onto a plane. Parameters:
//! - Reference latitude (lat_0): latitude of the false origin
//! - Central meridian (lon_0)
//! - Standard parallel(s): lat_1 and lat_2 (equal for a tangent cone)
//! - False easting / northing in metres

use crate::error::{ProjectionError, Result};
use cube_common::LccParams;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// Precomputed Lambert Conformal Conic projection.
#[derive(Debug, Clone)]
pub struct LambertConformal {
    params: LccParams,
    /// Central meridian in radians
    lon0: f64,
    /// Cone constant (n)
    n: f64,
    /// F constant
    f: f64,
    /// Rho at the reference latitude
    rho0: f64,
}

impl LambertConformal {
    pub fn new(params: LccParams) -> Result<Self> {
        let lat1 = params.lat_1.to_radians();
        let lat2 = params.lat_2.to_radians();
        let lat0 = params.lat_0.to_radians();

        if params.radius <= 0.0 || !params.radius.is_finite() {
            return Err(ProjectionError::InvalidParameters(format!(
                "radius must be positive, got {}",
                params.radius
            )));
        }
        if lat1.abs() >= FRAC_PI_2 || lat2.abs() >= FRAC_PI_2 {
            return Err(ProjectionError::InvalidParameters(
                "standard parallels must lie strictly between the poles".to_string(),
            ));
        }

        let n = if (lat1 - lat2).abs() < 1e-10 {
            lat1.sin()
        } else {
            let ln_ratio = (lat1.cos() / lat2.cos()).ln();
            let tan_ratio = ((FRAC_PI_4 + lat2 / 2.0).tan() / (FRAC_PI_4 + lat1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };
        if n.abs() < 1e-10 {
            return Err(ProjectionError::InvalidParameters(
                "standard parallels define a degenerate cone".to_string(),
            ));
        }

        let f = (lat1.cos() * (FRAC_PI_4 + lat1 / 2.0).tan().powf(n)) / n;
        let rho0 = params.radius * f / (FRAC_PI_4 + lat0 / 2.0).tan().powf(n);

        Ok(Self {
            params,
            lon0: params.lon_0.to_radians(),
            n,
            f,
            rho0,
        })
    }

    pub fn params(&self) -> &LccParams {
        &self.params
    }

    /// Project lon/lat degrees to metres.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        if !lon_deg.is_finite() || !lat_deg.is_finite() {
            return (f64::NAN, f64::NAN);
        }
        let lat = lat_deg.to_radians();
        // The pole opposite the cone apex maps to infinity.
        if (lat + self.n.signum() * FRAC_PI_2).abs() < 1e-10 {
            return (f64::NAN, f64::NAN);
        }

        let mut dlon = lon_deg.to_radians() - self.lon0;
        while dlon > PI {
            dlon -= 2.0 * PI;
        }
        while dlon < -PI {
            dlon += 2.0 * PI;
        }

        let rho = self.params.radius * self.f / (FRAC_PI_4 + lat / 2.0).tan().powf(self.n);
        let theta = self.n * dlon;

        let x = rho * theta.sin() + self.params.x_0;
        let y = self.rho0 - rho * theta.cos() + self.params.y_0;
        (x, y)
    }

    /// Unproject metres to lon/lat degrees.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        if !x.is_finite() || !y.is_finite() {
            return (f64::NAN, f64::NAN);
        }
        let dx = x - self.params.x_0;
        let dy = self.rho0 - (y - self.params.y_0);
        let sign = self.n.signum();

        let rho = sign * (dx * dx + dy * dy).sqrt();
        let theta = (sign * dx).atan2(sign * dy);

        let lat = if rho == 0.0 {
            sign * FRAC_PI_2
        } else {
            2.0 * (self.params.radius * self.f / rho).powf(1.0 / self.n).atan() - FRAC_PI_2
        };
        let lon = self.lon0 + theta / self.n;

        (lon.to_degrees(), lat.to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conus() -> LambertConformal {
        LambertConformal::new(LccParams {
            lat_1: 33.0,
            lat_2: 45.0,
            lat_0: 40.0,
            lon_0: -97.0,
            ..LccParams::default()
        })
        .unwrap()
    }

    #[test]
    fn test_origin_maps_to_false_origin() {
        let proj = conus();
        let (x, y) = proj.forward(-97.0, 40.0);
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_round_trip() {
        let proj = conus();
        for (lon, lat) in [(-120.0, 25.0), (-70.0, 50.0), (-97.0, 60.0)] {
            let (x, y) = proj.forward(lon, lat);
            let (lon2, lat2) = proj.inverse(x, y);
            assert!((lon - lon2).abs() < 1e-8, "lon {} vs {}", lon, lon2);
            assert!((lat - lat2).abs() < 1e-8, "lat {} vs {}", lat, lat2);
        }
    }

    #[test]
    fn test_tangent_cone() {
        let proj = LambertConformal::new(LccParams {
            lat_1: 38.5,
            lat_2: 38.5,
            lat_0: 38.5,
            lon_0: -97.5,
            ..LccParams::default()
        })
        .unwrap();
        let (x, y) = proj.forward(-90.0, 38.5);
        assert!(x > 0.0);
        let (lon, lat) = proj.inverse(x, y);
        assert!((lon + 90.0).abs() < 1e-8);
        assert!((lat - 38.5).abs() < 1e-8);
    }

    #[test]
    fn test_invalid_parameters() {
        let result = LambertConformal::new(LccParams {
            lat_1: 90.0,
            ..LccParams::default()
        });
        assert!(result.is_err());
    }
}
