//! Longitude helpers for geographic coordinates.

/// Wrap a longitude into [-180, 180).
pub fn normalize_lon(lon: f64) -> f64 {
    if (-180.0..180.0).contains(&lon) {
        return lon;
    }
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Wrap a longitude into [0, 360).
pub fn normalize_lon_360(lon: f64) -> f64 {
    if (0.0..360.0).contains(&lon) {
        return lon;
    }
    lon.rem_euclid(360.0)
}

/// Wrap a longitude into the convention of a grid.
pub fn to_lon_convention(lon: f64, lon_360: bool) -> f64 {
    if lon_360 {
        normalize_lon_360(lon)
    } else {
        normalize_lon(lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_lon(190.0), -170.0);
        assert_eq!(normalize_lon(-180.0), -180.0);
        assert_eq!(normalize_lon(540.0), -180.0);
        assert_eq!(normalize_lon(10.0), 10.0);
        assert_eq!(normalize_lon_360(-10.0), 350.0);
        assert_eq!(to_lon_convention(-90.0, true), 270.0);
        assert_eq!(to_lon_convention(270.0, false), -90.0);
    }
}
