//! Configuration for resampling and pyramid construction.

use serde::{Deserialize, Serialize};

/// Options controlling [`resample_in_space`](crate::resample::resample_in_space).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleOptions {
    /// Add a scalar `crs` variable and `grid_mapping` attributes to the output.
    pub encode_cf: bool,

    /// Rectification supersamples target cells when the target-to-source
    /// resolution ratio reaches `1 / downscale_threshold`.
    pub downscale_threshold: f64,

    /// Upper bound on supersamples per target cell axis.
    pub max_supersampling: usize,
}

impl Default for ResampleOptions {
    fn default() -> Self {
        Self {
            encode_cf: true,
            downscale_threshold: 0.95,
            max_supersampling: 16,
        }
    }
}

impl ResampleOptions {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.downscale_threshold > 0.0 && self.downscale_threshold <= 1.0) {
            return Err("downscale_threshold must be in (0, 1]".to_string());
        }

        if self.max_supersampling == 0 {
            return Err("max_supersampling must be > 0".to_string());
        }

        Ok(())
    }
}

/// Shape of the resolution pyramid built over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Edge length of a square tile in cells.
    pub tile_size: usize,

    /// Upper bound on the number of levels.
    pub max_levels: Option<usize>,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            max_levels: None,
        }
    }
}

impl PyramidConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CUBE_PYRAMID_TILE_SIZE") {
            if let Ok(size) = val.parse() {
                config.tile_size = size;
            }
        }

        if let Ok(val) = std::env::var("CUBE_PYRAMID_MAX_LEVELS") {
            if let Ok(levels) = val.parse() {
                config.max_levels = Some(levels);
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be > 0".to_string());
        }

        if self.max_levels == Some(0) {
            return Err("max_levels must be > 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ResampleOptions::default().validate().is_ok());
        assert!(PyramidConfig::default().validate().is_ok());
        assert_eq!(PyramidConfig::default().tile_size, 256);
    }

    #[test]
    fn test_invalid_values() {
        let opts = ResampleOptions {
            downscale_threshold: 1.5,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = ResampleOptions {
            max_supersampling: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let pyramid = PyramidConfig {
            max_levels: Some(0),
            ..Default::default()
        };
        assert!(pyramid.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: PyramidConfig = serde_json::from_str(r#"{"max_levels": 4}"#).unwrap();
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.max_levels, Some(4));
    }
}
