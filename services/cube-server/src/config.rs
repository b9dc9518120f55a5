//! Server configuration.
//!
//! Loaded from a YAML document, then adjusted by environment variables:
//!
//! ```yaml
//! base_dir: /data
//! tile_cache_size: 512M
//! datasets:
//!   - identifier: sst
//!     path: sst.levels
//!     style: ocean
//! styles:
//!   - identifier: ocean
//!     color_mappings:
//!       analysed_sst: { color_bar: thermal, value_range: [270.0, 310.0] }
//! ```

use cube_common::{Crs, CubeError, CubeResult};
use grid_processor::ResampleOptions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use storage::{DataFormat, DataStoreConfig, DEFAULT_EVICTION_THRESHOLD};
use thiserror::Error;
use tracing::info;

/// Tile cache size used when none is configured.
pub const DEFAULT_TILE_CACHE_SIZE: &str = "512M";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for CubeError {
    fn from(err: ConfigError) -> Self {
        CubeError::Configuration(err.to_string())
    }
}

/// Parse a memory size such as `"512M"`, `"1.5G"` or `"1024"`.
///
/// Units are powers of 1000. `"0"`, `"off"`, `"none"`, `"false"` and the
/// empty string mean "disabled" and yield `None`.
pub fn parse_mem_size(value: &str) -> Result<Option<u64>, String> {
    let value = value.trim();
    if value.is_empty() || matches!(value.to_ascii_uppercase().as_str(), "0" | "OFF" | "NONE" | "FALSE") {
        return Ok(None);
    }

    let upper = value.to_ascii_uppercase();
    let (number, factor) = match upper.char_indices().last() {
        Some((i, unit @ ('B' | 'K' | 'M' | 'G' | 'T'))) => {
            let factor = match unit {
                'B' => 1u64,
                'K' => 1_000,
                'M' => 1_000_000,
                'G' => 1_000_000_000,
                _ => 1_000_000_000_000,
            };
            (&upper[..i], factor)
        }
        _ => (upper.as_str(), 1),
    };

    let number: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid memory size '{}'", value))?;
    if !number.is_finite() || number < 0.0 {
        return Err(format!("invalid memory size '{}'", value));
    }
    let bytes = (number * factor as f64).round() as u64;
    Ok((bytes > 0).then_some(bytes))
}

/// Where a dataset without `store_instance_id` lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystem {
    /// Below `base_dir`.
    #[default]
    Local,
    /// In the context's memory store.
    Memory,
}

/// A named augmentation applied to a dataset after opening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    pub function: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// One served dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub identifier: String,
    #[serde(default)]
    pub title: Option<String>,
    pub path: String,
    /// Guessed from the path extension when absent.
    #[serde(default)]
    pub format: Option<DataFormat>,
    #[serde(default)]
    pub file_system: FileSystem,
    #[serde(default)]
    pub store_instance_id: Option<String>,
    /// Overrides the CRS found in the dataset.
    #[serde(default)]
    pub crs: Option<Crs>,
    #[serde(default)]
    pub augmentation: Option<AugmentationConfig>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub tile_size: Option<usize>,
    /// Upper bound on pyramid depth.
    #[serde(default)]
    pub num_levels: Option<usize>,
    /// Variables exposed; all when absent.
    #[serde(default)]
    pub variables: Option<Vec<String>>,
}

impl DatasetConfig {
    pub fn new(identifier: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: None,
            path: path.into(),
            format: None,
            file_system: FileSystem::Local,
            store_instance_id: None,
            crs: None,
            augmentation: None,
            style: None,
            tile_size: None,
            num_levels: None,
            variables: None,
        }
    }

    pub fn in_memory(mut self) -> Self {
        self.file_system = FileSystem::Memory;
        self
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_augmentation(mut self, function: impl Into<String>, parameters: serde_json::Value) -> Self {
        self.augmentation = Some(AugmentationConfig {
            function: function.into(),
            parameters,
        });
        self
    }

    /// Configured format, else the one guessed from the path. In-memory
    /// datasets need neither.
    pub fn data_format(&self) -> CubeResult<DataFormat> {
        if let Some(format) = self.format {
            return Ok(format);
        }
        match DataFormat::guess(&self.path) {
            Some(format) => Ok(format),
            None if self.file_system == FileSystem::Memory => Ok(DataFormat::Json),
            None => Err(CubeError::configuration(format!(
                "cannot guess the format of dataset '{}' from path '{}'",
                self.identifier, self.path
            ))),
        }
    }
}

/// Color bar and value range of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorMapping {
    #[serde(default)]
    pub color_bar: Option<String>,
    #[serde(default)]
    pub value_range: Option<[f64; 2]>,
}

/// Color mappings shared by datasets referencing this style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleConfig {
    pub identifier: String,
    #[serde(default)]
    pub color_mappings: BTreeMap<String, ColorMapping>,
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root of relative local dataset paths.
    pub base_dir: PathBuf,

    /// Tile cache budget, see [`parse_mem_size`].
    pub tile_cache_size: String,

    /// Fraction of the budget kept after an eviction run.
    pub tile_cache_threshold: f64,

    /// Default tile edge length.
    pub tile_size: usize,

    pub datasets: Vec<DatasetConfig>,
    pub data_stores: Vec<DataStoreConfig>,
    pub styles: Vec<StyleConfig>,
    pub resampling: ResampleOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            tile_cache_size: DEFAULT_TILE_CACHE_SIZE.to_string(),
            tile_cache_threshold: DEFAULT_EVICTION_THRESHOLD,
            tile_size: 256,
            datasets: Vec::new(),
            data_stores: Vec::new(),
            styles: Vec::new(),
            resampling: ResampleOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Load a YAML config file. Relative `base_dir`s are resolved against
    /// the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        if config.base_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.base_dir = parent.join(&config.base_dir);
            }
        }
        info!(path = %path.display(), datasets = config.datasets.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `CUBE_TILE_CACHE_SIZE`, `CUBE_TILE_SIZE` and `CUBE_BASE_DIR`.
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = std::env::var("CUBE_TILE_CACHE_SIZE") {
            self.tile_cache_size = val;
        }

        if let Ok(val) = std::env::var("CUBE_TILE_SIZE") {
            if let Ok(size) = val.parse() {
                self.tile_size = size;
            }
        }

        if let Ok(val) = std::env::var("CUBE_BASE_DIR") {
            self.base_dir = PathBuf::from(val);
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        parse_mem_size(&self.tile_cache_size)?;

        if !(self.tile_cache_threshold > 0.0 && self.tile_cache_threshold <= 1.0) {
            return Err("tile_cache_threshold must be in (0, 1]".to_string());
        }

        if self.tile_size == 0 {
            return Err("tile_size must be > 0".to_string());
        }

        self.resampling.validate()?;

        let store_ids = unique_ids("data store", self.data_stores.iter().map(|s| s.identifier.as_str()))?;
        let style_ids = unique_ids("style", self.styles.iter().map(|s| s.identifier.as_str()))?;
        unique_ids("dataset", self.datasets.iter().map(|d| d.identifier.as_str()))?;

        for ds in &self.datasets {
            if ds.path.is_empty() {
                return Err(format!("dataset '{}' has an empty path", ds.identifier));
            }
            if ds.tile_size == Some(0) {
                return Err(format!("dataset '{}': tile_size must be > 0", ds.identifier));
            }
            if ds.num_levels == Some(0) {
                return Err(format!("dataset '{}': num_levels must be > 0", ds.identifier));
            }
            if let Some(store) = &ds.store_instance_id {
                if !store_ids.contains(store.as_str()) {
                    return Err(format!("dataset '{}' references unknown data store '{}'", ds.identifier, store));
                }
            }
            if let Some(style) = &ds.style {
                if !style_ids.contains(style.as_str()) {
                    return Err(format!("dataset '{}' references unknown style '{}'", ds.identifier, style));
                }
            }
            ds.data_format().map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    /// Tile cache budget in bytes; `None` disables the cache.
    pub fn tile_cache_capacity(&self) -> Result<Option<u64>, String> {
        parse_mem_size(&self.tile_cache_size)
    }

    pub fn dataset(&self, ds_id: &str) -> CubeResult<&DatasetConfig> {
        self.datasets
            .iter()
            .find(|ds| ds.identifier == ds_id)
            .ok_or_else(|| CubeError::DatasetNotFound(ds_id.to_string()))
    }

    pub fn style(&self, style_id: &str) -> Option<&StyleConfig> {
        self.styles.iter().find(|s| s.identifier == style_id)
    }

    pub fn with_dataset(mut self, dataset: DatasetConfig) -> Self {
        self.datasets.push(dataset);
        self
    }
}

fn unique_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<HashSet<&'a str>, String> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(format!("{} identifier must not be empty", kind));
        }
        if !seen.insert(id) {
            return Err(format!("duplicate {} identifier '{}'", kind, id));
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mem_size() {
        assert_eq!(parse_mem_size("512M").unwrap(), Some(512_000_000));
        assert_eq!(parse_mem_size("1.5g").unwrap(), Some(1_500_000_000));
        assert_eq!(parse_mem_size("2K").unwrap(), Some(2_000));
        assert_eq!(parse_mem_size("100").unwrap(), Some(100));
        assert_eq!(parse_mem_size("64B").unwrap(), Some(64));
        for off in ["0", "off", "None", "FALSE", ""] {
            assert_eq!(parse_mem_size(off).unwrap(), None, "{}", off);
        }
        assert!(parse_mem_size("lots").is_err());
        assert!(parse_mem_size("-1M").is_err());
    }

    #[test]
    fn test_yaml_document() {
        let yaml = r#"
base_dir: /data
tile_cache_size: 1G
datasets:
  - identifier: sst
    path: sst.levels
    style: ocean
    crs: EPSG:4326
  - identifier: chl
    path: chl
    file_system: memory
    augmentation:
      function: scale
      parameters: { factor: 2.0 }
data_stores:
  - identifier: s3
    type: s3
    bucket: cubes
styles:
  - identifier: ocean
    color_mappings:
      analysed_sst: { color_bar: thermal, value_range: [270.0, 310.0] }
"#;
        let config = ServerConfig::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.tile_cache_capacity().unwrap(), Some(1_000_000_000));
        assert_eq!(config.tile_size, 256);

        let sst = config.dataset("sst").unwrap();
        assert_eq!(sst.data_format().unwrap(), DataFormat::Levels);
        assert_eq!(sst.crs, Some(Crs::Wgs84));

        let chl = config.dataset("chl").unwrap();
        assert_eq!(chl.file_system, FileSystem::Memory);
        assert_eq!(chl.data_format().unwrap(), DataFormat::Json);
        let aug = chl.augmentation.as_ref().unwrap();
        assert_eq!(aug.parameters["factor"], 2.0);

        let mapping = &config.style("ocean").unwrap().color_mappings["analysed_sst"];
        assert_eq!(mapping.value_range, Some([270.0, 310.0]));
    }

    #[test]
    fn test_unknown_dataset() {
        let config = ServerConfig::default();
        assert!(matches!(config.dataset("nope"), Err(CubeError::DatasetNotFound(_))));
    }

    #[test]
    fn test_validation_errors() {
        let duplicate = ServerConfig::default()
            .with_dataset(DatasetConfig::new("a", "a.json"))
            .with_dataset(DatasetConfig::new("a", "b.json"));
        assert!(duplicate.validate().unwrap_err().contains("duplicate"));

        let mut bad_style = ServerConfig::default();
        let mut ds = DatasetConfig::new("a", "a.json");
        ds.style = Some("missing".to_string());
        bad_style.datasets.push(ds);
        assert!(bad_style.validate().unwrap_err().contains("unknown style"));

        let unguessable = ServerConfig::default().with_dataset(DatasetConfig::new("a", "a.nc"));
        assert!(unguessable.validate().is_err());

        let threshold = ServerConfig {
            tile_cache_threshold: 1.5,
            ..ServerConfig::default()
        };
        assert!(threshold.validate().is_err());
    }
}
