//! Named data stores configured by identifier.

use crate::store::{DataStore, DirectoryStore, MemoryStore, ObjectStorageStore, S3Config};
use cube_common::{CubeError, CubeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Backend parameters of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreParams {
    Directory { root: PathBuf },
    S3(S3Config),
    /// The shared in-process [`MemoryStore`].
    Memory,
}

/// One entry of the `data_stores` configuration list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStoreConfig {
    pub identifier: String,
    #[serde(flatten)]
    pub store: StoreParams,
}

impl DataStoreConfig {
    pub fn directory(identifier: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            store: StoreParams::Directory { root: root.into() },
        }
    }

    pub fn memory(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            store: StoreParams::Memory,
        }
    }
}

/// Data stores keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct DataStorePool {
    stores: HashMap<String, DataStore>,
}

impl DataStorePool {
    /// Build every configured store. `memory` backs all `memory` entries.
    pub fn from_configs(configs: &[DataStoreConfig], memory: &MemoryStore) -> CubeResult<Self> {
        let mut stores = HashMap::with_capacity(configs.len());
        for config in configs {
            if config.identifier.is_empty() {
                return Err(CubeError::configuration("data store identifier must not be empty"));
            }
            let store = match &config.store {
                StoreParams::Directory { root } => DataStore::Directory(DirectoryStore::new(root.clone())),
                StoreParams::S3(s3) => DataStore::ObjectStorage(ObjectStorageStore::s3(s3)?),
                StoreParams::Memory => DataStore::Memory(memory.clone()),
            };
            info!(store_id = %config.identifier, kind = store.kind(), "Configured data store");
            if stores.insert(config.identifier.clone(), store).is_some() {
                return Err(CubeError::configuration(format!(
                    "duplicate data store identifier '{}'",
                    config.identifier
                )));
            }
        }
        Ok(Self { stores })
    }

    pub fn insert(&mut self, identifier: impl Into<String>, store: DataStore) {
        self.stores.insert(identifier.into(), store);
    }

    pub fn get(&self, identifier: &str) -> CubeResult<&DataStore> {
        self.stores
            .get(identifier)
            .ok_or_else(|| CubeError::configuration(format!("unknown data store '{}'", identifier)))
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_yaml_shaped_json() {
        let json = r#"[
            {"identifier": "local", "type": "directory", "root": "/data"},
            {"identifier": "mem", "type": "memory"},
            {"identifier": "s3", "type": "s3", "bucket": "cubes", "prefix": "v1"}
        ]"#;
        let configs: Vec<DataStoreConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(configs[0], DataStoreConfig::directory("local", "/data"));
        assert_eq!(configs[1].store, StoreParams::Memory);
        match &configs[2].store {
            StoreParams::S3(s3) => {
                assert_eq!(s3.bucket, "cubes");
                assert_eq!(s3.prefix.as_deref(), Some("v1"));
                assert_eq!(s3.region, "us-east-1");
            }
            other => panic!("unexpected params {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_and_unknown_ids() {
        let memory = MemoryStore::new();
        let configs = vec![DataStoreConfig::memory("a"), DataStoreConfig::memory("a")];
        assert!(matches!(
            DataStorePool::from_configs(&configs, &memory),
            Err(CubeError::Configuration(_))
        ));

        let pool = DataStorePool::from_configs(
            &[DataStoreConfig::memory("mem"), DataStoreConfig::directory("dir", "/tmp")],
            &memory,
        )
        .unwrap();
        assert_eq!(pool.ids(), vec!["dir", "mem"]);
        assert_eq!(pool.get("mem").unwrap().kind(), "memory");
        assert!(matches!(pool.get("nope"), Err(CubeError::Configuration(_))));
    }
}
