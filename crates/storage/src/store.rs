//! Data stores: where dataset documents live and how they are opened.
//!
//! A [`DataStore`] is one of a closed set of backends sharing one `open`
//! contract:
//!
//! - **Directory**: files below a local root, read with tokio file I/O
//! - **ObjectStorage**: S3 compatible buckets (or a local directory for
//!   tests) through the `object_store` crate
//! - **Memory**: datasets registered programmatically
//!
//! Two formats are understood. `json` is a single [`Dataset`] document.
//! `levels` is a directory (or key prefix) holding `0.json .. N.json`, one
//! document per pyramid level with the native level at `0`, and optionally
//! a `.levels` document `{"num_levels": N}`.

use bytes::Bytes;
use cube_common::{CubeError, CubeResult};
use futures::TryStreamExt;
use grid_processor::Dataset;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Name of the optional document describing a `levels` dataset.
pub const LEVELS_INFO_NAME: &str = ".levels";

/// On-store format of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// One JSON dataset document.
    Json,
    /// A directory of per-level JSON documents.
    Levels,
}

impl DataFormat {
    /// Guess the format from a path's extension.
    pub fn guess(path: &str) -> Option<Self> {
        let trimmed = path.trim_end_matches('/');
        match Path::new(trimmed).extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Some(Self::Json),
            Some(ext) if ext.eq_ignore_ascii_case("levels") => Some(Self::Levels),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Levels => "levels",
        }
    }
}

impl std::str::FromStr for DataFormat {
    type Err = CubeError;

    fn from_str(s: &str) -> CubeResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "levels" => Ok(Self::Levels),
            other => Err(CubeError::configuration(format!("unknown data format '{}'", other))),
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What opening a path yields.
#[derive(Debug, Clone)]
pub enum OpenedDataset {
    /// A single-resolution dataset.
    Single(Dataset),
    /// Stored pyramid levels, native resolution first.
    Levels(Vec<Dataset>),
}

impl OpenedDataset {
    pub fn num_levels(&self) -> usize {
        match self {
            OpenedDataset::Single(_) => 1,
            OpenedDataset::Levels(levels) => levels.len(),
        }
    }
}

#[derive(Deserialize)]
struct LevelsInfo {
    num_levels: usize,
}

fn parse_dataset(path: &str, bytes: &[u8]) -> CubeResult<Dataset> {
    Dataset::from_json_slice(bytes)
        .map_err(|e| CubeError::storage(format!("failed to parse dataset '{}': {}", path, e)))
}

/// Level number of a `levels` entry name (`3.json` or `3`).
fn level_of(name: &str) -> Option<usize> {
    name.strip_suffix(".json").unwrap_or(name).parse().ok()
}

/// Order level documents and check they are exactly `0..n`.
fn ordered_levels(path: &str, entries: BTreeMap<usize, Dataset>, info: Option<LevelsInfo>) -> CubeResult<Vec<Dataset>> {
    let n = entries.len();
    if n == 0 {
        return Err(CubeError::storage(format!("no levels found in '{}'", path)));
    }
    let consecutive = entries.keys().copied().eq(0..n);
    let declared_ok = info.map_or(true, |info| info.num_levels == n);
    if !consecutive || !declared_ok {
        return Err(CubeError::configuration(format!(
            "inconsistent multi-level dataset '{}': found levels {:?}",
            path,
            entries.keys().collect::<Vec<_>>()
        )));
    }
    Ok(entries.into_values().collect())
}

/// Files below a local root directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> CubeResult<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(CubeError::configuration(format!(
                "path '{}' must be relative and stay below the store root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn read(&self, path: &Path) -> CubeResult<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CubeError::storage(format!("'{}' not found", path.display()))
            } else {
                CubeError::storage(format!("failed to read '{}': {}", path.display(), e))
            }
        })
    }

    async fn open(&self, path: &str, format: DataFormat) -> CubeResult<OpenedDataset> {
        let full_path = self.resolve(path)?;
        match format {
            DataFormat::Json => {
                let bytes = self.read(&full_path).await?;
                Ok(OpenedDataset::Single(parse_dataset(path, &bytes)?))
            }
            DataFormat::Levels => {
                let mut dir = tokio::fs::read_dir(&full_path).await.map_err(|e| {
                    CubeError::storage(format!("cannot list '{}': {}", full_path.display(), e))
                })?;
                let mut entries = BTreeMap::new();
                let mut info = None;
                while let Some(entry) = dir
                    .next_entry()
                    .await
                    .map_err(|e| CubeError::storage(format!("cannot list '{}': {}", full_path.display(), e)))?
                {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name == LEVELS_INFO_NAME {
                        let bytes = self.read(&entry.path()).await?;
                        info = Some(serde_json::from_slice::<LevelsInfo>(&bytes).map_err(|e| {
                            CubeError::storage(format!("invalid '{}' in '{}': {}", LEVELS_INFO_NAME, path, e))
                        })?);
                    } else if let Some(level) = level_of(&name) {
                        let bytes = self.read(&entry.path()).await?;
                        entries.insert(level, parse_dataset(&name, &bytes)?);
                    }
                }
                Ok(OpenedDataset::Levels(ordered_levels(path, entries, info)?))
            }
        }
    }
}

/// S3 connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
    /// Key prefix prepended to every dataset path
    pub prefix: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://minio:9000".to_string(),
            bucket: "datacubes".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            allow_http: true,
            prefix: None,
        }
    }
}

/// Objects in an `object_store` backend.
#[derive(Debug, Clone)]
pub struct ObjectStorageStore {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl ObjectStorageStore {
    /// Wrap an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        Self { store, prefix }
    }

    /// Connect to an S3 compatible bucket.
    pub fn s3(config: &S3Config) -> CubeResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| CubeError::storage(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self::new(Arc::new(store), config.prefix.clone()))
    }

    /// Objects below a local directory.
    pub fn local(root: impl AsRef<Path>) -> CubeResult<Self> {
        let store = LocalFileSystem::new_with_prefix(root.as_ref())
            .map_err(|e| CubeError::storage(format!("Failed to open local object store: {}", e)))?;
        Ok(Self::new(Arc::new(store), None))
    }

    fn location(&self, path: &str) -> ObjectPath {
        let path = path.trim_matches('/');
        match &self.prefix {
            Some(prefix) => ObjectPath::from(format!("{}/{}", prefix.trim_matches('/'), path)),
            None => ObjectPath::from(path),
        }
    }

    /// Read an object.
    #[instrument(skip(self), fields(path = %location))]
    async fn get(&self, location: &ObjectPath) -> CubeResult<Bytes> {
        let result = self.store.get(location).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => CubeError::storage(format!("'{}' not found", location)),
            e => CubeError::storage(format!("Failed to read {}: {}", location, e)),
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| CubeError::storage(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// List object locations below a prefix.
    async fn list(&self, prefix: &ObjectPath) -> CubeResult<Vec<ObjectPath>> {
        let mut locations = Vec::new();
        let mut stream = self.store.list(Some(prefix));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| CubeError::storage(format!("List failed: {}", e)))?
        {
            locations.push(meta.location);
        }
        Ok(locations)
    }

    async fn open(&self, path: &str, format: DataFormat) -> CubeResult<OpenedDataset> {
        let location = self.location(path);
        match format {
            DataFormat::Json => {
                let bytes = self.get(&location).await?;
                Ok(OpenedDataset::Single(parse_dataset(path, &bytes)?))
            }
            DataFormat::Levels => {
                let mut entries = BTreeMap::new();
                let mut info = None;
                for object in self.list(&location).await? {
                    let Some(name) = object.filename() else { continue };
                    if name == LEVELS_INFO_NAME {
                        let bytes = self.get(&object).await?;
                        info = Some(serde_json::from_slice::<LevelsInfo>(&bytes).map_err(|e| {
                            CubeError::storage(format!("invalid '{}' in '{}': {}", LEVELS_INFO_NAME, path, e))
                        })?);
                    } else if let Some(level) = level_of(name) {
                        let bytes = self.get(&object).await?;
                        entries.insert(level, parse_dataset(name, &bytes)?);
                    }
                }
                Ok(OpenedDataset::Levels(ordered_levels(path, entries, info)?))
            }
        }
    }
}

/// Datasets registered in memory. Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: Arc<RwLock<HashMap<String, OpenedDataset>>>,
    opens: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-resolution dataset under `path`.
    pub fn insert(&self, path: impl Into<String>, dataset: Dataset) {
        self.insert_opened(path, OpenedDataset::Single(dataset));
    }

    /// Register stored pyramid levels under `path`.
    pub fn insert_levels(&self, path: impl Into<String>, levels: Vec<Dataset>) {
        self.insert_opened(path, OpenedDataset::Levels(levels));
    }

    fn insert_opened(&self, path: impl Into<String>, opened: OpenedDataset) {
        let mut datasets = self.datasets.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        datasets.insert(path.into(), opened);
    }

    pub fn remove(&self, path: &str) -> bool {
        let mut datasets = self.datasets.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        datasets.remove(path).is_some()
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    fn open(&self, path: &str) -> CubeResult<OpenedDataset> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let datasets = self.datasets.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        datasets
            .get(path)
            .cloned()
            .ok_or_else(|| CubeError::storage(format!("'{}' not found in memory store", path)))
    }
}

/// A storage backend.
#[derive(Debug, Clone)]
pub enum DataStore {
    Directory(DirectoryStore),
    ObjectStorage(ObjectStorageStore),
    Memory(MemoryStore),
}

impl DataStore {
    pub fn kind(&self) -> &'static str {
        match self {
            DataStore::Directory(_) => "directory",
            DataStore::ObjectStorage(_) => "object_storage",
            DataStore::Memory(_) => "memory",
        }
    }

    /// Open the dataset stored at `path`.
    pub async fn open(&self, path: &str, format: DataFormat) -> CubeResult<OpenedDataset> {
        let start = Instant::now();
        let opened = match self {
            DataStore::Directory(store) => store.open(path, format).await?,
            DataStore::ObjectStorage(store) => store.open(path, format).await?,
            DataStore::Memory(store) => store.open(path)?,
        };
        info!(
            store = self.kind(),
            path,
            format = %format,
            num_levels = opened.num_levels(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Opened dataset"
        );
        Ok(opened)
    }
}
