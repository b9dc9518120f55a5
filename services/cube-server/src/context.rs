//! Service context: resolves dataset identifiers to cached multi-level
//! datasets and serves tiles from them.
//!
//! Everything that depends on the configuration (dataset cache, tile
//! cache, data stores) lives in one [`ContextState`] generation. Readers
//! take a snapshot of the current generation; [`ServiceContext::set_config`]
//! swaps in a fresh generation under the write lock and only then closes
//! the old one, so no reader ever sees a half-cleared cache.

use crate::augmentation::{AugmentationRegistry, DatasetFuture, DatasetGetter};
use crate::config::{DatasetConfig, FileSystem, ServerConfig};
use crate::dataset_cache::{DatasetCache, DatasetCacheEntry};
use crate::rendering::{extract_tile, resolve_color_mapping, RawTileEncoder, ResolvedColorMapping, TileEncoder};
use bytes::Bytes;
use cube_common::{CubeError, CubeResult};
use futures::FutureExt;
use grid_processor::{
    resample_in_space, select_for_target, Dataset, GridMapping, MultiLevelDataset, PyramidConfig, ResampleOptions, TileGrid,
    DEFAULT_TOLERANCE,
};
use projection::{BuiltinProjections, ProjectionProvider};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use storage::{
    DataStore, DataStorePool, DirectoryStore, MemoryStore, OpenedDataset, TileCacheStats, TileImageCache, TileKey,
};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Source cells kept around the target extent when resampling.
const SUBSET_MARGIN: usize = 2;

/// Collaborators that outlive configuration changes.
#[derive(Clone)]
pub struct ContextOptions {
    pub projections: Arc<dyn ProjectionProvider>,
    pub encoder: Arc<dyn TileEncoder>,
    pub augmentations: AugmentationRegistry,
    /// Backs datasets with `file_system: memory` and `memory` data stores.
    pub memory_store: MemoryStore,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            projections: Arc::new(BuiltinProjections::new()),
            encoder: Arc::new(RawTileEncoder),
            augmentations: AugmentationRegistry::with_builtins(),
            memory_store: MemoryStore::new(),
        }
    }
}

/// One configuration generation.
struct ContextState {
    generation: u64,
    config: Arc<ServerConfig>,
    datasets: DatasetCache,
    tiles: TileImageCache,
    stores: DataStorePool,
}

impl ContextState {
    fn new(config: ServerConfig, generation: u64, options: &ContextOptions) -> CubeResult<Self> {
        config.validate().map_err(CubeError::configuration)?;
        let tiles = match config.tile_cache_capacity().map_err(CubeError::configuration)? {
            Some(capacity) => TileImageCache::new(capacity, config.tile_cache_threshold),
            None => TileImageCache::disabled(),
        };
        let stores = DataStorePool::from_configs(&config.data_stores, &options.memory_store)?;
        Ok(Self {
            generation,
            config: Arc::new(config),
            datasets: DatasetCache::new(),
            tiles,
            stores,
        })
    }

    fn store_for(&self, ds_config: &DatasetConfig, options: &ContextOptions) -> CubeResult<DataStore> {
        if let Some(store_id) = &ds_config.store_instance_id {
            return self.stores.get(store_id).cloned();
        }
        Ok(match ds_config.file_system {
            FileSystem::Local => DataStore::Directory(DirectoryStore::new(self.config.base_dir.clone())),
            FileSystem::Memory => DataStore::Memory(options.memory_store.clone()),
        })
    }

    fn color_mapping_config(&self, ds_config: &DatasetConfig, var_name: &str) -> Option<crate::config::ColorMapping> {
        let style = self.config.style(ds_config.style.as_deref()?)?;
        style.color_mappings.get(var_name).cloned()
    }
}

/// Shared entry point of the server.
pub struct ServiceContext {
    options: ContextOptions,
    state: RwLock<Arc<ContextState>>,
    generations: AtomicU64,
    closed: AtomicBool,
}

impl ServiceContext {
    pub fn new(config: ServerConfig, options: ContextOptions) -> CubeResult<Self> {
        let state = ContextState::new(config, 0, &options)?;
        info!(
            datasets = state.config.datasets.len(),
            tile_cache_bytes = state.tiles.capacity(),
            "Service context created"
        );
        Ok(Self {
            options,
            state: RwLock::new(Arc::new(state)),
            generations: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    async fn state(&self) -> CubeResult<Arc<ContextState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CubeError::Internal("service context is closed".to_string()));
        }
        Ok(Arc::clone(&*self.state.read().await))
    }

    pub async fn config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.state.read().await.config)
    }

    /// Replace the configuration. The new configuration is validated first;
    /// on success every cached dataset and tile of the old one is dropped.
    pub async fn set_config(&self, config: ServerConfig) -> CubeResult<()> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let fresh = Arc::new(ContextState::new(config, generation, &self.options)?);

        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, fresh)
        };

        let closed = previous.datasets.close_all();
        previous.tiles.clear().await;
        info!(
            generation,
            previous_generation = previous.generation,
            closed_datasets = closed,
            "Configuration replaced"
        );
        Ok(())
    }

    pub async fn dataset_ids(&self) -> CubeResult<Vec<String>> {
        let state = self.state().await?;
        Ok(state.config.datasets.iter().map(|d| d.identifier.clone()).collect())
    }

    pub async fn get_dataset_config(&self, ds_id: &str) -> CubeResult<DatasetConfig> {
        let state = self.state().await?;
        state.config.dataset(ds_id).cloned()
    }

    /// The multi-level dataset of `ds_id`, opening it on first use.
    ///
    /// Concurrent first calls share one construction.
    pub async fn get_ml_dataset(&self, ds_id: &str) -> CubeResult<Arc<MultiLevelDataset>> {
        loop {
            let state = self.state().await?;
            match ml_dataset_in(self.options.clone(), Arc::clone(&state), ds_id.to_string(), Arc::default()).await {
                // The generation was replaced while we were using it.
                Err(_) if state.datasets.is_closed() && !self.closed.load(Ordering::SeqCst) => {
                    debug!(ds_id, generation = state.generation, "Retrying on the current configuration");
                }
                result => return result,
            }
        }
    }

    /// Dataset of a pyramid level, 0 being native resolution.
    pub async fn get_dataset(&self, ds_id: &str, level: usize) -> CubeResult<Arc<Dataset>> {
        let ml = self.get_ml_dataset(ds_id).await?;
        if level >= ml.num_levels() {
            return Err(CubeError::tile_index(
                level as i64,
                0,
                0,
                format!("level must be in 0..{}", ml.num_levels()),
            ));
        }
        blocking(move || Ok(ml.get_dataset(level)?)).await
    }

    pub async fn get_tile_grid(&self, ds_id: &str) -> CubeResult<TileGrid> {
        Ok(self.get_ml_dataset(ds_id).await?.tile_grid().clone())
    }

    /// Color bar and value range used to render `var_name`.
    pub async fn get_color_mapping(&self, ds_id: &str, var_name: &str) -> CubeResult<ResolvedColorMapping> {
        let state = self.state().await?;
        let ds_config = state.config.dataset(ds_id)?.clone();
        let style = state.color_mapping_config(&ds_config, var_name);
        let ml = self.get_ml_dataset(ds_id).await?;
        let (ds_id, var_name) = (ds_id.to_string(), var_name.to_string());
        blocking(move || {
            let base = ml.base_dataset()?;
            let var = base
                .variable(&var_name)
                .ok_or_else(|| CubeError::variable_not_found(&ds_id, &var_name))?;
            Ok(resolve_color_mapping(style.as_ref(), var))
        })
        .await
    }

    /// Encoded tile of `var_name`. `level` counts tile levels, 0 being the
    /// coarsest.
    #[instrument(skip(self))]
    pub async fn get_tile(&self, ds_id: &str, var_name: &str, level: i64, x: i64, y: i64) -> CubeResult<Bytes> {
        let state = self.state().await?;
        let ds_config = state.config.dataset(ds_id)?.clone();
        let ml = self.get_ml_dataset(ds_id).await?;

        let tile_grid = ml.tile_grid();
        let (i0, j0, _, _) = tile_grid.tile_window(level, x, y)?;
        let key = TileKey::new(ds_id, var_name, level as u32, x, y);
        if let Some(bytes) = state.tiles.get(&key).await {
            return Ok(bytes);
        }

        let start = Instant::now();
        let ml_level = tile_grid.ml_level(level as usize);
        let (tile_width, tile_height) = tile_grid.tile_size();
        let style = state.color_mapping_config(&ds_config, var_name);
        let encoder = Arc::clone(&self.options.encoder);
        let (ds_id_owned, var_owned) = (ds_id.to_string(), var_name.to_string());

        let bytes = blocking(move || {
            let ds = ml.get_dataset(ml_level)?;
            let var = ds
                .variable(&var_owned)
                .ok_or_else(|| CubeError::variable_not_found(&ds_id_owned, &var_owned))?;
            let base = ml.base_dataset()?;
            let mapping = resolve_color_mapping(style.as_ref(), base.variable(&var_owned).unwrap_or(var));
            let values = extract_tile(var, i0, j0, tile_width, tile_height);
            encoder.encode(&values, tile_width, tile_height, &mapping)
        })
        .await?;

        state.tiles.put(key, bytes.clone()).await;
        debug!(
            level,
            x,
            y,
            ml_level,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rendered tile"
        );
        Ok(bytes)
    }

    /// Resample `ds_id` onto `target`. The pyramid level closest to the
    /// target resolution (from the finer side) is used as the source.
    pub async fn resample_dataset(
        &self,
        ds_id: &str,
        target: &GridMapping,
        var_names: Option<Vec<String>>,
    ) -> CubeResult<Dataset> {
        let ml = self.get_ml_dataset(ds_id).await?;
        let state = self.state().await?;
        let options: ResampleOptions = state.config.resampling;
        let projections = Arc::clone(&self.options.projections);
        let target = target.clone();

        blocking(move || {
            let level = if ml.grid_mapping().crs().is_equivalent(target.crs()) {
                ml.level_for_resolution(target.avg_res())
            } else {
                0
            };
            let source = ml.get_dataset(level)?;
            let (source, source_gm) = select_for_target(
                &source,
                ml.level_grid_mapping(level)?,
                &target,
                projections.as_ref(),
                SUBSET_MARGIN,
            )?;
            Ok(resample_in_space(
                &source,
                &source_gm,
                &target,
                var_names.as_deref(),
                projections.as_ref(),
                &options,
            )?)
        })
        .await
    }

    pub async fn tile_cache_stats(&self) -> CubeResult<TileCacheStats> {
        Ok(self.state().await?.tiles.stats())
    }

    /// Number of dataset constructions in the current configuration.
    pub async fn dataset_constructions(&self) -> CubeResult<u64> {
        Ok(self.state().await?.datasets.constructions())
    }

    /// Close all datasets. Later calls fail.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = Arc::clone(&*self.state.read().await);
        state.datasets.close_all();
        state.tiles.clear().await;
        info!(generation = state.generation, "Service context closed");
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("augmentations", &self.options.augmentations)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Run CPU-bound work off the async workers.
async fn blocking<T, F>(f: F) -> CubeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CubeResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CubeError::Internal(format!("blocking task failed: {}", e)))?
}

/// Multi-level dataset `ds_id` of one generation. `chain` lists datasets
/// under construction on this call path.
fn ml_dataset_in(
    options: ContextOptions,
    state: Arc<ContextState>,
    ds_id: String,
    chain: Arc<Vec<String>>,
) -> DatasetFuture {
    async move {
        let ds_config = state.config.dataset(&ds_id)?.clone();
        let entry = state
            .datasets
            .get_or_open(&ds_id, || open_entry(options.clone(), Arc::clone(&state), ds_config, chain))
            .await?;
        Ok(Arc::clone(&entry.ml_dataset))
    }
    .boxed()
}

async fn open_entry(
    options: ContextOptions,
    state: Arc<ContextState>,
    ds_config: DatasetConfig,
    chain: Arc<Vec<String>>,
) -> CubeResult<DatasetCacheEntry> {
    let start = Instant::now();
    let ds_id = ds_config.identifier.clone();
    let store = state.store_for(&ds_config, &options)?;
    let format = ds_config.data_format()?;
    let opened = store.open(&ds_config.path, format).await?;

    let ml = {
        let ds_config = ds_config.clone();
        let tile_size = ds_config.tile_size.unwrap_or(state.config.tile_size);
        let resampling = state.config.resampling;
        let projections = Arc::clone(&options.projections);
        blocking(move || build_ml_dataset(opened, &ds_config, tile_size, projections, resampling)).await?
    };
    let mut ml = Arc::new(ml);

    if let Some(augmentation) = &ds_config.augmentation {
        let function = options.augmentations.get(&augmentation.function)?;
        let mut getter_chain = chain.as_ref().clone();
        getter_chain.push(ds_id.clone());
        let getter = {
            let (options, state) = (options.clone(), Arc::clone(&state));
            DatasetGetter::new(getter_chain, move |other, chain| {
                ml_dataset_in(options.clone(), Arc::clone(&state), other, chain)
            })
        };
        ml = Arc::new(function.augment(ml, &getter, &augmentation.parameters).await?);
        debug!(ds_id = %ds_id, function = %augmentation.function, "Applied augmentation");
    }

    info!(
        ds_id = %ds_id,
        generation = state.generation,
        num_levels = ml.num_levels(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Opened multi-level dataset"
    );
    Ok(DatasetCacheEntry::new(ml, ds_config))
}

fn build_ml_dataset(
    opened: OpenedDataset,
    ds_config: &DatasetConfig,
    tile_size: usize,
    projections: Arc<dyn ProjectionProvider>,
    resampling: ResampleOptions,
) -> CubeResult<MultiLevelDataset> {
    let ds_id = ds_config.identifier.as_str();
    let select = |ds: Dataset| -> CubeResult<Dataset> {
        match &ds_config.variables {
            Some(names) => Ok(ds.select_vars(names).map_err(|_| {
                CubeError::configuration(format!(
                    "dataset '{}' does not provide all of the variables {:?}",
                    ds_id, names
                ))
            })?),
            None => Ok(ds),
        }
    };

    match opened {
        OpenedDataset::Single(ds) => {
            let ds = select(ds)?;
            let gm = GridMapping::from_dataset(&ds, ds_config.crs.clone(), DEFAULT_TOLERANCE)?;
            let pyramid = PyramidConfig {
                tile_size,
                max_levels: ds_config.num_levels,
            };
            Ok(MultiLevelDataset::from_dataset(ds_id, ds, gm, &pyramid, projections, resampling)?)
        }
        OpenedDataset::Levels(levels) => {
            let keep = ds_config.num_levels.unwrap_or(levels.len());
            let levels = levels
                .into_iter()
                .take(keep)
                .map(select)
                .collect::<CubeResult<Vec<_>>>()?;
            let base = levels
                .first()
                .ok_or_else(|| CubeError::storage(format!("dataset '{}' has no levels", ds_id)))?;
            let gm = GridMapping::from_dataset(base, ds_config.crs.clone(), DEFAULT_TOLERANCE)?;
            Ok(MultiLevelDataset::from_levels(ds_id, levels, gm, tile_size, projections, resampling)?)
        }
    }
}
