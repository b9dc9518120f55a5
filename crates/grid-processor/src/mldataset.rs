//! Multi-level (pyramid) datasets.
//!
//! Level 0 is the dataset at native resolution; level `n` has half the
//! resolution of level `n - 1`. Levels are computed on first access and
//! memoized in per-level slots. A slot's mutex is held while its level is
//! computed, so each level is built at most once even under concurrent
//! access; computing level `n` locks slots `n, n-1, ...` in descending
//! order only.

use crate::config::{PyramidConfig, ResampleOptions};
use crate::dataset::Dataset;
use crate::error::{GridProcessorError, Result};
use crate::gridmapping::{GridMapping, DEFAULT_TOLERANCE};
use crate::resample::resample_in_space;
use crate::tilegrid::TileGrid;
use projection::ProjectionProvider;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info};

/// Function applied to each level of another multi-level dataset.
pub type LevelMapper = Arc<dyn Fn(&Dataset, usize) -> Result<Dataset> + Send + Sync>;

/// Where level datasets come from.
enum LevelSource {
    /// Level 0 given, the rest resampled from the level below.
    Resampled,
    /// All levels given up front.
    Stored,
    /// Levels of another multi-level dataset passed through a function.
    Mapped {
        inner: Arc<MultiLevelDataset>,
        mapper: LevelMapper,
    },
    /// Variables of several multi-level datasets merged per level.
    Combined { parts: Vec<Arc<MultiLevelDataset>> },
}

impl LevelSource {
    fn name(&self) -> &'static str {
        match self {
            LevelSource::Resampled => "resampled",
            LevelSource::Stored => "stored",
            LevelSource::Mapped { .. } => "mapped",
            LevelSource::Combined { .. } => "combined",
        }
    }
}

/// A dataset pyramid with lazily computed levels.
pub struct MultiLevelDataset {
    ds_id: String,
    tile_grid: TileGrid,
    source: LevelSource,
    slots: Vec<Mutex<Option<Arc<Dataset>>>>,
    projections: Arc<dyn ProjectionProvider>,
    options: ResampleOptions,
    closed: AtomicBool,
}

impl fmt::Debug for MultiLevelDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiLevelDataset")
            .field("ds_id", &self.ds_id)
            .field("source", &self.source.name())
            .field("num_levels", &self.num_levels())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn lock(slot: &Mutex<Option<Arc<Dataset>>>) -> MutexGuard<'_, Option<Arc<Dataset>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MultiLevelDataset {
    fn with_source(
        ds_id: impl Into<String>,
        tile_grid: TileGrid,
        source: LevelSource,
        projections: Arc<dyn ProjectionProvider>,
        options: ResampleOptions,
    ) -> Self {
        let slots = (0..tile_grid.num_levels()).map(|_| Mutex::new(None)).collect();
        Self {
            ds_id: ds_id.into(),
            tile_grid,
            source,
            slots,
            projections,
            options,
            closed: AtomicBool::new(false),
        }
    }

    /// Pyramid over a single dataset; coarser levels are derived by
    /// resampling.
    pub fn from_dataset(
        ds_id: impl Into<String>,
        base: Dataset,
        grid_mapping: GridMapping,
        pyramid: &PyramidConfig,
        projections: Arc<dyn ProjectionProvider>,
        options: ResampleOptions,
    ) -> Result<Self> {
        let tile_grid = TileGrid::from_grid_mapping(&grid_mapping, pyramid.tile_size, pyramid.max_levels)?;
        let ml = Self::with_source(ds_id, tile_grid, LevelSource::Resampled, projections, options);
        *lock(&ml.slots[0]) = Some(Arc::new(base));
        Ok(ml)
    }

    /// Pyramid over stored levels, native resolution first.
    ///
    /// Every level must have the size the pyramid derives from level 0.
    pub fn from_levels(
        ds_id: impl Into<String>,
        levels: Vec<Dataset>,
        grid_mapping: GridMapping,
        tile_size: usize,
        projections: Arc<dyn ProjectionProvider>,
        options: ResampleOptions,
    ) -> Result<Self> {
        let ds_id = ds_id.into();
        if levels.is_empty() {
            return Err(GridProcessorError::invalid_dataset(format!(
                "multi-level dataset '{}' has no levels",
                ds_id
            )));
        }
        let tile_grid = TileGrid::new(&grid_mapping, tile_size, levels.len())?;

        for (level, ds) in levels.iter().enumerate().skip(1) {
            let expected = tile_grid
                .ml_grid_mapping(level)
                .map(GridMapping::size)
                .unwrap_or_default();
            let actual = GridMapping::from_dataset(ds, Some(grid_mapping.crs().clone()), DEFAULT_TOLERANCE)?.size();
            if actual != expected {
                return Err(GridProcessorError::invalid_dataset(format!(
                    "inconsistent multi-level dataset '{}': level {} is {}x{}, expected {}x{}",
                    ds_id, level, actual.0, actual.1, expected.0, expected.1
                )));
            }
        }

        let ml = Self::with_source(ds_id, tile_grid, LevelSource::Stored, projections, options);
        for (slot, ds) in ml.slots.iter().zip(levels) {
            *lock(slot) = Some(Arc::new(ds));
        }
        Ok(ml)
    }

    /// Each level of `inner` passed through `mapper` on first access.
    pub fn mapped(ds_id: impl Into<String>, inner: Arc<MultiLevelDataset>, mapper: LevelMapper) -> Self {
        let tile_grid = inner.tile_grid.clone();
        let projections = Arc::clone(&inner.projections);
        let options = inner.options;
        Self::with_source(ds_id, tile_grid, LevelSource::Mapped { inner, mapper }, projections, options)
    }

    /// `inner` under another identifier.
    pub fn identity(ds_id: impl Into<String>, inner: Arc<MultiLevelDataset>) -> Self {
        Self::mapped(ds_id, inner, Arc::new(|ds: &Dataset, _level: usize| Ok(ds.clone())))
    }

    /// Variables of `parts` merged level by level. Earlier parts win on
    /// name clashes. All parts must share one grid and number of levels.
    pub fn combined(ds_id: impl Into<String>, parts: Vec<Arc<MultiLevelDataset>>) -> Result<Self> {
        let ds_id = ds_id.into();
        let first = parts.first().ok_or_else(|| {
            GridProcessorError::invalid_dataset(format!("combined dataset '{}' has no parts", ds_id))
        })?;
        for part in &parts[1..] {
            if part.num_levels() != first.num_levels()
                || !part.grid_mapping().is_close(first.grid_mapping(), DEFAULT_TOLERANCE)
            {
                return Err(GridProcessorError::invalid_dataset(format!(
                    "cannot combine '{}' with '{}': grids differ",
                    part.ds_id, first.ds_id
                )));
            }
        }
        let tile_grid = first.tile_grid.clone();
        let projections = Arc::clone(&first.projections);
        let options = first.options;
        Ok(Self::with_source(ds_id, tile_grid, LevelSource::Combined { parts }, projections, options))
    }

    pub fn ds_id(&self) -> &str {
        &self.ds_id
    }

    pub fn num_levels(&self) -> usize {
        self.slots.len()
    }

    pub fn tile_grid(&self) -> &TileGrid {
        &self.tile_grid
    }

    /// Grid mapping of level 0.
    pub fn grid_mapping(&self) -> &GridMapping {
        self.tile_grid.grid_mapping()
    }

    /// Grid mapping of `level`.
    pub fn level_grid_mapping(&self, level: usize) -> Result<&GridMapping> {
        self.tile_grid
            .ml_grid_mapping(level)
            .ok_or(GridProcessorError::InvalidLevel {
                level,
                num_levels: self.num_levels(),
            })
    }

    /// Average resolution per level, native first.
    pub fn resolutions(&self) -> Vec<f64> {
        let mut resolutions = self.tile_grid.resolutions();
        resolutions.reverse();
        resolutions
    }

    /// Coarsest level at least as fine as `res`.
    pub fn level_for_resolution(&self, res: f64) -> usize {
        self.tile_grid.ml_level(self.tile_grid.level_for_resolution(res))
    }

    pub fn is_level_computed(&self, level: usize) -> bool {
        self.slots.get(level).is_some_and(|slot| lock(slot).is_some())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Dataset of `level`, computing it (and any missing finer levels it
    /// derives from) on first access.
    pub fn get_dataset(&self, level: usize) -> Result<Arc<Dataset>> {
        if self.is_closed() {
            return Err(GridProcessorError::Closed(self.ds_id.clone()));
        }
        let slot = self.slots.get(level).ok_or(GridProcessorError::InvalidLevel {
            level,
            num_levels: self.num_levels(),
        })?;

        let mut guard = lock(slot);
        if let Some(ds) = guard.as_ref() {
            return Ok(Arc::clone(ds));
        }

        let start = Instant::now();
        let ds = Arc::new(self.compute_level(level)?);
        if self.is_closed() {
            return Err(GridProcessorError::Closed(self.ds_id.clone()));
        }
        *guard = Some(Arc::clone(&ds));

        debug!(
            ds_id = %self.ds_id,
            level,
            source = self.source.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Computed dataset level"
        );
        Ok(ds)
    }

    /// Shorthand for level 0.
    pub fn base_dataset(&self) -> Result<Arc<Dataset>> {
        self.get_dataset(0)
    }

    fn compute_level(&self, level: usize) -> Result<Dataset> {
        match &self.source {
            LevelSource::Resampled if level > 0 => {
                let finer = self.get_dataset(level - 1)?;
                let source_gm = self.level_grid_mapping(level - 1)?;
                let target_gm = self.level_grid_mapping(level)?;
                resample_in_space(
                    &finer,
                    source_gm,
                    target_gm,
                    None,
                    self.projections.as_ref(),
                    &self.options,
                )
            }
            // Given levels only go missing when closed.
            LevelSource::Resampled | LevelSource::Stored => Err(GridProcessorError::Closed(self.ds_id.clone())),
            LevelSource::Mapped { inner, mapper } => {
                let ds = inner.get_dataset(level)?;
                mapper(&ds, level)
            }
            LevelSource::Combined { parts } => {
                let mut merged = Dataset::new();
                for part in parts {
                    let ds = part.get_dataset(level)?;
                    for (name, var) in &ds.coords {
                        merged.coords.entry(name.clone()).or_insert_with(|| var.clone());
                    }
                    for (name, var) in &ds.data_vars {
                        merged.data_vars.entry(name.clone()).or_insert_with(|| var.clone());
                    }
                    for (key, value) in &ds.attrs {
                        merged.attrs.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
                Ok(merged)
            }
        }
    }

    /// Release all computed levels. Idempotent. A mapped dataset also
    /// closes the dataset it wraps; combined parts stay open.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = self.slots.iter().filter(|slot| lock(slot).take().is_some()).count();
        if let LevelSource::Mapped { inner, .. } = &self.source {
            inner.close();
        }
        info!(ds_id = %self.ds_id, released_levels = released, "Closed multi-level dataset");
    }
}
