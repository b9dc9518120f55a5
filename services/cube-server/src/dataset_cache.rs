//! Per-configuration cache of opened multi-level datasets.
//!
//! Each identifier maps to a `OnceCell`. Concurrent misses for the same
//! identifier wait on the same cell, so a dataset is constructed at most
//! once. A construction that fails (or whose caller goes away) leaves the
//! cell empty and the next lookup starts over.

use crate::config::DatasetConfig;
use chrono::{DateTime, Utc};
use cube_common::{CubeError, CubeResult};
use grid_processor::MultiLevelDataset;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// An opened dataset together with the configuration it was opened from.
#[derive(Debug)]
pub struct DatasetCacheEntry {
    pub ds_id: String,
    pub ml_dataset: Arc<MultiLevelDataset>,
    pub config: DatasetConfig,
    pub opened_at: DateTime<Utc>,
}

impl DatasetCacheEntry {
    pub fn new(ml_dataset: Arc<MultiLevelDataset>, config: DatasetConfig) -> Self {
        Self {
            ds_id: config.identifier.clone(),
            ml_dataset,
            config,
            opened_at: Utc::now(),
        }
    }
}

type Slot = Arc<OnceCell<Arc<DatasetCacheEntry>>>;

#[derive(Debug, Default)]
pub struct DatasetCache {
    slots: Mutex<HashMap<String, Slot>>,
    constructions: AtomicU64,
    closed: AtomicBool,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The cached entry for `ds_id`, running `open` on a miss.
    pub async fn get_or_open<F, Fut>(&self, ds_id: &str, open: F) -> CubeResult<Arc<DatasetCacheEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CubeResult<DatasetCacheEntry>>,
    {
        let slot = {
            let mut slots = self.slots();
            if self.is_closed() {
                return Err(closed_error());
            }
            Arc::clone(slots.entry(ds_id.to_string()).or_default())
        };

        if let Some(entry) = slot.get() {
            debug!(ds_id, "Dataset cache hit");
            return Ok(Arc::clone(entry));
        }

        let entry = slot
            .get_or_try_init(|| async move {
                debug!(ds_id, "Dataset cache miss");
                self.constructions.fetch_add(1, Ordering::SeqCst);
                open().await.map(Arc::new)
            })
            .await?;

        // Raced with close_all: the slot is no longer reachable.
        if self.is_closed() {
            entry.ml_dataset.close();
            return Err(closed_error());
        }
        Ok(Arc::clone(entry))
    }

    /// The entry for `ds_id` if it is open.
    pub fn get(&self, ds_id: &str) -> Option<Arc<DatasetCacheEntry>> {
        self.slots().get(ds_id).and_then(|slot| slot.get().cloned())
    }

    /// Number of constructions started so far.
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Identifiers of open datasets.
    pub fn open_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close and forget one dataset.
    pub fn remove(&self, ds_id: &str) -> bool {
        let slot = self.slots().remove(ds_id);
        match slot.and_then(|slot| slot.get().cloned()) {
            Some(entry) => {
                entry.ml_dataset.close();
                true
            }
            None => false,
        }
    }

    /// Close every open dataset and refuse further lookups.
    pub fn close_all(&self) -> usize {
        let slots = {
            let mut slots = self.slots();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *slots)
        };

        let mut closed = 0;
        for slot in slots.into_values() {
            if let Some(entry) = slot.get() {
                entry.ml_dataset.close();
                closed += 1;
            }
        }
        info!(closed, "Closed dataset cache");
        closed
    }
}

fn closed_error() -> CubeError {
    CubeError::Internal("dataset cache is closed".to_string())
}
