//! In-memory LRU cache for rendered tiles.
//!
//! ## Threshold Eviction
//!
//! The cache is bounded by a byte budget rather than an entry count. When
//! an insertion pushes the cache over its capacity, least-recently-used
//! entries are evicted until the cache is back at `threshold * capacity`,
//! so a burst of inserts does not evict on every call.
//!
//! ## Statistics
//!
//! Hits, misses, evictions, eviction runs, size and entry count are kept in
//! atomics so they can be read without taking the cache lock.

use bytes::Bytes;
use cube_common::TileCoord;
use lru::LruCache;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default fraction of the capacity the cache is trimmed back to.
pub const DEFAULT_EVICTION_THRESHOLD: f64 = 0.75;

/// Identifies one rendered tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub ds_id: String,
    pub var_name: String,
    pub coord: TileCoord,
}

impl TileKey {
    pub fn new(ds_id: impl Into<String>, var_name: impl Into<String>, level: u32, x: i64, y: i64) -> Self {
        Self {
            ds_id: ds_id.into(),
            var_name: var_name.into(),
            coord: TileCoord::new(level, x, y),
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.ds_id, self.var_name, self.coord)
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    eviction_runs: AtomicU64,
    bytes_evicted_total: AtomicU64,
    size_bytes: AtomicU64,
    entry_count: AtomicU64,
}

/// Point-in-time view of the cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TileCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub eviction_runs: u64,
    pub bytes_evicted_total: u64,
    pub size_bytes: u64,
    pub entry_count: u64,
    pub capacity: u64,
}

impl TileCacheStats {
    /// Cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Byte-budgeted LRU cache of encoded tiles.
///
/// A capacity of zero disables caching; entries larger than the capacity
/// are never stored.
pub struct TileImageCache {
    cache: Arc<RwLock<LruCache<TileKey, Bytes>>>,
    capacity: u64,
    threshold: f64,
    stats: Arc<AtomicStats>,
}

impl TileImageCache {
    /// Create a cache holding up to `capacity` bytes that trims itself to
    /// `threshold * capacity` when full.
    pub fn new(capacity: u64, threshold: f64) -> Self {
        Self {
            cache: Arc::new(RwLock::new(LruCache::unbounded())),
            capacity,
            threshold: threshold.clamp(0.0, 1.0),
            stats: Arc::new(AtomicStats::default()),
        }
    }

    /// A cache that stores nothing.
    pub fn disabled() -> Self {
        Self::new(0, DEFAULT_EVICTION_THRESHOLD)
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Look up a tile, marking it as most recently used.
    pub async fn get(&self, key: &TileKey) -> Option<Bytes> {
        if !self.is_enabled() {
            return None;
        }
        let mut cache = self.cache.write().await;
        match cache.get(key) {
            Some(data) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(data.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether a tile is cached, without touching its recency.
    pub async fn contains(&self, key: &TileKey) -> bool {
        self.cache.read().await.contains(key)
    }

    /// Store a tile. Returns `false` if it was not cached.
    pub async fn put(&self, key: TileKey, data: Bytes) -> bool {
        let tile_size = data.len() as u64;
        if !self.is_enabled() || tile_size > self.capacity {
            debug!(tile = %key, size = tile_size, capacity = self.capacity, "Tile not cached");
            return false;
        }

        let mut cache = self.cache.write().await;
        let mut size = self.stats.size_bytes.load(Ordering::Relaxed);

        if let Some(previous) = cache.put(key, data) {
            size -= previous.len() as u64;
        } else {
            self.stats.entry_count.fetch_add(1, Ordering::Relaxed);
        }
        size += tile_size;
        self.stats.size_bytes.store(size, Ordering::Relaxed);

        if size > self.capacity {
            self.evict_locked(&mut cache);
        }
        true
    }

    /// Evict LRU entries down to the threshold. Caller holds the lock.
    fn evict_locked(&self, cache: &mut LruCache<TileKey, Bytes>) {
        let target = (self.capacity as f64 * self.threshold) as u64;
        let mut size = self.stats.size_bytes.load(Ordering::Relaxed);
        let mut bytes_freed = 0u64;
        let mut entries_evicted = 0u64;

        while size > target {
            let Some((_, evicted)) = cache.pop_lru() else {
                break;
            };
            size -= evicted.len() as u64;
            bytes_freed += evicted.len() as u64;
            entries_evicted += 1;
        }

        self.stats.size_bytes.store(size, Ordering::Relaxed);
        self.stats.entry_count.fetch_sub(entries_evicted, Ordering::Relaxed);
        self.stats.evictions.fetch_add(entries_evicted, Ordering::Relaxed);
        self.stats.eviction_runs.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_evicted_total.fetch_add(bytes_freed, Ordering::Relaxed);

        info!(
            entries_evicted,
            bytes_freed,
            cache_size = size,
            capacity = self.capacity,
            "Tile cache eviction completed"
        );
    }

    /// Get current statistics.
    pub fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            eviction_runs: self.stats.eviction_runs.load(Ordering::Relaxed),
            bytes_evicted_total: self.stats.bytes_evicted_total.load(Ordering::Relaxed),
            size_bytes: self.stats.size_bytes.load(Ordering::Relaxed),
            entry_count: self.stats.entry_count.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.stats.entry_count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn size_bytes(&self) -> u64 {
        self.stats.size_bytes.load(Ordering::Relaxed)
    }

    /// Current cache utilization ratio (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.size_bytes() as f64 / self.capacity as f64
        }
    }

    /// Drop all entries and reset statistics.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        let entries = cache.len();
        cache.clear();

        self.stats.hits.store(0, Ordering::Relaxed);
        self.stats.misses.store(0, Ordering::Relaxed);
        self.stats.evictions.store(0, Ordering::Relaxed);
        self.stats.eviction_runs.store(0, Ordering::Relaxed);
        self.stats.bytes_evicted_total.store(0, Ordering::Relaxed);
        self.stats.size_bytes.store(0, Ordering::Relaxed);
        self.stats.entry_count.store(0, Ordering::Relaxed);

        debug!(entries, "Tile cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(x: i64) -> TileKey {
        TileKey::new("ds", "v", 0, x, 0)
    }

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = TileImageCache::new(1024, 0.75);
        assert!(cache.is_empty());
        assert!(cache.get(&key(1)).await.is_none());

        let data = Bytes::from("tile data");
        assert!(cache.put(key(1), data.clone()).await);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(1)).await, Some(data));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert!((stats.hit_rate() - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_threshold_eviction() {
        // 10 tiles of 100 bytes fill the cache, the 11th trims it to 750 bytes
        let cache = TileImageCache::new(1000, 0.75);
        for x in 0..10 {
            cache.put(key(x), Bytes::from(vec![0u8; 100])).await;
        }
        assert_eq!(cache.size_bytes(), 1000);
        assert_eq!(cache.stats().eviction_runs, 0);

        cache.put(key(10), Bytes::from(vec![0u8; 100])).await;
        let stats = cache.stats();
        assert_eq!(stats.eviction_runs, 1);
        assert_eq!(stats.evictions, 4);
        assert_eq!(stats.size_bytes, 700);
        assert_eq!(stats.entry_count, 7);
        // oldest entries went first
        for x in 0..4 {
            assert!(!cache.contains(&key(x)).await);
        }
        for x in 4..11 {
            assert!(cache.contains(&key(x)).await);
        }
    }

    #[tokio::test]
    async fn test_recently_used_survives() {
        let cache = TileImageCache::new(300, 0.75);
        cache.put(key(0), Bytes::from(vec![0u8; 100])).await;
        cache.put(key(1), Bytes::from(vec![0u8; 100])).await;
        cache.put(key(2), Bytes::from(vec![0u8; 100])).await;
        cache.get(&key(0)).await;
        cache.put(key(3), Bytes::from(vec![0u8; 100])).await;
        assert!(cache.contains(&key(0)).await);
        assert!(cache.contains(&key(3)).await);
        assert!(!cache.contains(&key(1)).await);
        assert!(!cache.contains(&key(2)).await);
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let cache = TileImageCache::new(1000, 0.75);
        for x in 0..200 {
            let size = 37 + (x as usize * 53) % 400;
            cache.put(key(x), Bytes::from(vec![0u8; size])).await;
            assert!(cache.size_bytes() <= 1000);
        }
    }

    #[tokio::test]
    async fn test_oversized_and_disabled() {
        let cache = TileImageCache::new(100, 0.75);
        assert!(!cache.put(key(0), Bytes::from(vec![0u8; 101])).await);
        assert!(cache.is_empty());

        let disabled = TileImageCache::disabled();
        assert!(!disabled.put(key(0), Bytes::from("x")).await);
        assert!(disabled.get(&key(0)).await.is_none());
    }

    #[tokio::test]
    async fn test_replace_tracks_size() {
        let cache = TileImageCache::new(100, 0.75);
        cache.put(key(0), Bytes::from("hello")).await;
        cache.put(key(1), Bytes::from("world!")).await;
        assert_eq!(cache.size_bytes(), 11);
        cache.put(key(0), Bytes::from("hello world")).await;
        assert_eq!(cache.size_bytes(), 17);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = TileImageCache::new(100, 0.75);
        cache.put(key(0), Bytes::from("data")).await;
        cache.get(&key(0)).await;
        cache.clear().await;
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
        assert_eq!(cache.stats().hits, 0);
        assert!(!cache.contains(&key(0)).await);
    }

    #[tokio::test]
    async fn test_utilization() {
        let cache = TileImageCache::new(1000, 0.75);
        assert_eq!(cache.utilization(), 0.0);
        cache.put(key(0), Bytes::from(vec![0u8; 500])).await;
        assert!((cache.utilization() - 0.5).abs() < 1e-9);
    }
}
