//! Storage for the cube server.
//!
//! - [`store`]: data store backends (local directories, S3 compatible
//!   object storage, in-memory) that open dataset documents
//! - [`pool`]: configured stores keyed by identifier
//! - [`tile_cache`]: size-bounded LRU cache of encoded tiles

pub mod pool;
pub mod store;
pub mod tile_cache;

pub use pool::{DataStoreConfig, DataStorePool, StoreParams};
pub use store::{
    DataFormat, DataStore, DirectoryStore, MemoryStore, ObjectStorageStore, OpenedDataset, S3Config,
    LEVELS_INFO_NAME,
};
pub use tile_cache::{TileCacheStats, TileImageCache, TileKey, DEFAULT_EVICTION_THRESHOLD};
