//! Data cube tile server.
//!
//! ```text
//!   ServerConfig ──> ServiceContext ──> DatasetCache ──> MultiLevelDataset
//!                        │                  │ (single-flight per id)
//!                        │                  └── DataStore::open + Augmentation
//!                        └── TileImageCache <── get_tile ── TileEncoder
//! ```

pub mod augmentation;
pub mod config;
pub mod context;
pub mod dataset_cache;
pub mod rendering;

pub use augmentation::{Augmentation, AugmentationRegistry, DatasetGetter};
pub use config::{
    parse_mem_size, AugmentationConfig, ColorMapping, ConfigError, DatasetConfig, FileSystem, ServerConfig,
    StyleConfig,
};
pub use context::{ContextOptions, ServiceContext};
pub use dataset_cache::{DatasetCache, DatasetCacheEntry};
pub use rendering::{extract_tile, RawTileEncoder, ResolvedColorMapping, TileEncoder};
