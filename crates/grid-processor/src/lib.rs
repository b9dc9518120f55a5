//! Grid mappings, spatial resampling and resolution pyramids.
//!
//! This crate holds the geometry core of the data cube service:
//!
//! - **[`GridMapping`]**: how a dataset's cells sit in a CRS, regular
//!   (affine) or irregular (per-cell coordinates)
//! - **[`resample_in_space`]**: moves a dataset from one grid mapping onto
//!   another, by affine index mapping or by rectification
//! - **[`TileGrid`]**: the tile pyramid over a grid mapping
//! - **[`MultiLevelDataset`]**: a pyramid of datasets whose coarser levels
//!   are computed on demand and memoized
//!
//! # Architecture
//!
//! ```text
//! Dataset ──► GridMapping::from_dataset
//!                  │
//!                  ▼
//!             TileGrid (level geometry, coarsest first)
//!                  │
//!                  ▼
//!     MultiLevelDataset::get_dataset(level)
//!                  │
//!                  ├─► slot filled: return cached level
//!                  │
//!                  └─► slot empty: get_dataset(level - 1)
//!                           │
//!                           ▼
//!                      resample_in_space(level - 1 ─► level)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grid_processor::{GridMapping, MultiLevelDataset, PyramidConfig, ResampleOptions};
//!
//! let gm = GridMapping::try_from(&dataset)?;
//! let ml = MultiLevelDataset::from_dataset(
//!     "sst",
//!     dataset,
//!     gm,
//!     &PyramidConfig::default(),
//!     Arc::new(BuiltinProjections::new()),
//!     ResampleOptions::default(),
//! )?;
//! let overview = ml.get_dataset(ml.num_levels() - 1)?;
//! ```

pub mod affine;
pub mod config;
pub mod dataset;
pub mod error;
pub mod gridmapping;
pub mod mldataset;
pub mod resample;
pub mod select;
pub mod tilegrid;

// Re-export commonly used types at crate root
pub use affine::AffineTransform;
pub use config::{PyramidConfig, ResampleOptions};
pub use dataset::{Attrs, Dataset, Variable};
pub use error::{GridProcessorError, Result};
pub use gridmapping::{GridKind, GridMapping, DEFAULT_TOLERANCE};
pub use mldataset::{LevelMapper, MultiLevelDataset};
pub use resample::{resample_in_space, CRS_VAR_NAME};
pub use select::{select_for_target, select_spatial_subset};
pub use tilegrid::{compute_num_levels, TileGrid, TileLevel};
