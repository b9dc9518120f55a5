//! Error types for grid processing.

use cube_common::CubeError;
use projection::ProjectionError;
use thiserror::Error;

/// Errors that can occur during grid processing.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// No usable spatial coordinates, or inconsistent ones.
    #[error("grid mapping error: {0}")]
    GridMapping(String),

    /// Source and target grids cannot be related.
    #[error("resampling error: {0}")]
    Resampling(String),

    /// Coordinate transformation failed.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// A named variable does not exist.
    #[error("variable not found: {0}")]
    VariableNotFound(String),

    /// Variable shape and data length disagree, or dimensions clash.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// Pyramid level outside `0..num_levels`.
    #[error("level {level} out of range, dataset has {num_levels} level(s)")]
    InvalidLevel { level: usize, num_levels: usize },

    /// Tile address outside the tile grid.
    #[error("invalid tile {level}/{x}/{y}: {reason}")]
    TileIndex {
        level: i64,
        x: i64,
        y: i64,
        reason: String,
    },

    /// Access to a multi-level dataset after it was closed.
    #[error("multi-level dataset '{0}' is closed")]
    Closed(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl GridProcessorError {
    pub fn grid_mapping(msg: impl Into<String>) -> Self {
        Self::GridMapping(msg.into())
    }

    pub fn resampling(msg: impl Into<String>) -> Self {
        Self::Resampling(msg.into())
    }

    pub fn invalid_dataset(msg: impl Into<String>) -> Self {
        Self::InvalidDataset(msg.into())
    }

    pub fn tile_index(level: i64, x: i64, y: i64, reason: impl Into<String>) -> Self {
        Self::TileIndex {
            level,
            x,
            y,
            reason: reason.into(),
        }
    }
}

impl From<GridProcessorError> for CubeError {
    fn from(err: GridProcessorError) -> Self {
        match err {
            GridProcessorError::GridMapping(msg) => CubeError::GridMapping(msg),
            GridProcessorError::Resampling(msg) => CubeError::Resampling(msg),
            GridProcessorError::Projection(e) => CubeError::Projection(e.to_string()),
            GridProcessorError::VariableNotFound(name) => CubeError::VariableNotFound {
                ds_id: String::new(),
                var_name: name,
            },
            GridProcessorError::TileIndex { level, x, y, reason } => {
                CubeError::TileIndex { level, x, y, reason }
            }
            GridProcessorError::ConfigError(msg) => CubeError::Configuration(msg),
            other @ (GridProcessorError::InvalidDataset(_)
            | GridProcessorError::InvalidLevel { .. }
            | GridProcessorError::Closed(_)) => CubeError::Internal(other.to_string()),
        }
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;
