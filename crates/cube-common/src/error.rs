//! Error taxonomy shared by the data cube service.

use thiserror::Error;

/// Result type alias using CubeError.
pub type CubeResult<T> = Result<T, CubeError>;

/// Primary error type surfaced by the service context.
#[derive(Debug, Error)]
pub enum CubeError {
    // === Configuration ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Geometry ===
    #[error("Grid mapping error: {0}")]
    GridMapping(String),

    #[error("Resampling error: {0}")]
    Resampling(String),

    #[error("Projection error: {0}")]
    Projection(String),

    // === Client input ===
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Variable '{var_name}' not found in dataset '{ds_id}'")]
    VariableNotFound { ds_id: String, var_name: String },

    #[error("Invalid tile {level}/{x}/{y}: {reason}")]
    TileIndex {
        level: i64,
        x: i64,
        y: i64,
        reason: String,
    },

    // === Storage ===
    #[error("Storage error: {0}")]
    Storage(String),

    // === Infrastructure ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CubeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn variable_not_found(ds_id: impl Into<String>, var_name: impl Into<String>) -> Self {
        Self::VariableNotFound {
            ds_id: ds_id.into(),
            var_name: var_name.into(),
        }
    }

    pub fn tile_index(level: i64, x: i64, y: i64, reason: impl Into<String>) -> Self {
        Self::TileIndex {
            level,
            x,
            y,
            reason: reason.into(),
        }
    }

    /// Get the HTTP status code a boundary layer should report for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            CubeError::Configuration(_)
            | CubeError::GridMapping(_)
            | CubeError::Resampling(_)
            | CubeError::Projection(_)
            | CubeError::TileIndex { .. } => 400,

            CubeError::DatasetNotFound(_) | CubeError::VariableNotFound { .. } => 404,

            CubeError::Storage(_) => 503,

            CubeError::Internal(_) => 500,
        }
    }

    /// Errors caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CubeError::DatasetNotFound(_)
                | CubeError::VariableNotFound { .. }
                | CubeError::TileIndex { .. }
        )
    }

    /// Only storage failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CubeError::Storage(_))
    }
}

impl From<std::io::Error> for CubeError {
    fn from(err: std::io::Error) -> Self {
        CubeError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CubeError {
    fn from(err: serde_json::Error) -> Self {
        CubeError::Storage(format!("invalid dataset document: {}", err))
    }
}
