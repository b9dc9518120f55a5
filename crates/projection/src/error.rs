//! Projection errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// No transformation path between the two systems.
    #[error("no projection path from {from} to {to}")]
    Unsupported { from: String, to: String },

    /// Invalid projection parameters.
    #[error("invalid projection parameters: {0}")]
    InvalidParameters(String),

    /// Coordinate arrays of different length.
    #[error("coordinate arrays differ in length: {0} vs {1}")]
    LengthMismatch(usize, usize),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

impl From<ProjectionError> for cube_common::CubeError {
    fn from(err: ProjectionError) -> Self {
        cube_common::CubeError::Projection(err.to_string())
    }
}
