//! I/O error types.

use thiserror::Error;

/// Result type alias using [`IoError`].
pub type Result<T> = std::result::Result<T, IoError>;

/// Errors raised by file readers and writers.
#[derive(Debug, Error)]
pub enum IoError {
    /// Underlying netCDF library error.
    #[error("netcdf error: {0}")]
    Netcdf(#[from] netcdf::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required variable is absent from the file.
    #[error("file is missing variable '{0}'")]
    MissingVariable(String),

    /// File contents disagree with the declared shape.
    #[error("shape error: {0}")]
    Shape(String),
}

impl IoError {
    /// Creates an [`IoError::Shape`].
    #[inline]
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }
}
