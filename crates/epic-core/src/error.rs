//! Error types shared across the EPIC crates.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the core metadata and configuration types.
///
/// The pipeline-level error taxonomy (transient vs. sequence-terminating
/// vs. fatal) lives in `epic-pipeline`; this enum covers the failures that
/// can occur before any data flows.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A sequence header failed to serialize or deserialize.
    #[error("header codec error: {0}")]
    HeaderCodec(#[from] serde_json::Error),

    /// A header declares a shape inconsistent with a span size.
    #[error("shape mismatch: header declares {expected} bytes, span holds {got}")]
    ShapeMismatch {
        /// Bytes implied by the header shape.
        expected: usize,
        /// Bytes actually present in the span.
        got: usize,
    },

    /// Station metadata could not be loaded.
    #[error("station metadata error: {0}")]
    Station(String),

    /// I/O error while loading metadata.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Creates a [`CoreError::Config`].
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a [`CoreError::Station`].
    #[inline]
    pub fn station(msg: impl Into<String>) -> Self {
        Self::Station(msg.into())
    }
}
