//! Ring error types.

use thiserror::Error;

use crate::ring::Residency;

/// Result type alias using [`RingError`].
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors raised by ring operations.
#[derive(Debug, Error)]
pub enum RingError {
    /// A second writer tried to acquire write access.
    #[error("ring '{0}' already has an active writer")]
    WriterConflict(String),

    /// Writing was requested after the writer guard was dropped.
    #[error("ring '{0}' writing has ended")]
    WritingEnded(String),

    /// A reserve exceeded the configured span size.
    #[error("reserve of {requested} bytes exceeds span size {span}")]
    SpanTooLarge {
        /// Bytes requested.
        requested: usize,
        /// Configured span size.
        span: usize,
    },

    /// The ring was used before `resize` configured a span size.
    #[error("ring '{0}' has no span size; call resize first")]
    Unsized(String),

    /// `resize` was called while a sequence was open.
    #[error("ring '{0}' cannot be resized inside an open sequence")]
    ResizeLocked(String),

    /// A stage bound to a ring with incompatible residency.
    #[error("ring '{ring}' is {ring_residency:?} but stage '{stage}' runs on {stage_residency:?}")]
    ResidencyMismatch {
        /// Ring name.
        ring: String,
        /// Ring residency.
        ring_residency: Residency,
        /// Binding stage name.
        stage: String,
        /// Stage residency.
        stage_residency: Residency,
    },
}
