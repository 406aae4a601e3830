//! Pipeline error taxonomy.
//!
//! - configuration errors are fatal at startup;
//! - transient I/O (a UDP receive timeout) is retried inside the stage and
//!   never surfaces here;
//! - sequence-terminating errors close the current sequence cleanly;
//! - device and logic errors unwind the whole pipeline.

use thiserror::Error;

/// Result type alias using [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration detected at startup (fatal).
    #[error("configuration error: {0}")]
    Config(String),

    /// Unrecoverable I/O failure (sequence-terminating).
    #[error("I/O failure: {0}")]
    IoFatal(String),

    /// A span size disagrees with the header shape (sequence-terminating).
    #[error("shape mismatch: expected {expected} bytes, span holds {got}")]
    ShapeMismatch {
        /// Bytes implied by the header.
        expected: usize,
        /// Bytes present in the span.
        got: usize,
    },

    /// Compute-engine failure: allocation or FFT plan (process-fatal).
    #[error("device error: {0}")]
    Device(String),

    /// A broken invariant (process-fatal).
    #[error("logic error: {0}")]
    Logic(String),

    /// Ring machinery failure.
    #[error(transparent)]
    Ring(#[from] epic_ring::RingError),

    /// DSP kernel failure.
    #[error(transparent)]
    Dsp(#[from] epic_dsp::DspError),

    /// File format failure.
    #[error(transparent)]
    Io(#[from] epic_io::IoError),

    /// Core metadata failure.
    #[error(transparent)]
    Core(#[from] epic_core::CoreError),
}

impl PipelineError {
    /// Creates a [`PipelineError::Config`].
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a [`PipelineError::IoFatal`].
    #[inline]
    pub fn io_fatal(msg: impl Into<String>) -> Self {
        Self::IoFatal(msg.into())
    }

    /// Creates a [`PipelineError::Logic`].
    #[inline]
    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic(msg.into())
    }

    /// Whether this error should take the whole process down rather than
    /// just terminate the current sequence.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Device(_) | Self::Logic(_) | Self::Ring(_)
        )
    }
}
