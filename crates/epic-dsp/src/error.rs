//! DSP error types.

use thiserror::Error;

/// Result type alias using [`DspError`].
pub type Result<T> = std::result::Result<T, DspError>;

/// Errors raised by the DSP kernels.
#[derive(Debug, Error)]
pub enum DspError {
    /// A buffer length disagrees with the declared shape.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// The antenna array does not fit on the requested grid.
    #[error(
        "grid of {grid_size} px cannot hold the array: extent {extent:.1} px at channel {chan}"
    )]
    GridTooSmall {
        /// Requested grid size in pixels.
        grid_size: usize,
        /// Array extent in pixels at the offending channel.
        extent: f64,
        /// Channel index where the extent peaks.
        chan: usize,
    },

    /// A kernel buffer is not `nplanes * extent * extent` long.
    #[error("kernel of {len} taps does not tile extent {extent}")]
    BadKernel {
        /// Kernel buffer length.
        len: usize,
        /// Declared kernel extent.
        extent: usize,
    },
}

impl DspError {
    /// Creates a [`DspError::InvalidShape`].
    #[inline]
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::InvalidShape(msg.into())
    }
}
