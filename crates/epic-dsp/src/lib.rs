//! # epic-dsp
//!
//! The arithmetic of the EPIC imaging pipeline: channelization, packed
//! 4-bit complex codecs, zenith phase corrections, antenna-to-grid
//! coordinate precomputation, the convolutional UV gridder, batched 2-D
//! FFTs, and the cross-polarization / autocorrelation accumulators.
//!
//! Everything here is shape-in, shape-out and free of pipeline state; the
//! stages in `epic-pipeline` own buffers and sequencing and call into this
//! crate per gulp.
//!
//! FFTs are unnormalized in both directions, matching the device FFT
//! libraries the deployed correlator runs on; the only scaling applied
//! anywhere is the `1/sqrt(nchan)` quantization scale in the channelizer.

#![warn(missing_docs)]

pub mod accumulate;
pub mod channelize;
pub mod error;
pub mod fft2;
pub mod grid;
pub mod locations;
pub mod pack;
pub mod phase;

pub use channelize::Channelizer;
pub use error::{DspError, Result};
pub use fft2::Fft2;
pub use grid::{grid_batch, GridParams};
pub use locations::{generate_locations, Locations};
pub use phase::zenith_phases;

pub use epic_core::Complex32;
