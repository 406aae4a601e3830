//! # epic-core
//!
//! Core types for the EPIC direct-imaging correlator.
//!
//! This crate provides the foundational types shared by every stage of the
//! imaging pipeline:
//!
//! - [`ObservingConfig`] - Immutable observing constants (sample rate,
//!   channel bandwidth, epoch) threaded through the pipeline instead of
//!   module globals
//! - [`SampleFormat`] - Element encodings carried by ring spans (`cf64`,
//!   `ci8`, `ci4`, `i8`)
//! - [`SequenceHeader`] - The per-sequence metadata record, kept both typed
//!   and as raw JSON for interoperability
//! - [`Antenna`], [`Station`], [`CableModel`] - Telescope metadata consumed
//!   by the phase and location precomputations
//!
//! ## Crate Structure
//!
//! `epic-core` has no internal dependencies; every other EPIC crate depends
//! on it:
//!
//! ```text
//! epic-core (this crate)
//!    ^
//!    |
//!    +-- epic-ring (bounded span queues)
//!    +-- epic-dsp (channelizer, gridder, FFTs)
//!    +-- epic-io (voltage streams, image archives)
//!    +-- epic-pipeline (stages and orchestration)
//! ```

#![warn(missing_docs)]

pub mod antenna;
pub mod config;
pub mod error;
pub mod format;
pub mod header;

pub use antenna::{Antenna, CableModel, Polarization, Station};
pub use config::ObservingConfig;
pub use error::{CoreError, Result};
pub use format::SampleFormat;
pub use header::SequenceHeader;

/// Complex sample type used throughout the pipeline (`complex64`: two f32).
pub type Complex32 = num_complex::Complex<f32>;
