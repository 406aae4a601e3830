//! # epic-io
//!
//! File formats at the edges of the EPIC pipeline.
//!
//! - [`voltage`] - the offline capture source: a netCDF stream of raw
//!   complex antenna voltages with `freq1`/`sample_rate` metadata and an
//!   interleaved `(antpol, time)` sample array.
//! - [`archive`] - the sink output: one netCDF archive per integration
//!   group holding the image cube, the sequence header verbatim, and the
//!   global integration indices. Archives are written to a temporary name
//!   and renamed so a crash never leaves a partial file behind.

#![warn(missing_docs)]

pub mod archive;
pub mod error;
pub mod voltage;

pub use archive::{read_image_archive, write_image_archive, ArchiveCube};
pub use error::{IoError, Result};
pub use voltage::{write_voltage_file, VoltageReader};
