//! # epic-pipeline
//!
//! The streaming stages of the EPIC correlator and the pipeline that runs
//! them.
//!
//! Data flows through bounded rings between threads pinned to dedicated
//! cores:
//!
//! ```text
//! capture ─► ring ─► channelize | decimate ─► ring ─► transpose ─► ring
//!                                                                    │
//!                sink ◄─ ring ◄─ imager (grid → iFFT → crosspol) ◄──┘
//! ```
//!
//! Each stage follows the same skeleton: iterate input sequences, decode
//! the header once, size and re-header the output ring, then stream gulps
//! with acquire/reserve/process timings published under
//! `{StageName}/perf`. The [`Pipeline`] owns startup order, core pinning,
//! residency validation, and shutdown propagation.

#![warn(missing_docs)]

pub mod capture;
pub mod channelizer;
pub mod chips;
pub mod decimate;
pub mod error;
pub mod imager;
pub mod pipeline;
pub mod proclog;
pub mod sink;
pub mod stage;
pub mod transpose;

pub use capture::{LiveCaptureStage, OfflineCaptureStage};
pub use channelizer::ChannelizeStage;
pub use decimate::DecimateStage;
pub use error::{PipelineError, Result};
pub use imager::ImagerStage;
pub use pipeline::Pipeline;
pub use sink::SinkStage;
pub use stage::{Stage, StageContext};
pub use transpose::TransposeStage;
