//! # epic-ring
//!
//! Bounded shared-memory span queues connecting EPIC pipeline stages.
//!
//! A [`Ring`] carries fixed-size byte spans ("gulps") organized into
//! sequences. One producer thread writes; any number of consumer threads
//! read, each either *guaranteed* (the writer backpressures until the
//! reader catches up) or *lossy* (the reader skips spans rather than stall
//! the writer).
//!
//! ```text
//!              begin_sequence(header)         read(guarantee)
//! producer ──► [span][span][span][span] ────► consumer(s)
//!              └─ bounded: buffer_factor spans resident at once
//! ```
//!
//! Ordering guarantees:
//!
//! - spans within a sequence are delivered in production order;
//! - sequences are delivered in the order they were begun;
//! - a sequence header is visible to readers before any of its spans;
//! - `writing_ended` terminates all reader iteration.
//!
//! Rings declare a [`Residency`] at construction; stage/ring residency
//! compatibility is checked when the pipeline binds stages, not at first
//! transfer.

#![warn(missing_docs)]

mod error;
mod ring;

pub use error::{Result, RingError};
pub use ring::{
    Residency, Ring, RingWriter, SequenceReader, SequenceStream, SequenceWriter, SpanReader,
    SpanWriter,
};
