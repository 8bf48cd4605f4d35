//! Detection loop and record delivery.
//!
//! A `Session` owns the open video and the detector. `StreamDriver` runs the
//! loop as an explicit state machine (`Running`, `Draining`, `Terminated`)
//! and hands each `OccupancyRecord` to a `RecordSink`. The server wraps a
//! driver in `spawn_producer`, which feeds a bounded channel read by the
//! WebSocket transport.

mod driver;
mod record;
mod session;
mod sink;

pub use driver::{
    spawn_producer, DriverOptions, DriverReport, DriverState, ProducerHandle, StopReason,
    StreamDriver, DEFAULT_PACING,
};
pub use record::{format_timestamp, OccupancyRecord};
pub use session::{Cycle, Session};
pub use sink::{JsonLinesSink, RecordSink};

use crate::detect::TransformError;
use crate::ingest::EndOfStream;

/// Terminal conditions of one loop cycle. None of them are retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The video cannot supply another frame, even after loop-back.
    #[error(transparent)]
    SourceExhausted(#[from] EndOfStream),
    /// A pipeline stage rejected the frame.
    #[error("frame transform failed: {0}")]
    TransformFailure(#[from] TransformError),
    /// The downstream peer went away.
    #[error("stream channel closed")]
    ChannelClosed,
}
