//! Parking occupancy detector
//!
//! This crate watches a fixed camera over a parking lot and streams how many
//! of the calibrated spaces are occupied.
//!
//! # Architecture
//!
//! One loop drives everything, one frame at a time:
//!
//! 1. **Ingest**: a looping source reads the next frame, rewinding to the
//!    start of the video when the pass is complete.
//! 2. **Detect**: the frame becomes a binary foreground mask (grayscale,
//!    Gaussian blur, inverted adaptive threshold, median blur, dilation), and
//!    each space is vacant when fewer than 900 mask pixels fall inside it.
//! 3. **Stream**: an `OccupancyRecord` is emitted downstream, then the loop
//!    pauses for the pacing interval.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames
//! - `lot`: parking space layout loaded from the calibration file
//! - `ingest`: video backends and the looping source
//! - `detect`: transform chain and per-space scoring
//! - `stream`: session, driver state machine, record sinks
//! - `api`: HTTP landing page and WebSocket stream
//! - `config`: file + environment configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod lot;
pub mod stream;

pub use detect::{
    OccupancyDetector, OccupancySummary, PipelineParams, SpaceStatus, Stage, TransformError,
    DEFAULT_VACANCY_THRESHOLD,
};
pub use frame::Frame;
pub use ingest::{
    open_file_source, EndOfStream, FileConfig, LoopingSource, MemoryBackend, VideoBackend,
};
pub use lot::{ParkingLot, ParkingSpace, SpotGeometry};
pub use stream::{
    DriverOptions, DriverReport, DriverState, OccupancyRecord, RecordSink, Session, StopReason,
    StreamDriver, StreamError,
};
