//! Frame ingestion sources.
//!
//! This module provides a looping frame source over a finite video:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Directories of still images (PNG/JPEG)
//! - In-memory frame lists
//! - Synthetic `stub://` source (testing, demos)
//!
//! Every backend implements `VideoBackend`. `LoopingSource` wraps one backend,
//! rewinds it whenever the read position reaches the frame count, and
//! releases it exactly once when a read fails or the source is dropped.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod images;
mod looping;
pub mod memory;

use anyhow::Result;

use crate::frame::Frame;

pub use file::{open_file_source, FileConfig};
pub use images::ImageSequenceBackend;
pub use looping::{EndOfStream, LoopingSource, SourceStats};
pub use memory::MemoryBackend;

/// A finite, seekable sequence of decoded frames.
pub trait VideoBackend: Send {
    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;

    /// Total frames in one pass. Zero means unknown; the looping source then
    /// counts the first pass.
    fn frame_count(&self) -> u64;

    /// Frames consumed since the last rewind.
    fn position(&self) -> u64;

    /// Move back to the first frame.
    fn rewind(&mut self) -> Result<()>;

    /// Decode the frame at the current position and advance by one.
    fn read(&mut self) -> Result<Frame>;

    /// Close the underlying media handle. Called at most once.
    fn release(&mut self) {}
}
