//! Local video source selection.
//!
//! `open_file_source` picks a backend from the configured path:
//! - `stub://<name>`: synthetic parking-lot scene (tests, demos)
//! - a directory: still-image sequence
//! - anything else: video file decoded with FFmpeg (feature: ingest-file-ffmpeg)
//!
//! Only local paths are accepted; URL schemes other than `stub://` are rejected.

use anyhow::{anyhow, Result};
use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileBackend;
use super::{ImageSequenceBackend, LoopingSource, VideoBackend};
use crate::frame::Frame;

/// Configuration for a local video source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileConfig {
    /// Local path (e.g., "carPark.mp4", "frames/") or `stub://<name>`.
    pub path: String,
    /// Frame width (synthetic source only).
    pub width: u32,
    /// Frame height (synthetic source only).
    pub height: u32,
    /// Frames per pass (synthetic source only).
    pub synthetic_frames: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            width: 1100,
            height: 720,
            synthetic_frames: 100,
        }
    }
}

/// Open the configured path and wrap it in a looping source.
pub fn open_file_source(config: &FileConfig) -> Result<LoopingSource> {
    Ok(LoopingSource::new(open_backend(config)?))
}

fn open_backend(config: &FileConfig) -> Result<Box<dyn VideoBackend>> {
    if !is_local_file_path(&config.path) {
        return Err(anyhow!(
            "video input only supports local paths or stub:// (got '{}')",
            config.path
        ));
    }
    if config.path.starts_with("stub://") {
        return Ok(Box::new(SyntheticBackend::new(config.clone())?));
    }
    let path = Path::new(&config.path);
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceBackend::open(path)?));
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(FfmpegFileBackend::open(&config.path)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow!(
            "decoding '{}' requires the ingest-file-ffmpeg feature (or pass a frame directory)",
            config.path
        ))
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

const CELL_W: u32 = 120;
const CELL_H: u32 = 60;
const SCENE_PERIOD: u64 = 25;

/// Smooth pavement with striped "cars" parked on a grid. Which cells hold a
/// car changes every `SCENE_PERIOD` frames, and the scene depends only on the
/// position within the pass, so every pass replays identically.
struct SyntheticBackend {
    config: FileConfig,
    frame_len: usize,
    position: u64,
}

impl SyntheticBackend {
    fn new(config: FileConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 || config.synthetic_frames == 0 {
            return Err(anyhow!(
                "synthetic source needs non-zero size and frame count"
            ));
        }
        let frame_len = (config.width as usize)
            .checked_mul(config.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| {
                anyhow!(
                    "synthetic frame size {}x{} overflows",
                    config.width,
                    config.height
                )
            })?;
        Ok(Self {
            config,
            frame_len,
            position: 0,
        })
    }

    fn render(&self, index: u64) -> Result<Frame> {
        let (w, h) = (self.config.width, self.config.height);
        let phase = index / SCENE_PERIOD;
        let cols = w.div_ceil(CELL_W) as u64;
        let mut pixels = Vec::with_capacity(self.frame_len);
        for y in 0..h {
            for x in 0..w {
                let cell = (y / CELL_H) as u64 * cols + (x / CELL_W) as u64;
                let (cx, cy) = (x % CELL_W, y % CELL_H);
                let inside = (8..CELL_W - 8).contains(&cx) && (6..CELL_H - 6).contains(&cy);
                let parked = (cell + phase) % 3 == 0;
                let value = if parked && inside {
                    if (cx / 2 + cy / 2) % 2 == 0 {
                        30
                    } else {
                        220
                    }
                } else {
                    150 + ((x + y) % 8) as u8
                };
                pixels.extend_from_slice(&[value, value, value]);
            }
        }
        Frame::from_rgb(w, h, pixels)
    }
}

impl VideoBackend for SyntheticBackend {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.path)
    }

    fn frame_count(&self) -> u64 {
        self.config.synthetic_frames
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if self.position >= self.config.synthetic_frames {
            return Err(anyhow!("synthetic source past end of pass"));
        }
        let frame = self.render(self.position)?;
        self.position += 1;
        Ok(frame)
    }
}
