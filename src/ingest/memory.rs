//! In-memory frame list.

use anyhow::{anyhow, Result};

use super::VideoBackend;
use crate::frame::Frame;

/// Backend over a fixed list of frames, cloned out on each read.
pub struct MemoryBackend {
    frames: Vec<Frame>,
    position: usize,
}

impl MemoryBackend {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            position: 0,
        }
    }
}

impl VideoBackend for MemoryBackend {
    fn describe(&self) -> String {
        format!("memory ({} frames)", self.frames.len())
    }

    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let frame = self
            .frames
            .get(self.position)
            .cloned()
            .ok_or_else(|| anyhow!("no frame at position {}", self.position))?;
        self.position += 1;
        Ok(frame)
    }
}
