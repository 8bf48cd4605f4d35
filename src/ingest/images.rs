//! Still-image directory source.
//!
//! Frames are the PNG/JPEG files of one directory, in file-name order. Each
//! read decodes one file; nothing is cached between reads.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::VideoBackend;
use crate::frame::Frame;

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ImageSequenceBackend {
    dir: PathBuf,
    paths: Vec<PathBuf>,
    position: usize,
}

impl ImageSequenceBackend {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to list frame directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(anyhow!("no PNG/JPEG frames in {}", dir.display()));
        }
        paths.sort();
        Ok(Self {
            dir: dir.to_path_buf(),
            paths,
            position: 0,
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

impl VideoBackend for ImageSequenceBackend {
    fn describe(&self) -> String {
        format!("{} (image sequence)", self.dir.display())
    }

    fn frame_count(&self) -> u64 {
        self.paths.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let path = self
            .paths
            .get(self.position)
            .ok_or_else(|| anyhow!("no frame at position {}", self.position))?;
        let decoded = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?;
        self.position += 1;
        Ok(Frame::from_image(decoded.to_rgb8()))
    }
}
