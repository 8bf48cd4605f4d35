use super::VideoBackend;
use crate::frame::Frame;

/// The source can no longer supply frames, even after loop-back.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("video source exhausted: {reason}")]
pub struct EndOfStream {
    pub reason: String,
}

impl EndOfStream {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Statistics for a looping source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub origin: String,
    pub frames_read: u64,
    pub loops: u64,
    pub released: bool,
}

/// Endless frame sequence over a finite backend.
pub struct LoopingSource {
    backend: Option<Box<dyn VideoBackend>>,
    origin: String,
    frames_read: u64,
    loops: u64,
    /// Pass length counted on the first pass when the backend reports none.
    counted_pass: Option<u64>,
}

impl LoopingSource {
    pub fn new(backend: Box<dyn VideoBackend>) -> Self {
        let origin = backend.describe();
        log::info!(
            "video source opened: {} ({} frames per pass)",
            origin,
            backend.frame_count()
        );
        Self {
            backend: Some(backend),
            origin,
            frames_read: 0,
            loops: 0,
            counted_pass: None,
        }
    }

    /// Read the next frame, rewinding first when the pass is complete.
    ///
    /// When the backend does not know its frame count, the first failed read
    /// after at least one frame ends the pass: its length is remembered, the
    /// backend rewinds and the read is retried once.
    ///
    /// Any failure releases the backend; later calls keep returning
    /// `EndOfStream`.
    pub fn next_frame(&mut self) -> Result<Frame, EndOfStream> {
        let Some(backend) = self.backend.as_mut() else {
            return Err(EndOfStream::new("source released"));
        };

        let count = match backend.frame_count() {
            0 => self.counted_pass.unwrap_or(0),
            n => n,
        };
        if count > 0 && backend.position() >= count {
            self.loop_back()?;
        }

        match self.read_once() {
            Ok(frame) => Ok(frame),
            Err(e) if self.pass_length_unknown() => {
                let Some(backend) = self.backend.as_ref() else {
                    return Err(EndOfStream::new("source released"));
                };
                let pass = backend.position();
                if pass == 0 {
                    return Err(self.fail(format!("read failed: {}", e)));
                }
                log::info!(
                    "{}: frame count unknown, pass ended after {} frames",
                    self.origin,
                    pass
                );
                self.counted_pass = Some(pass);
                self.loop_back()?;
                self.read_once()
                    .map_err(|e| self.fail(format!("read failed after loop-back: {}", e)))
            }
            Err(e) => Err(self.fail(format!("read failed: {}", e))),
        }
    }

    fn pass_length_unknown(&self) -> bool {
        self.counted_pass.is_none()
            && self
                .backend
                .as_ref()
                .is_some_and(|b| b.frame_count() == 0)
    }

    fn read_once(&mut self) -> anyhow::Result<Frame> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("source released"))?;
        let frame = backend.read()?;
        self.frames_read += 1;
        Ok(frame)
    }

    fn loop_back(&mut self) -> Result<(), EndOfStream> {
        let rewound = match self.backend.as_mut() {
            Some(backend) => backend.rewind(),
            None => return Err(EndOfStream::new("source released")),
        };
        if let Err(e) = rewound {
            return Err(self.fail(format!("rewind failed: {}", e)));
        }
        self.loops += 1;
        log::debug!("{}: looped back to start (pass {})", self.origin, self.loops);
        Ok(())
    }

    /// Release the backend and build the terminal error.
    fn fail(&mut self, reason: String) -> EndOfStream {
        self.release();
        EndOfStream::new(reason)
    }

    /// Frames consumed in the current pass (1 after the first read of a pass).
    pub fn position(&self) -> u64 {
        self.backend.as_ref().map_or(0, |b| b.position())
    }

    pub fn frame_count(&self) -> u64 {
        self.backend.as_ref().map_or(0, |b| b.frame_count())
    }

    pub fn is_released(&self) -> bool {
        self.backend.is_none()
    }

    /// Close the media handle. Safe to call repeatedly; only the first call
    /// reaches the backend.
    pub fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.release();
            log::info!(
                "video source released: {} after {} frames",
                self.origin,
                self.frames_read
            );
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            origin: self.origin.clone(),
            frames_read: self.frames_read,
            loops: self.loops,
            released: self.is_released(),
        }
    }
}

impl Drop for LoopingSource {
    fn drop(&mut self) {
        self.release();
    }
}
