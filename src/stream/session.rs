use anyhow::{Context, Result};
use std::sync::Arc;

use super::{OccupancyRecord, StreamError};
use crate::config::ParkwatchConfig;
use crate::detect::{OccupancyDetector, OccupancySummary};
use crate::ingest::{open_file_source, LoopingSource, SourceStats};
use crate::lot::ParkingLot;

/// Output of one read-classify cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    pub record: OccupancyRecord,
    pub summary: OccupancySummary,
}

/// Everything one detection loop owns: the open video and the detector.
pub struct Session {
    source: LoopingSource,
    detector: OccupancyDetector,
}

impl Session {
    pub fn new(source: LoopingSource, detector: OccupancyDetector) -> Self {
        Self { source, detector }
    }

    /// Open the configured video and build a detector over the shared lot.
    pub fn open(cfg: &ParkwatchConfig, lot: Arc<ParkingLot>) -> Result<Self> {
        let source = open_file_source(&cfg.video)
            .with_context(|| format!("failed to open video input '{}'", cfg.video.path))?;
        let detector = OccupancyDetector::new(lot, cfg.detector.pipeline, cfg.detector.vacancy_threshold)
            .context("invalid detector parameters")?;
        Ok(Self::new(source, detector))
    }

    /// Read one frame, classify every space and build the record.
    ///
    /// The record's `frame` is the source position after the read.
    pub fn cycle(&mut self) -> Result<Cycle, StreamError> {
        let frame = self.source.next_frame()?;
        let summary = self.detector.classify(&frame)?;
        let record = OccupancyRecord::now(self.source.position(), &summary);
        Ok(Cycle { record, summary })
    }

    pub fn release(&mut self) {
        self.source.release();
    }

    pub fn is_released(&self) -> bool {
        self.source.is_released()
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    pub fn detector(&self) -> &OccupancyDetector {
        &self.detector
    }
}
