use std::sync::Arc;

use image::GrayImage;

use super::pipeline::{ForegroundPipeline, PipelineParams};
use super::result::{OccupancySummary, SpaceStatus, Stage, TransformError};
use crate::frame::Frame;
use crate::lot::ParkingLot;

/// A space with fewer foreground pixels than this is vacant.
pub const DEFAULT_VACANCY_THRESHOLD: u32 = 900;

/// Classifies every configured space on a frame.
///
/// The lot is shared read-only; the detector only remembers which frame size
/// it last validated the space rectangles against.
pub struct OccupancyDetector {
    lot: Arc<ParkingLot>,
    pipeline: ForegroundPipeline,
    vacancy_threshold: u32,
    checked_dims: Option<(u32, u32)>,
}

impl OccupancyDetector {
    pub fn new(
        lot: Arc<ParkingLot>,
        params: PipelineParams,
        vacancy_threshold: u32,
    ) -> Result<Self, TransformError> {
        Ok(Self {
            lot,
            pipeline: ForegroundPipeline::new(params)?,
            vacancy_threshold,
            checked_dims: None,
        })
    }

    pub fn with_defaults(lot: Arc<ParkingLot>) -> Self {
        Self {
            lot,
            pipeline: ForegroundPipeline::default(),
            vacancy_threshold: DEFAULT_VACANCY_THRESHOLD,
            checked_dims: None,
        }
    }

    pub fn lot(&self) -> &ParkingLot {
        &self.lot
    }

    pub fn vacancy_threshold(&self) -> u32 {
        self.vacancy_threshold
    }

    pub fn params(&self) -> &PipelineParams {
        self.pipeline.params()
    }

    /// Run the transform chain and score each space.
    pub fn classify(&mut self, frame: &Frame) -> Result<OccupancySummary, TransformError> {
        let mask = self.pipeline.mask(frame)?;
        self.score_mask(&mask)
    }

    /// Score a precomputed foreground mask.
    pub fn score_mask(&mut self, mask: &GrayImage) -> Result<OccupancySummary, TransformError> {
        let dims = (mask.width(), mask.height());
        if self.checked_dims != Some(dims) {
            self.lot
                .check_bounds(dims.0, dims.1)
                .map_err(|e| TransformError::new(Stage::Scoring, e.to_string()))?;
            self.checked_dims = Some(dims);
        }

        let geometry = self.lot.geometry();
        let spaces = self
            .lot
            .spaces()
            .iter()
            .enumerate()
            .map(|(index, space)| {
                let count = count_nonzero(mask, space.x, space.y, geometry.width, geometry.height);
                SpaceStatus {
                    index,
                    x: space.x,
                    y: space.y,
                    count,
                    occupied: !is_vacant(count, self.vacancy_threshold),
                }
            })
            .collect();
        Ok(OccupancySummary { spaces })
    }
}

/// Vacant iff strictly below the threshold.
pub fn is_vacant(count: u32, threshold: u32) -> bool {
    count < threshold
}

fn count_nonzero(mask: &GrayImage, x: u32, y: u32, width: u32, height: u32) -> u32 {
    let stride = mask.width() as usize;
    let raw = mask.as_raw();
    (y..y + height)
        .map(|row| {
            let start = row as usize * stride + x as usize;
            raw[start..start + width as usize]
                .iter()
                .filter(|v| **v != 0)
                .count() as u32
        })
        .sum()
}
