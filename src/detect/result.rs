use std::fmt;

use serde::Serialize;

/// Pipeline stage, used to name where a frame was rejected.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Grayscale,
    GaussianBlur,
    AdaptiveThreshold,
    MedianBlur,
    Dilate,
    Scoring,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Grayscale => "grayscale",
            Stage::GaussianBlur => "gaussian_blur",
            Stage::AdaptiveThreshold => "adaptive_threshold",
            Stage::MedianBlur => "median_blur",
            Stage::Dilate => "dilate",
            Stage::Scoring => "scoring",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{stage} failed: {reason}")]
pub struct TransformError {
    pub stage: Stage,
    pub reason: String,
}

impl TransformError {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Score of a single space on one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SpaceStatus {
    pub index: usize,
    pub x: u32,
    pub y: u32,
    /// Foreground pixels inside the space rectangle.
    pub count: u32,
    pub occupied: bool,
}

/// Per-frame classification of the whole lot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OccupancySummary {
    pub spaces: Vec<SpaceStatus>,
}

impl OccupancySummary {
    pub fn total(&self) -> usize {
        self.spaces.len()
    }

    pub fn vacant(&self) -> usize {
        self.spaces.iter().filter(|s| !s.occupied).count()
    }

    pub fn occupied(&self) -> usize {
        self.total() - self.vacant()
    }
}
