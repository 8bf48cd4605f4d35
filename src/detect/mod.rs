//! Occupancy detection.
//!
//! `pipeline` turns a frame into a binary foreground mask; `occupancy`
//! counts mask pixels inside each parking space and applies the vacancy
//! threshold.

mod occupancy;
pub mod pipeline;
mod result;

pub use occupancy::{is_vacant, OccupancyDetector, DEFAULT_VACANCY_THRESHOLD};
pub use pipeline::{ForegroundPipeline, PipelineParams};
pub use result::{OccupancySummary, SpaceStatus, Stage, TransformError};
