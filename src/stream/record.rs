use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::detect::OccupancySummary;

/// One streamed occupancy update. Field names are the wire contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    /// Position in the current pass of the video (resets on loop-back).
    pub frame: u64,
    /// Local wall-clock time of record construction, ISO-8601.
    pub timestamp: String,
    pub occupied: usize,
    pub vacant: usize,
    pub total_spots: usize,
}

impl OccupancyRecord {
    pub fn new(frame: u64, summary: &OccupancySummary, at: DateTime<Local>) -> Self {
        let total_spots = summary.total();
        let vacant = summary.vacant();
        Self {
            frame,
            timestamp: format_timestamp(at),
            occupied: total_spots - vacant,
            vacant,
            total_spots,
        }
    }

    pub fn now(frame: u64, summary: &OccupancySummary) -> Self {
        Self::new(frame, summary, Local::now())
    }
}

/// `YYYY-MM-DDTHH:MM:SS.ffffff`, local time without offset.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
