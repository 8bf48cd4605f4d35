//! Parking space layout.
//!
//! The layout is produced by an external calibration tool as a JSON array of
//! `[x, y]` top-left corners. Every space shares one `SpotGeometry`, which
//! comes from configuration rather than the file.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_SPACE_WIDTH: u32 = 105;
pub const DEFAULT_SPACE_HEIGHT: u32 = 48;

/// Width and height shared by every parking space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotGeometry {
    pub width: u32,
    pub height: u32,
}

impl Default for SpotGeometry {
    fn default() -> Self {
        Self {
            width: DEFAULT_SPACE_WIDTH,
            height: DEFAULT_SPACE_HEIGHT,
        }
    }
}

/// Top-left corner of one monitored space, in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct ParkingSpace {
    pub x: u32,
    pub y: u32,
}

impl From<(u32, u32)> for ParkingSpace {
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y }
    }
}

impl From<ParkingSpace> for (u32, u32) {
    fn from(space: ParkingSpace) -> Self {
        (space.x, space.y)
    }
}

impl ParkingSpace {
    /// Exclusive bottom-right corner, `None` on overflow.
    pub fn far_corner(&self, geometry: SpotGeometry) -> Option<(u32, u32)> {
        Some((
            self.x.checked_add(geometry.width)?,
            self.y.checked_add(geometry.height)?,
        ))
    }

    pub fn fits_within(&self, geometry: SpotGeometry, width: u32, height: u32) -> bool {
        match self.far_corner(geometry) {
            Some((x1, y1)) => x1 <= width && y1 <= height,
            None => false,
        }
    }
}

/// Immutable list of spaces loaded once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParkingLot {
    spaces: Vec<ParkingSpace>,
    geometry: SpotGeometry,
}

impl ParkingLot {
    pub fn new(spaces: Vec<ParkingSpace>, geometry: SpotGeometry) -> Result<Self> {
        if geometry.width == 0 || geometry.height == 0 {
            return Err(anyhow!(
                "space geometry must be non-empty (got {}x{})",
                geometry.width,
                geometry.height
            ));
        }
        Ok(Self { spaces, geometry })
    }

    /// Load a calibration file: a JSON array of `[x, y]` pairs.
    pub fn load(path: &Path, geometry: SpotGeometry) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read space list {}", path.display()))?;
        let spaces = parse_spaces(&raw)
            .with_context(|| format!("invalid space list {}", path.display()))?;
        log::info!(
            "loaded {} parking spaces from {} ({}x{})",
            spaces.len(),
            path.display(),
            geometry.width,
            geometry.height
        );
        Self::new(spaces, geometry)
    }

    pub fn spaces(&self) -> &[ParkingSpace] {
        &self.spaces
    }

    pub fn geometry(&self) -> SpotGeometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    /// Check every space rectangle against a frame size.
    pub fn check_bounds(&self, width: u32, height: u32) -> Result<()> {
        for (index, space) in self.spaces.iter().enumerate() {
            if !space.fits_within(self.geometry, width, height) {
                return Err(anyhow!(
                    "space #{} at ({}, {}) size {}x{} exceeds frame {}x{}",
                    index,
                    space.x,
                    space.y,
                    self.geometry.width,
                    self.geometry.height,
                    width,
                    height
                ));
            }
        }
        Ok(())
    }
}

pub fn parse_spaces(raw: &str) -> Result<Vec<ParkingSpace>> {
    let spaces: Vec<ParkingSpace> = serde_json::from_str(raw)?;
    Ok(spaces)
}
