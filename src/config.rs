use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{PipelineParams, DEFAULT_VACANCY_THRESHOLD};
use crate::ingest::FileConfig;
use crate::lot::SpotGeometry;
use crate::stream::DEFAULT_PACING;

const DEFAULT_VIDEO_PATH: &str = "carPark.mp4";
const DEFAULT_SPACES_PATH: &str = "CarParkPos.json";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ParkwatchConfigFile {
    video: Option<VideoConfigFile>,
    spaces: Option<SpacesConfigFile>,
    detector: Option<DetectorConfigFile>,
    stream: Option<StreamConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    path: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    synthetic_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SpacesConfigFile {
    path: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    vacancy_threshold: Option<u32>,
    block_size: Option<u32>,
    offset: Option<f64>,
    median_ksize: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    pacing_ms: Option<u64>,
    channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParkwatchConfig {
    pub video: FileConfig,
    pub spaces_path: PathBuf,
    pub geometry: SpotGeometry,
    pub detector: DetectorSettings,
    pub stream: StreamSettings,
    pub api_addr: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub pipeline: PipelineParams,
    pub vacancy_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub pacing: Duration,
    pub channel_capacity: usize,
}

impl Default for ParkwatchConfig {
    fn default() -> Self {
        Self::from_file(ParkwatchConfigFile::default())
    }
}

impl ParkwatchConfig {
    /// Defaults, then the JSON file named by `PARKWATCH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PARKWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ParkwatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ParkwatchConfigFile) -> Self {
        let video_file = file.video.unwrap_or_default();
        let default_video = FileConfig::default();
        let video = FileConfig {
            path: video_file
                .path
                .unwrap_or_else(|| DEFAULT_VIDEO_PATH.to_string()),
            width: video_file.width.unwrap_or(default_video.width),
            height: video_file.height.unwrap_or(default_video.height),
            synthetic_frames: video_file
                .synthetic_frames
                .unwrap_or(default_video.synthetic_frames),
        };

        let spaces = file.spaces.unwrap_or_default();
        let default_geometry = SpotGeometry::default();
        let geometry = SpotGeometry {
            width: spaces.width.unwrap_or(default_geometry.width),
            height: spaces.height.unwrap_or(default_geometry.height),
        };
        let spaces_path = spaces
            .path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SPACES_PATH));

        let detector_file = file.detector.unwrap_or_default();
        let default_params = PipelineParams::default();
        let detector = DetectorSettings {
            pipeline: PipelineParams {
                block_size: detector_file.block_size.unwrap_or(default_params.block_size),
                offset: detector_file.offset.unwrap_or(default_params.offset),
                median_ksize: detector_file
                    .median_ksize
                    .unwrap_or(default_params.median_ksize),
                ..default_params
            },
            vacancy_threshold: detector_file
                .vacancy_threshold
                .unwrap_or(DEFAULT_VACANCY_THRESHOLD),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            pacing: stream_file
                .pacing_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PACING),
            channel_capacity: stream_file
                .channel_capacity
                .unwrap_or(DEFAULT_CHANNEL_CAPACITY),
        };

        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        Self {
            video,
            spaces_path,
            geometry,
            detector,
            stream,
            api_addr,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PARKWATCH_VIDEO") {
            if !path.trim().is_empty() {
                self.video.path = path;
            }
        }
        if let Ok(path) = std::env::var("PARKWATCH_SPACES") {
            if !path.trim().is_empty() {
                self.spaces_path = PathBuf::from(path);
            }
        }
        if let Ok(addr) = std::env::var("PARKWATCH_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(pacing) = std::env::var("PARKWATCH_PACING_MS") {
            let millis: u64 = pacing.trim().parse().map_err(|_| {
                anyhow!("PARKWATCH_PACING_MS must be an integer number of milliseconds")
            })?;
            self.stream.pacing = Duration::from_millis(millis);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.video.path.trim().is_empty() {
            return Err(anyhow!("video path must not be empty"));
        }
        if self.spaces_path.as_os_str().is_empty() {
            return Err(anyhow!("space list path must not be empty"));
        }
        if self.geometry.width == 0 || self.geometry.height == 0 {
            return Err(anyhow!("space width and height must be greater than zero"));
        }
        self.detector
            .pipeline
            .validate()
            .map_err(|e| anyhow!("invalid detector settings: {}", e))?;
        if self.stream.channel_capacity == 0 {
            return Err(anyhow!("stream channel capacity must be at least 1"));
        }
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.api_addr, e))?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ParkwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_calibrated_lot() {
        let cfg = ParkwatchConfig::default();
        assert_eq!(cfg.video.path, "carPark.mp4");
        assert_eq!(cfg.spaces_path, PathBuf::from("CarParkPos.json"));
        assert_eq!(cfg.geometry, SpotGeometry::default());
        assert_eq!(cfg.detector.vacancy_threshold, 900);
        assert_eq!(cfg.detector.pipeline, PipelineParams::default());
        assert_eq!(cfg.stream.pacing, Duration::from_millis(50));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_even_block_and_bad_addr() {
        let mut cfg = ParkwatchConfig::default();
        cfg.detector.pipeline.block_size = 24;
        assert!(cfg.validate().is_err());

        let mut cfg = ParkwatchConfig::default();
        cfg.api_addr = "not-an-addr".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = ParkwatchConfig::default();
        cfg.stream.channel_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
