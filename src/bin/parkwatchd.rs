//! parkwatchd - parking occupancy daemon
//!
//! This daemon:
//! 1. Loads configuration and the calibrated parking space list
//! 2. Opens the video source (fails fast on a bad path)
//! 3. Serves the landing page and streams occupancy records over `/ws`
//! 4. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parkwatch::api::{ApiConfig, ApiServer};
use parkwatch::config::ParkwatchConfig;
use parkwatch::{ParkingLot, Session};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file.
    #[arg(long, env = "PARKWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Video file, frame directory or stub:// source.
    #[arg(long)]
    video: Option<String>,
    /// Calibrated space list (JSON array of [x, y]).
    #[arg(long)]
    spaces: Option<PathBuf>,
    /// Listen address.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ParkwatchConfig::load_from(args.config.as_deref())?;
    if let Some(video) = args.video {
        cfg.video.path = video;
    }
    if let Some(spaces) = args.spaces {
        cfg.spaces_path = spaces;
    }
    if let Some(addr) = args.addr {
        cfg.api_addr = addr;
    }
    cfg.validate()?;

    let lot = Arc::new(ParkingLot::load(&cfg.spaces_path, cfg.geometry)?);
    let initial = Session::open(&cfg, lot.clone())?;
    let detector = initial.detector();
    log::info!(
        "video={} spaces={} ({} spaces, threshold {}, block {}, offset {})",
        cfg.video.path,
        cfg.spaces_path.display(),
        detector.lot().len(),
        detector.vacancy_threshold(),
        detector.params().block_size,
        detector.params().offset
    );

    let api_config = ApiConfig::from_config(&cfg);
    let factory_cfg = cfg.clone();
    let factory_lot = lot.clone();
    let handle = ApiServer::new(api_config, Some(initial), move || {
        Session::open(&factory_cfg, factory_lot.clone())
    })
    .spawn()?;

    log::info!("parkwatchd listening on http://{}", handle.addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_signal = running.clone();
    ctrlc::set_handler(move || running_signal.store(false, Ordering::SeqCst))
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    handle.stop()
}
