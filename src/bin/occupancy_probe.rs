//! occupancy_probe - run the detection loop headless and print JSON lines

use anyhow::{anyhow, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parkwatch::config::ParkwatchConfig;
use parkwatch::stream::JsonLinesSink;
use parkwatch::{DriverOptions, ParkingLot, Session, StopReason, StreamDriver};

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
    /// Stop after this many records.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Pause between records in milliseconds (defaults to the configured pacing).
    #[arg(long)]
    pacing_ms: Option<u64>,
    /// Include each space's foreground count.
    #[arg(long)]
    per_space: bool,
    /// Write records here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
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
    cfg.validate()?;

    let lot = Arc::new(ParkingLot::load(&cfg.spaces_path, cfg.geometry)?);
    let session = Session::open(&cfg, lot)?;

    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };
    let sink = JsonLinesSink::new(out).with_per_space(args.per_space);
    let options = DriverOptions {
        pacing: args
            .pacing_ms
            .map(Duration::from_millis)
            .unwrap_or(cfg.stream.pacing),
        max_frames: args.max_frames,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    ctrlc::set_handler(move || stop_signal.store(true, Ordering::SeqCst))
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let report = StreamDriver::new(session, sink, options)
        .with_shutdown(stop)
        .run();
    log::info!(
        "{} records, {} source frames, {} loops",
        report.records_emitted,
        report.source.frames_read,
        report.source.loops
    );

    match report.reason {
        StopReason::TransformFailure(err) => Err(anyhow!("detection aborted: {}", err)),
        StopReason::SourceExhausted(why) if report.records_emitted == 0 => {
            Err(anyhow!("video produced no frames: {}", why))
        }
        _ => Ok(()),
    }
}
