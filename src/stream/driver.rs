use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use super::{OccupancyRecord, RecordSink, Session, StreamError};
use crate::detect::TransformError;
use crate::ingest::SourceStats;

pub const DEFAULT_PACING: Duration = Duration::from_millis(50);
/// How often a running loop logs its progress.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Why a detection loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    SourceExhausted(String),
    TransformFailure(TransformError),
    ChannelClosed,
    /// Stop flag raised by the host.
    Shutdown,
    /// `max_frames` records were emitted.
    FrameLimit,
}

impl From<StreamError> for StopReason {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::SourceExhausted(end) => StopReason::SourceExhausted(end.reason),
            StreamError::TransformFailure(e) => StopReason::TransformFailure(e),
            StreamError::ChannelClosed => StopReason::ChannelClosed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverState {
    Running,
    /// A stop condition was observed; the source is released on the next step.
    Draining(StopReason),
    Terminated(StopReason),
}

#[derive(Clone, Debug)]
pub struct DriverOptions {
    /// Pause after each emitted record.
    pub pacing: Duration,
    /// Stop cleanly after this many records.
    pub max_frames: Option<u64>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            pacing: DEFAULT_PACING,
            max_frames: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DriverReport {
    pub reason: StopReason,
    pub records_emitted: u64,
    pub source: SourceStats,
}

/// Single-worker detection loop: read, classify, emit, pace.
///
/// Records are emitted strictly in frame order; a frame is fully classified
/// and emitted before the next read. Every stop path goes through
/// `Draining`, which releases the video source.
pub struct StreamDriver<S: RecordSink> {
    session: Session,
    sink: S,
    options: DriverOptions,
    state: DriverState,
    emitted: u64,
    shutdown: Option<Arc<AtomicBool>>,
    health_interval: Duration,
    last_health: Instant,
}

impl<S: RecordSink> StreamDriver<S> {
    pub fn new(session: Session, sink: S, options: DriverOptions) -> Self {
        Self {
            session,
            sink,
            options,
            state: DriverState::Running,
            emitted: 0,
            shutdown: None,
            health_interval: HEALTH_INTERVAL,
            last_health: Instant::now(),
        }
    }

    /// Log progress at most once per `interval` while running.
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Stop at the next cycle boundary once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn records_emitted(&self) -> u64 {
        self.emitted
    }

    /// Advance the state machine by one transition.
    pub fn step(&mut self) -> &DriverState {
        let next = match self.state.clone() {
            DriverState::Running => self.run_cycle(),
            DriverState::Draining(reason) => {
                self.session.release();
                log_stop(&reason, self.emitted);
                Some(DriverState::Terminated(reason))
            }
            DriverState::Terminated(_) => None,
        };
        if let Some(next) = next {
            self.state = next;
        }
        &self.state
    }

    fn run_cycle(&mut self) -> Option<DriverState> {
        if self
            .shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            return Some(DriverState::Draining(StopReason::Shutdown));
        }
        if self.options.max_frames.is_some_and(|max| self.emitted >= max) {
            return Some(DriverState::Draining(StopReason::FrameLimit));
        }

        let emitted = self
            .session
            .cycle()
            .and_then(|cycle| self.sink.emit(cycle));
        match emitted {
            Ok(()) => {
                self.emitted += 1;
                self.log_health_if_due(Instant::now());
                if !self.options.pacing.is_zero() {
                    std::thread::sleep(self.options.pacing);
                }
                None
            }
            Err(err) => Some(DriverState::Draining(err.into())),
        }
    }

    fn log_health_if_due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_health) < self.health_interval {
            return false;
        }
        self.last_health = now;
        let stats = self.session.source_stats();
        log::info!(
            "detection loop healthy: {} records emitted, {} frames read, {} loops over {}",
            self.emitted,
            stats.frames_read,
            stats.loops,
            stats.origin
        );
        true
    }

    /// Step until terminated.
    pub fn run(mut self) -> DriverReport {
        loop {
            self.step();
            if let DriverState::Terminated(reason) = &self.state {
                return DriverReport {
                    reason: reason.clone(),
                    records_emitted: self.emitted,
                    source: self.session.source_stats(),
                };
            }
        }
    }
}

fn log_stop(reason: &StopReason, emitted: u64) {
    match reason {
        StopReason::TransformFailure(err) => {
            log::error!("detection loop aborted after {} records: {}", emitted, err)
        }
        StopReason::SourceExhausted(why) => {
            log::info!("detection loop ended after {} records: {}", emitted, why)
        }
        StopReason::ChannelClosed => {
            log::info!("stream peer disconnected after {} records", emitted)
        }
        StopReason::Shutdown => log::info!("detection loop stopped by shutdown"),
        StopReason::FrameLimit => log::info!("detection loop reached {} records", emitted),
    }
}

/// A detection loop running on its own thread, feeding a bounded channel.
pub struct ProducerHandle {
    pub records: Receiver<OccupancyRecord>,
    join: JoinHandle<DriverReport>,
}

impl ProducerHandle {
    /// Wait for the loop to finish. Drop `records` first to stop it.
    pub fn join(self) -> Result<DriverReport> {
        drop(self.records);
        self.join
            .join()
            .map_err(|_| anyhow!("detection thread panicked"))
    }
}

/// Move `session` onto a worker thread that emits into a channel of
/// `capacity` records.
pub fn spawn_producer(
    session: Session,
    capacity: usize,
    options: DriverOptions,
    shutdown: Arc<AtomicBool>,
) -> Result<ProducerHandle> {
    let (tx, rx) = sync_channel(capacity.max(1));
    let join = std::thread::Builder::new()
        .name("parkwatch-detect".to_string())
        .spawn(move || {
            StreamDriver::new(session, tx, options)
                .with_shutdown(shutdown)
                .run()
        })?;
    Ok(ProducerHandle { records: rx, join })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::OccupancyDetector;
    use crate::frame::Frame;
    use crate::ingest::{LoopingSource, MemoryBackend};
    use crate::lot::{ParkingLot, ParkingSpace, SpotGeometry};
    use crate::stream::Cycle;
    use image::{GrayImage, Luma};

    fn session(frames: usize) -> Session {
        let clip = (0..frames)
            .map(|_| Frame::from_gray(&GrayImage::from_pixel(40, 40, Luma([128]))))
            .collect();
        let lot = ParkingLot::new(
            vec![ParkingSpace { x: 0, y: 0 }, ParkingSpace { x: 10, y: 10 }],
            SpotGeometry {
                width: 20,
                height: 20,
            },
        )
        .unwrap();
        Session::new(
            LoopingSource::new(Box::new(MemoryBackend::new(clip))),
            OccupancyDetector::with_defaults(Arc::new(lot)),
        )
    }

    fn no_pacing() -> DriverOptions {
        DriverOptions {
            pacing: Duration::ZERO,
            max_frames: None,
        }
    }

    #[derive(Default)]
    struct Collect {
        records: Vec<OccupancyRecord>,
        accept: usize,
    }

    impl RecordSink for Collect {
        fn emit(&mut self, cycle: Cycle) -> Result<(), StreamError> {
            if self.records.len() >= self.accept {
                return Err(StreamError::ChannelClosed);
            }
            self.records.push(cycle.record);
            Ok(())
        }
    }

    #[test]
    fn state_machine_drains_before_terminating() {
        let sink = Collect {
            accept: 1,
            ..Collect::default()
        };
        let mut driver = StreamDriver::new(session(3), sink, no_pacing());
        assert_eq!(driver.step(), &DriverState::Running);
        assert_eq!(
            driver.step(),
            &DriverState::Draining(StopReason::ChannelClosed)
        );
        assert!(!driver.session.is_released());
        assert_eq!(
            driver.step(),
            &DriverState::Terminated(StopReason::ChannelClosed)
        );
        assert!(driver.session.is_released());
        assert_eq!(
            driver.step(),
            &DriverState::Terminated(StopReason::ChannelClosed)
        );
    }

    #[test]
    fn frame_limit_stops_cleanly() {
        let sink = Collect {
            accept: usize::MAX,
            ..Collect::default()
        };
        let options = DriverOptions {
            max_frames: Some(5),
            ..no_pacing()
        };
        let report = StreamDriver::new(session(2), sink, options).run();
        assert_eq!(report.reason, StopReason::FrameLimit);
        assert_eq!(report.records_emitted, 5);
        assert!(report.source.released);
        assert_eq!(report.source.loops, 2);
    }

    #[test]
    fn shutdown_flag_stops_before_next_read() {
        let flag = Arc::new(AtomicBool::new(true));
        let report = StreamDriver::new(session(2), Collect::default(), no_pacing())
            .with_shutdown(flag)
            .run();
        assert_eq!(report.reason, StopReason::Shutdown);
        assert_eq!(report.source.frames_read, 0);
    }

    #[test]
    fn producer_thread_stops_when_receiver_dropped() -> Result<()> {
        let handle = spawn_producer(
            session(4),
            2,
            no_pacing(),
            Arc::new(AtomicBool::new(false)),
        )?;
        let first = handle.records.recv()?;
        let second = handle.records.recv()?;
        assert_eq!((first.frame, second.frame), (1, 2));
        let report = handle.join()?;
        assert_eq!(report.reason, StopReason::ChannelClosed);
        assert!(report.source.released);
        Ok(())
    }

    #[test]
    fn health_log_is_rate_limited() {
        let sink = Collect {
            accept: usize::MAX,
            ..Collect::default()
        };
        let mut driver = StreamDriver::new(session(2), sink, no_pacing())
            .with_health_interval(Duration::from_secs(30));
        let start = driver.last_health;
        assert!(!driver.log_health_if_due(start + Duration::from_secs(10)));
        assert!(driver.log_health_if_due(start + Duration::from_secs(31)));
        assert!(!driver.log_health_if_due(start + Duration::from_secs(40)));
        assert!(driver.log_health_if_due(start + Duration::from_secs(62)));

        let mut eager = StreamDriver::new(session(2), Collect::default(), no_pacing())
            .with_health_interval(Duration::ZERO);
        assert!(eager.log_health_if_due(Instant::now()));
    }
}
