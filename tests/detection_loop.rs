use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{GrayImage, Luma};

use parkwatch::stream::Cycle;
use parkwatch::{
    DriverOptions, Frame, LoopingSource, MemoryBackend, OccupancyDetector, OccupancyRecord,
    ParkingLot, ParkingSpace, RecordSink, Session, SpotGeometry, StopReason, StreamDriver,
    StreamError, VideoBackend,
};

const SPACE_XS: [u32; 5] = [10, 130, 250, 370, 490];
const SPACE_Y: u32 = 20;

fn lot() -> Arc<ParkingLot> {
    let spaces = SPACE_XS
        .iter()
        .map(|x| ParkingSpace { x: *x, y: SPACE_Y })
        .collect();
    Arc::new(ParkingLot::new(spaces, SpotGeometry::default()).expect("lot"))
}

/// Smooth pavement, with striped "cars" parked in the listed spaces.
fn lot_frame(parked: &[usize]) -> Frame {
    let geometry = SpotGeometry::default();
    let gray = GrayImage::from_fn(620, 100, |x, y| {
        let in_car = parked.iter().any(|i| {
            let x0 = SPACE_XS[*i];
            (x0..x0 + geometry.width).contains(&x)
                && (SPACE_Y..SPACE_Y + geometry.height).contains(&y)
        });
        let value = if in_car {
            if (y / 4) % 2 == 0 {
                30
            } else {
                220
            }
        } else {
            150
        };
        Luma([value])
    });
    Frame::from_gray(&gray)
}

fn no_pacing() -> DriverOptions {
    DriverOptions {
        pacing: Duration::ZERO,
        max_frames: None,
    }
}

fn session(frames: Vec<Frame>) -> Session {
    Session::new(
        LoopingSource::new(Box::new(MemoryBackend::new(frames))),
        OccupancyDetector::with_defaults(lot()),
    )
}

#[derive(Default)]
struct Recorder {
    records: Vec<OccupancyRecord>,
    fail_at: Option<usize>,
}

impl RecordSink for Recorder {
    fn emit(&mut self, cycle: Cycle) -> Result<(), StreamError> {
        if self.fail_at == Some(self.records.len()) {
            return Err(StreamError::ChannelClosed);
        }
        self.records.push(cycle.record);
        Ok(())
    }
}

/// Counts reads and releases of the underlying media handle.
struct CountingBackend {
    inner: MemoryBackend,
    reads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl VideoBackend for CountingBackend {
    fn describe(&self) -> String {
        "counting".to_string()
    }
    fn frame_count(&self) -> u64 {
        self.inner.frame_count()
    }
    fn position(&self) -> u64 {
        self.inner.position()
    }
    fn rewind(&mut self) -> Result<()> {
        self.inner.rewind()
    }
    fn read(&mut self) -> Result<Frame> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read()
    }
    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn two_parked_cars_in_five_spaces() -> Result<()> {
    let mut session = session(vec![lot_frame(&[0, 3])]);
    let cycle = session.cycle()?;

    assert_eq!(cycle.record.occupied, 2);
    assert_eq!(cycle.record.vacant, 3);
    assert_eq!(cycle.record.total_spots, 5);
    let occupied: Vec<usize> = cycle
        .summary
        .spaces
        .iter()
        .filter(|s| s.occupied)
        .map(|s| s.index)
        .collect();
    assert_eq!(occupied, vec![0, 3]);
    for space in cycle.summary.spaces.iter().filter(|s| !s.occupied) {
        assert_eq!(space.count, 0, "space {} should be clean", space.index);
    }
    Ok(())
}

#[test]
fn records_hold_invariant_and_reset_frame_on_loop_back() {
    let clip = vec![lot_frame(&[]), lot_frame(&[1]), lot_frame(&[1, 2, 4])];
    let options = DriverOptions {
        max_frames: Some(7),
        ..no_pacing()
    };
    let mut recorder = Recorder::default();
    let report = StreamDriver::new(session(clip), &mut recorder, options).run();
    assert_eq!(report.reason, StopReason::FrameLimit);
    assert_eq!(report.records_emitted, 7);
    assert_eq!(report.source.loops, 2);

    let frames: Vec<u64> = recorder.records.iter().map(|r| r.frame).collect();
    assert_eq!(frames, vec![1, 2, 3, 1, 2, 3, 1]);
    for record in &recorder.records {
        assert_eq!(record.occupied + record.vacant, record.total_spots);
    }
}

#[test]
fn frame_sequence_and_counts_across_passes() {
    let clip = vec![lot_frame(&[]), lot_frame(&[1]), lot_frame(&[1, 2, 4])];
    let mut recorder = Recorder::default();
    let mut driver = StreamDriver::new(session(clip), &mut recorder, no_pacing());
    for _ in 0..5 {
        driver.step();
    }
    drop(driver);

    let frames: Vec<u64> = recorder.records.iter().map(|r| r.frame).collect();
    assert_eq!(frames, vec![1, 2, 3, 1, 2]);
    let occupied: Vec<usize> = recorder.records.iter().map(|r| r.occupied).collect();
    assert_eq!(occupied, vec![0, 1, 3, 0, 1]);
    for record in &recorder.records {
        assert_eq!(record.occupied + record.vacant, record.total_spots);
        assert_eq!(record.total_spots, 5);
    }
}

#[test]
fn classification_is_repeatable() -> Result<()> {
    let frame = lot_frame(&[2, 4]);
    let mut session = session(vec![frame.clone(), frame]);
    let first = session.cycle()?;
    let second = session.cycle()?;
    assert_eq!(first.summary, second.summary);
    Ok(())
}

#[test]
fn peer_disconnect_stops_reads_and_releases_once() {
    let reads = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));
    let backend = CountingBackend {
        inner: MemoryBackend::new(vec![lot_frame(&[0]), lot_frame(&[1])]),
        reads: reads.clone(),
        releases: releases.clone(),
    };
    let session = Session::new(
        LoopingSource::new(Box::new(backend)),
        OccupancyDetector::with_defaults(lot()),
    );
    let sink = Recorder {
        fail_at: Some(2),
        ..Recorder::default()
    };

    let report = StreamDriver::new(session, sink, no_pacing()).run();

    assert_eq!(report.reason, StopReason::ChannelClosed);
    assert_eq!(report.records_emitted, 2);
    assert_eq!(reads.load(Ordering::SeqCst), 3);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn malformed_frame_aborts_loop() {
    let small = Frame::from_gray(&GrayImage::new(200, 50));
    let report = StreamDriver::new(session(vec![small]), Recorder::default(), no_pacing()).run();
    match report.reason {
        StopReason::TransformFailure(err) => assert_eq!(err.stage, parkwatch::Stage::Scoring),
        other => panic!("unexpected stop reason {:?}", other),
    }
    assert_eq!(report.records_emitted, 0);
    assert!(report.source.released);
}

#[test]
fn exhausted_source_ends_loop() -> Result<()> {
    struct Truncated;
    impl VideoBackend for Truncated {
        fn describe(&self) -> String {
            "truncated".to_string()
        }
        fn frame_count(&self) -> u64 {
            3
        }
        fn position(&self) -> u64 {
            0
        }
        fn rewind(&mut self) -> Result<()> {
            Ok(())
        }
        fn read(&mut self) -> Result<Frame> {
            Err(anyhow!("moov atom not found"))
        }
    }

    let session = Session::new(
        LoopingSource::new(Box::new(Truncated)),
        OccupancyDetector::with_defaults(lot()),
    );
    let report = StreamDriver::new(session, Recorder::default(), no_pacing()).run();
    match report.reason {
        StopReason::SourceExhausted(why) => assert!(why.contains("moov atom")),
        other => return Err(anyhow!("unexpected stop reason {:?}", other)),
    }
    Ok(())
}
