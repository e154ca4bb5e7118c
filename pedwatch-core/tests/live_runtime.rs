mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pedwatch_core::pipeline::{
    ControlFlags, DetectionSession, FrameOutcome, SessionConfig, SessionControl,
};
use pedwatch_core::runtime::{run_live, CancelFlag, Flow};
use pedwatch_core::video::{FrameSource, MemorySource, RgbFrame};
use pedwatch_core::{Error, Result};

use common::{constant_scanner, native_resolution};

fn session() -> DetectionSession {
    DetectionSession::new(
        constant_scanner(1.0, native_resolution()),
        SessionConfig {
            frame_skip: 1,
            ..SessionConfig::default()
        },
        SessionControl::new(ControlFlags::default()),
    )
    .unwrap()
}

fn frames(count: usize) -> Vec<RgbFrame> {
    (0..count)
        .map(|i| RgbFrame::filled(64, 128, [(i % 250) as u8, 60, 60], i as i64))
        .collect()
}

/// Endless source that records when it is dropped.
struct CameraStub {
    released: Arc<AtomicBool>,
    produced: Arc<AtomicUsize>,
}

impl FrameSource for CameraStub {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        thread::sleep(Duration::from_millis(1));
        let n = self.produced.fetch_add(1, Ordering::SeqCst);
        Ok(Some(RgbFrame::filled(64, 128, [90, 90, 90], n as i64)))
    }
}

impl Drop for CameraStub {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct BrokenSource;

impl FrameSource for BrokenSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        Err(Error::NoFrame)
    }
}

#[test]
fn slow_consumer_drops_frames_instead_of_queueing() {
    let mut session = session();
    let source_frames = frames(200);
    let mut seen_pts = Vec::new();

    let summary = run_live(
        move || Ok(MemorySource::new(source_frames)),
        &mut session,
        &CancelFlag::new(),
        |frame, outcome| {
            assert!(matches!(outcome, FrameOutcome::Processed(_)));
            seen_pts.push(frame.pts);
            thread::sleep(Duration::from_millis(5));
            Flow::Continue
        },
    )
    .unwrap();

    assert_eq!(summary.acquired, 200);
    assert!(summary.received < 200, "{summary:?}");
    assert!(summary.dropped > 0);
    assert_eq!(summary.received + summary.dropped, summary.acquired);
    assert_eq!(summary.processed, summary.received);

    // Frames arrive in order and the newest one is never lost.
    assert!(seen_pts.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen_pts.last(), Some(&199));
}

#[test]
fn stopping_from_the_callback_releases_the_source() {
    let released = Arc::new(AtomicBool::new(false));
    let produced = Arc::new(AtomicUsize::new(0));
    let stub = CameraStub {
        released: released.clone(),
        produced: produced.clone(),
    };
    let mut session = session();
    let mut processed = 0;

    let summary = run_live(
        move || Ok(stub),
        &mut session,
        &CancelFlag::new(),
        |_, outcome| {
            if outcome.report().is_some() {
                processed += 1;
            }
            if processed == 3 {
                Flow::Stop
            } else {
                Flow::Continue
            }
        },
    )
    .unwrap();

    assert_eq!(summary.processed, 3);
    assert!(released.load(Ordering::SeqCst));
    assert!(produced.load(Ordering::SeqCst) >= 3);
}

#[test]
fn cancel_flag_ends_the_loop() {
    let released = Arc::new(AtomicBool::new(false));
    let stub = CameraStub {
        released: released.clone(),
        produced: Arc::new(AtomicUsize::new(0)),
    };
    let mut session = session();
    let cancel = CancelFlag::new();
    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.cancel();
    });

    let summary = run_live(move || Ok(stub), &mut session, &cancel, |_, _| Flow::Continue).unwrap();
    canceller.join().unwrap();

    assert!(cancel.is_cancelled());
    assert!(released.load(Ordering::SeqCst));
    assert!(summary.acquired > 0);
}

#[test]
fn paused_session_receives_but_does_not_scan() {
    let mut session = session();
    session.control().set_active(false);
    let source_frames = frames(10);

    let summary = run_live(
        move || Ok(MemorySource::new(source_frames)),
        &mut session,
        &CancelFlag::new(),
        |_, outcome| {
            assert_eq!(outcome, &FrameOutcome::Paused);
            Flow::Continue
        },
    )
    .unwrap();

    assert!(summary.received > 0);
    assert_eq!(summary.processed, 0);
    assert_eq!(session.control().stats().frames_processed, 0);
}

/// Source whose read crashes after a few frames.
struct CrashingSource(usize);

impl FrameSource for CrashingSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        if self.0 == 0 {
            panic!("capture driver crashed");
        }
        self.0 -= 1;
        Ok(Some(RgbFrame::filled(64, 128, [40, 40, 40], self.0 as i64)))
    }
}

#[test]
fn acquisition_panic_is_an_error() {
    let mut session = session();
    let result = run_live(
        || Ok(CrashingSource(3)),
        &mut session,
        &CancelFlag::new(),
        |_, _| Flow::Continue,
    );
    assert!(matches!(result, Err(Error::Io(_))), "{result:?}");
}

#[test]
fn persistently_failing_source_is_abandoned() {
    let mut session = session();
    let summary = run_live(
        || Ok(BrokenSource),
        &mut session,
        &CancelFlag::new(),
        |_, _| Flow::Continue,
    )
    .unwrap();
    assert_eq!(summary.acquired, 0);
    assert_eq!(summary.read_failures, 30);
}

#[test]
fn open_failure_is_returned() {
    let mut session = session();
    let result = run_live(
        || -> Result<MemorySource> { Err(Error::InvalidInput("no such camera".into())) },
        &mut session,
        &CancelFlag::new(),
        |_, _| Flow::Continue,
    );
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}
