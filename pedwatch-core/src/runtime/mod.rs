//! runtime — live two-task detection loop
//!
//! Acquisition runs on its own thread and publishes into a single-slot
//! "latest frame" channel, evicting any frame the detector has not picked
//! up yet. Detection runs on the caller's thread and always works on the
//! newest frame, so a slow scan drops intermediate frames instead of
//! building a backlog. Frames travel as `Arc`s, so the reader only ever sees
//! whole frames.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::pipeline::{DetectionSession, FrameOutcome};
use crate::video::{FrameSource, RgbFrame};

/// How long the detector waits for a frame before re-checking cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Give up on a source that fails this many reads in a row.
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Cancel flag shared between the control plane and a running loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Latest-frame slot ────────────────────────────────────────────────────────

/// Writer half of the slot. Never blocks.
pub struct FrameWriter {
    tx: Sender<Arc<RgbFrame>>,
    evict: Receiver<Arc<RgbFrame>>,
}

/// Reader half of the slot.
pub struct FrameReader {
    rx: Receiver<Arc<RgbFrame>>,
}

pub fn latest_frame_slot() -> (FrameWriter, FrameReader) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        FrameWriter {
            tx,
            evict: rx.clone(),
        },
        FrameReader { rx },
    )
}

impl FrameWriter {
    /// Replace whatever frame is waiting with `frame`. Returns how many
    /// unread frames were evicted.
    pub fn publish(&self, frame: Arc<RgbFrame>) -> usize {
        let mut frame = frame;
        let mut evicted = 0;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    if self.evict.try_recv().is_ok() {
                        evicted += 1;
                    }
                    frame = back;
                }
                // the writer holds a receiver itself, so this cannot happen
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }
}

impl FrameReader {
    /// Newest frame, waiting up to `timeout`. `Err` once the writer is gone
    /// and the slot is empty.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Arc<RgbFrame>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<Arc<RgbFrame>> {
        self.rx.try_recv().ok()
    }
}

// ── Live loop ────────────────────────────────────────────────────────────────

/// Returned by the per-frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames read from the source.
    pub acquired: u64,
    /// Frames overwritten in the slot before the detector saw them.
    pub dropped: u64,
    /// Frames handed to the session.
    pub received: u64,
    /// Frames actually scanned (not skipped, paused or missing).
    pub processed: u64,
    /// Reads that failed and were skipped.
    pub read_failures: u64,
}

#[derive(Debug, Default)]
struct AcquisitionStats {
    acquired: u64,
    dropped: u64,
    read_failures: u64,
}

/// Run acquisition and detection until the source ends, `cancel` is set or
/// `on_frame` returns [`Flow::Stop`].
///
/// The source is opened by `open` on the acquisition thread and dropped
/// there before this function returns, so a capture device never outlives
/// the loop. An `open` failure is returned as-is; a panic while acquiring
/// becomes [`Error::Io`].
pub fn run_live<S, O, F>(
    open: O,
    session: &mut DetectionSession,
    cancel: &CancelFlag,
    mut on_frame: F,
) -> Result<RunSummary>
where
    S: FrameSource,
    O: FnOnce() -> Result<S> + Send,
    F: FnMut(&RgbFrame, &FrameOutcome) -> Flow,
{
    let (writer, reader) = latest_frame_slot();
    // Set when detection ends on its own, so the caller's flag stays untouched.
    let finished = CancelFlag::new();

    thread::scope(|scope| {
        let stop = [cancel.clone(), finished.clone()];
        let acquisition = scope.spawn(move || acquire(open, writer, &stop));

        let mut summary = RunSummary::default();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let frame = match reader.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            summary.received += 1;

            let outcome = session.process(Some(&frame));
            if matches!(outcome, FrameOutcome::Processed(_)) {
                summary.processed += 1;
            }
            if on_frame(&frame, &outcome) == Flow::Stop {
                info!("detection loop stopped by callback");
                break;
            }
        }

        // Stop the acquisition side if it is still running, then wait for it
        // to release the source.
        finished.cancel();
        drop(reader);
        let stats = acquisition.join().map_err(|_| {
            error!("acquisition thread panicked");
            Error::Io(io::Error::other("frame acquisition thread panicked"))
        })??;

        summary.acquired = stats.acquired;
        summary.dropped = stats.dropped;
        summary.read_failures = stats.read_failures;
        info!(
            acquired = summary.acquired,
            dropped = summary.dropped,
            processed = summary.processed,
            "live loop finished"
        );
        Ok(summary)
    })
}

fn acquire<S, O>(open: O, writer: FrameWriter, stop: &[CancelFlag]) -> Result<AcquisitionStats>
where
    S: FrameSource,
    O: FnOnce() -> Result<S>,
{
    let mut source = open()?;
    let mut stats = AcquisitionStats::default();
    let mut consecutive_failures = 0;

    while !stop.iter().any(CancelFlag::is_cancelled) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                consecutive_failures = 0;
                stats.acquired += 1;
                stats.dropped += writer.publish(Arc::new(frame)) as u64;
            }
            Ok(None) => {
                debug!("frame source exhausted");
                break;
            }
            Err(e) => {
                stats.read_failures += 1;
                consecutive_failures += 1;
                warn!("frame read failed, skipping: {e}");
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!(consecutive_failures, "giving up on frame source");
                    break;
                }
            }
        }
    }

    drop(source);
    Ok(stats)
}
