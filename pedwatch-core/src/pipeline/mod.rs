use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use crate::detection::{suppress, BBox, DEFAULT_OVERLAP_THRESHOLD};
use crate::error::{Error, Result};
use crate::rendering::VisualMode;
use crate::scanner::WindowScanner;
use crate::video::RgbFrame;

/// Switches flipped by the control plane (CLI, dashboard). The detection
/// loop only reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags {
    pub active: bool,
    pub send_alerts: bool,
    pub visual_mode: VisualMode,
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self {
            active: true,
            send_alerts: true,
            visual_mode: VisualMode::Annotated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub total_detections: u64,
    pub last_alert: Option<SystemTime>,
}

/// Shared state between the control plane and one detection session.
#[derive(Debug, Default)]
pub struct SessionControl {
    flags: RwLock<ControlFlags>,
    frames_processed: AtomicU64,
    total_detections: AtomicU64,
    last_alert: RwLock<Option<SystemTime>>,
}

impl SessionControl {
    pub fn new(flags: ControlFlags) -> Arc<Self> {
        Arc::new(Self {
            flags: RwLock::new(flags),
            ..Default::default()
        })
    }

    pub fn flags(&self) -> ControlFlags {
        match self.flags.read() {
            Ok(flags) => *flags,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn update_flags(&self, f: impl FnOnce(&mut ControlFlags)) {
        let mut guard = match self.flags.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }

    pub fn set_active(&self, active: bool) {
        self.update_flags(|flags| flags.active = active);
    }

    pub fn set_send_alerts(&self, send_alerts: bool) {
        self.update_flags(|flags| flags.send_alerts = send_alerts);
    }

    pub fn toggle_visual_mode(&self) {
        self.update_flags(|flags| flags.visual_mode = flags.visual_mode.toggled());
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            total_detections: self.total_detections.load(Ordering::Relaxed),
            last_alert: self.last_alert.read().map(|t| *t).unwrap_or(None),
        }
    }

    fn record_frame(&self, detections: usize) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        if detections > 0 {
            self.total_detections
                .fetch_add(detections as u64, Ordering::Relaxed);
            if let Ok(mut last) = self.last_alert.write() {
                *last = Some(SystemTime::now());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// IoU above which overlapping detections are merged.
    pub overlap_threshold: f32,
    /// Scan one frame out of every `frame_skip` (0 and 1 scan every frame).
    pub frame_skip: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            frame_skip: 4,
        }
    }
}

/// Detections of one scanned frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    /// Position of the frame among all frames offered to the session.
    pub index: u64,
    pub pts: i64,
    pub candidates: usize,
    pub detections: Vec<BBox>,
    /// Detections were found and alerting is switched on.
    pub alert: bool,
    pub visual_mode: VisualMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Processed(FrameReport),
    /// Dropped by frame skipping.
    Skipped,
    /// The control plane has paused detection.
    Paused,
    /// The frame was missing or unreadable.
    NoFrame,
}

impl FrameOutcome {
    pub fn report(&self) -> Option<&FrameReport> {
        match self {
            FrameOutcome::Processed(report) => Some(report),
            _ => None,
        }
    }
}

/// One video source's worth of detection state: scanner, suppression and
/// frame-skip settings, plus timings.
pub struct DetectionSession {
    scanner: WindowScanner,
    config: SessionConfig,
    control: Arc<SessionControl>,
    offered: u64,
    prof_frames: u64,
    prof_scan: Duration,
    prof_suppress: Duration,
}

impl DetectionSession {
    pub fn new(
        scanner: WindowScanner,
        config: SessionConfig,
        control: Arc<SessionControl>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.overlap_threshold) {
            return Err(Error::invalid(format!(
                "overlap threshold must lie in [0, 1], got {}",
                config.overlap_threshold
            )));
        }
        Ok(Self {
            scanner,
            config,
            control,
            offered: 0,
            prof_frames: 0,
            prof_scan: Duration::ZERO,
            prof_suppress: Duration::ZERO,
        })
    }

    pub fn control(&self) -> &Arc<SessionControl> {
        &self.control
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Offer the next frame. Every call counts towards frame skipping,
    /// including absent frames.
    pub fn process(&mut self, frame: Option<&RgbFrame>) -> FrameOutcome {
        let index = self.offered;
        self.offered += 1;

        let flags = self.control.flags();
        if !flags.active {
            return FrameOutcome::Paused;
        }
        if self.config.frame_skip > 1 && index % self.config.frame_skip as u64 != 0 {
            return FrameOutcome::Skipped;
        }

        let scan_start = Instant::now();
        let candidates = match self.scanner.scan(frame) {
            Ok(candidates) => candidates,
            Err(Error::NoFrame) => {
                tracing::debug!(index, "no frame this cycle");
                return FrameOutcome::NoFrame;
            }
            Err(e) => {
                tracing::warn!(index, "scan error: {e}");
                return FrameOutcome::NoFrame;
            }
        };
        self.prof_scan += scan_start.elapsed();

        let suppress_start = Instant::now();
        let detections = suppress(&candidates, self.config.overlap_threshold);
        self.prof_suppress += suppress_start.elapsed();

        self.control.record_frame(detections.len());
        self.log_timings();

        FrameOutcome::Processed(FrameReport {
            index,
            pts: frame.map(|f| f.pts).unwrap_or_default(),
            candidates: candidates.len(),
            alert: flags.send_alerts && !detections.is_empty(),
            detections,
            visual_mode: flags.visual_mode,
        })
    }

    fn log_timings(&mut self) {
        self.prof_frames += 1;
        if self.prof_frames % 300 == 0 {
            tracing::info!(
                frames = self.prof_frames,
                scan_ms_per_frame = format!(
                    "{:.2}",
                    self.prof_scan.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                suppress_ms_per_frame = format!(
                    "{:.3}",
                    self.prof_suppress.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                "detection timings"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LinearClassifier;
    use crate::features::{DescriptorExtractor, ExtractorConfig};
    use crate::scanner::ScanConfig;

    /// Scores every window at +1 and scans at frame resolution.
    fn accept_all_session(frame_skip: u32) -> DetectionSession {
        let extractor = DescriptorExtractor::new(ExtractorConfig::default()).unwrap();
        let classifier = LinearClassifier::new(vec![0.0; extractor.feature_len()], 1.0).unwrap();
        let scan = ScanConfig {
            scan_width: None,
            scan_height: None,
            ..ScanConfig::default()
        };
        let scanner = WindowScanner::new(extractor, classifier, scan).unwrap();
        let config = SessionConfig {
            frame_skip,
            ..SessionConfig::default()
        };
        DetectionSession::new(scanner, config, SessionControl::new(ControlFlags::default()))
            .unwrap()
    }

    #[test]
    fn only_every_nth_frame_is_scanned() {
        let mut session = accept_all_session(3);
        let frame = RgbFrame::filled(64, 128, [40, 40, 40], 0);
        let scanned: Vec<bool> = (0..7)
            .map(|_| matches!(session.process(Some(&frame)), FrameOutcome::Processed(_)))
            .collect();
        assert_eq!(scanned, vec![true, false, false, true, false, false, true]);
        assert_eq!(session.control().stats().frames_processed, 3);
    }

    #[test]
    fn single_window_frame_yields_one_alerting_detection() {
        let mut session = accept_all_session(1);
        let frame = RgbFrame::filled(64, 128, [40, 40, 40], 17);
        let outcome = session.process(Some(&frame));
        let report = outcome.report().unwrap();
        assert_eq!(report.pts, 17);
        assert_eq!(report.candidates, 1);
        assert_eq!(report.detections.len(), 1);
        assert!(report.alert);
        assert!(session.control().stats().last_alert.is_some());
    }

    #[test]
    fn paused_session_scans_nothing() {
        let mut session = accept_all_session(1);
        session.control().set_active(false);
        let frame = RgbFrame::filled(64, 128, [40, 40, 40], 0);
        assert_eq!(session.process(Some(&frame)), FrameOutcome::Paused);
        assert_eq!(session.control().stats().frames_processed, 0);
    }

    #[test]
    fn alerts_off_still_reports_detections() {
        let mut session = accept_all_session(1);
        session.control().set_send_alerts(false);
        session.control().toggle_visual_mode();
        let frame = RgbFrame::filled(64, 128, [40, 40, 40], 0);
        let outcome = session.process(Some(&frame));
        let report = outcome.report().unwrap();
        assert!(!report.alert);
        assert_eq!(report.detections.len(), 1);
        assert_eq!(report.visual_mode, VisualMode::Original);
    }

    #[test]
    fn missing_frame_is_reported_not_raised() {
        let mut session = accept_all_session(1);
        assert_eq!(session.process(None), FrameOutcome::NoFrame);
    }

    #[test]
    fn overlap_threshold_outside_unit_interval_is_rejected() {
        let extractor = DescriptorExtractor::new(ExtractorConfig::default()).unwrap();
        let classifier = LinearClassifier::new(vec![0.0; extractor.feature_len()], 0.0).unwrap();
        let scanner = WindowScanner::new(extractor, classifier, ScanConfig::default()).unwrap();
        let config = SessionConfig {
            overlap_threshold: 1.5,
            ..SessionConfig::default()
        };
        let err = DetectionSession::new(scanner, config, Arc::default()).err();
        assert!(matches!(err, Some(Error::InvalidInput(_))));
    }
}
