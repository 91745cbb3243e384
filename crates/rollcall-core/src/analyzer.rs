//! Frame-by-frame liveness analyzer.
//!
//! [`FaceAnalyzer`] owns the history buffers and the debounce state of one
//! camera session. For every detection event it extracts metrics, appends
//! them to history, proposes a status in strict priority order and lets
//! [`AnalyzerState::step`] decide what gets committed.
//!
//! Only the session's frame loop mutates an analyzer. Readers that need a
//! consistent view (UI, reporting) take an [`AnalyzerSnapshot`].

use serde::Serialize;
use std::sync::Arc;

use crate::capture;
use crate::config::AnalyzerConfig;
use crate::events::DetectionEvent;
use crate::history::HistoryBuffers;
use crate::metrics;
use crate::motion::{self, MotionAnalysis};
use crate::state::{AnalyzerState, DecisionEvidence};
use crate::types::{CommitReason, FaceBox, FrameMetrics, Landmark, LandmarkFrame, LivenessStatus};

/// Outcome of processing one detection event.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub timestamp_ms: u64,
    pub proposal: LivenessStatus,
    pub status: LivenessStatus,
    pub reason: CommitReason,
    /// Face boxes for the overlay; empty when no face was tracked.
    pub faces: Vec<FaceBox>,
    pub metrics: Option<FrameMetrics>,
    pub motion: Option<MotionAnalysis>,
    pub suitable_for_capture: bool,
}

/// Consistent read-only view of an analyzer.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerSnapshot {
    pub timestamp_ms: u64,
    pub status: LivenessStatus,
    pub reason: CommitReason,
    pub guidance: &'static str,
    pub quality: f32,
    pub live_frames: u32,
    pub suitable_for_capture: bool,
    pub faces: Vec<FaceBox>,
}

/// Liveness state machine for a single tracked face.
pub struct FaceAnalyzer {
    config: AnalyzerConfig,
    state: AnalyzerState,
    history: HistoryBuffers,
    last_face: Option<FaceBox>,
    last_motion: Option<MotionAnalysis>,
    last_timestamp_ms: u64,
    closed: bool,
}

impl FaceAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let history = HistoryBuffers::new(&config);
        Self {
            config,
            state: AnalyzerState::default(),
            history,
            last_face: None,
            last_motion: None,
            last_timestamp_ms: 0,
            closed: false,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Process one provider event. Returns `None` once the analyzer is closed.
    ///
    /// Provider errors and empty results are treated as "no face".
    pub fn process(&mut self, event: &DetectionEvent) -> Option<FrameReport> {
        if self.closed {
            return None;
        }
        if let Some(error) = &event.error {
            tracing::warn!(error = %error, timestamp_ms = event.timestamp_ms, "landmark provider error");
        }

        let report = match event.primary_face() {
            Some(face) => self.process_landmarks(
                &face.landmarks,
                face.input_width,
                face.input_height,
                event.timestamp_ms,
            ),
            None => self.process_no_face(event.timestamp_ms),
        };
        Some(report)
    }

    /// Analyze one frame's landmarks.
    pub fn process_landmarks(
        &mut self,
        landmarks: &[Landmark],
        image_width: u32,
        image_height: u32,
        now_ms: u64,
    ) -> FrameReport {
        if landmarks.is_empty() {
            return self.process_no_face(now_ms);
        }
        self.last_timestamp_ms = now_ms;

        let (metrics, position) =
            metrics::extract(landmarks, image_width, image_height, &self.config);
        let compliant = metrics.boundary.is_compliant(self.config.completeness_threshold);

        self.history.push_frame(
            LandmarkFrame {
                landmarks: Arc::from(landmarks),
                timestamp_ms: now_ms,
                quality: metrics.quality,
            },
            position,
            compliant,
        );
        let face = metrics.boundary.face_box();
        self.last_face = Some(face);

        let motion = if self.config.enable_liveness_gating
            && self.history.landmarks.len() >= self.config.min_samples
        {
            Some(motion::analyse(&self.history.landmarks, &self.config))
        } else {
            None
        };
        if motion.is_some() {
            self.last_motion = motion;
        }

        let proposal = self.propose(&metrics, motion.as_ref());
        self.apply(proposal, now_ms);

        FrameReport {
            timestamp_ms: now_ms,
            proposal,
            status: self.state.committed,
            reason: self.state.reason,
            faces: vec![face],
            metrics: Some(metrics),
            motion,
            suitable_for_capture: self.is_face_suitable_for_capture(),
        }
    }

    /// A frame without a face: reset immediately.
    fn process_no_face(&mut self, now_ms: u64) -> FrameReport {
        self.last_timestamp_ms = now_ms;
        self.clear_tracking();
        self.apply(LivenessStatus::NoFace, now_ms);

        FrameReport {
            timestamp_ms: now_ms,
            proposal: LivenessStatus::NoFace,
            status: self.state.committed,
            reason: self.state.reason,
            faces: Vec::new(),
            metrics: None,
            motion: None,
            suitable_for_capture: false,
        }
    }

    /// Per-frame status proposal, highest priority first.
    fn propose(&self, metrics: &FrameMetrics, motion: Option<&MotionAnalysis>) -> LivenessStatus {
        let cfg = &self.config;

        if !metrics.boundary.is_compliant(cfg.completeness_threshold) {
            return LivenessStatus::FaceTooCloseToEdge;
        }
        if !cfg.enable_liveness_gating {
            return LivenessStatus::LiveFace;
        }

        // Boundary stability over the trailing window.
        let boundary = &self.history.boundary;
        if boundary.len() >= cfg.boundary_window {
            if self.history.recent_compliant_count(cfg.boundary_window) < cfg.boundary_window {
                return LivenessStatus::FaceTooCloseToEdge;
            }
        } else if boundary.len() >= 2 && boundary.recent(2).all(|&ok| !ok) {
            return LivenessStatus::FaceTooCloseToEdge;
        }

        let quality = self.history.average_quality().unwrap_or(metrics.quality);
        if self.history.quality.len() >= cfg.min_samples && quality < cfg.quality_threshold {
            return LivenessStatus::PoorQuality;
        }

        let position = self.history.average_position().unwrap_or(metrics.position);
        if self.history.position.len() >= cfg.min_samples && position < cfg.position_threshold {
            return LivenessStatus::PoorPosition;
        }

        let Some(motion) = motion else {
            return LivenessStatus::Checking;
        };
        if self.history.landmarks.len() < cfg.min_samples {
            return LivenessStatus::Checking;
        }

        let window_compliant = boundary.recent(cfg.boundary_window).all(|&ok| ok);
        let movement_in_band =
            motion.movement >= cfg.movement_low && motion.movement <= cfg.movement_high;

        if movement_in_band
            && motion.consistency > cfg.live_consistency
            && quality > 0.8 * cfg.quality_threshold
            && position > cfg.position_threshold
            && window_compliant
        {
            return LivenessStatus::LiveFace;
        }

        if motion.movement < 0.5 * cfg.movement_low
            && (motion.consistency < cfg.spoof_consistency || motion.is_frozen())
            && self.history.landmarks.len() >= cfg.spoof_min_samples
        {
            return LivenessStatus::SpoofDetected;
        }

        LivenessStatus::Checking
    }

    /// Commit a proposal, then honour an elapsed checking deadline.
    fn apply(&mut self, proposal: LivenessStatus, now_ms: u64) {
        let previous = self.state.committed;
        let (next, _) = self.state.step(proposal, now_ms, &self.config);
        self.state = next;
        self.log_transition(previous, proposal);

        self.poll_timeout(now_ms);
    }

    /// Force a decision if the committed status has been `Checking` past its
    /// deadline. Returns the forced status when a decision was made.
    pub fn poll_timeout(&mut self, now_ms: u64) -> Option<LivenessStatus> {
        if self.closed || !self.state.deadline_elapsed(now_ms) {
            return None;
        }

        let evidence = DecisionEvidence {
            quality: self.history.average_quality().unwrap_or(0.0),
            position: self.history.average_position().unwrap_or(0.0),
            movement: self.last_motion.map(|m| m.movement).unwrap_or(0.0),
            boundary_compliant: self.history.boundary.latest().copied().unwrap_or(false)
                && self
                    .history
                    .boundary
                    .recent(self.config.boundary_window)
                    .all(|&ok| ok),
        };
        let (next, status) = self.state.force_decision(&evidence, &self.config);
        self.state = next;

        tracing::info!(
            status = %status,
            quality = evidence.quality,
            position = evidence.position,
            movement = evidence.movement,
            boundary_compliant = evidence.boundary_compliant,
            "checking timed out, forced decision"
        );
        Some(status)
    }

    fn log_transition(&self, previous: LivenessStatus, proposal: LivenessStatus) {
        let current = self.state.committed;
        if current != previous {
            tracing::debug!(
                from = %previous,
                to = %current,
                proposal = %proposal,
                live_frames = self.state.live_frames,
                "liveness status changed"
            );
        }
    }

    fn clear_tracking(&mut self) {
        self.history.clear();
        self.last_face = None;
        self.last_motion = None;
    }

    /// Committed status.
    pub fn status(&self) -> LivenessStatus {
        self.state.committed
    }

    pub fn reason(&self) -> CommitReason {
        self.state.reason
    }

    /// Rolling average quality, 0 when no face is tracked.
    pub fn quality_score(&self) -> f32 {
        self.history.average_quality().unwrap_or(0.0)
    }

    pub fn live_frames(&self) -> u32 {
        self.state.live_frames
    }

    /// Face box of the most recent frame with a face.
    pub fn last_face_box(&self) -> Option<FaceBox> {
        self.last_face
    }

    pub fn state(&self) -> &AnalyzerState {
        &self.state
    }

    pub fn history(&self) -> &HistoryBuffers {
        &self.history
    }

    pub fn is_face_suitable_for_capture(&self) -> bool {
        let faces: &[FaceBox] = match &self.last_face {
            Some(face) => std::slice::from_ref(face),
            None => &[],
        };
        capture::is_face_suitable_for_capture(faces, &self.state, &self.history, &self.config)
    }

    pub fn snapshot(&self) -> AnalyzerSnapshot {
        AnalyzerSnapshot {
            timestamp_ms: self.last_timestamp_ms,
            status: self.state.committed,
            reason: self.state.reason,
            guidance: self.state.committed.guidance(),
            quality: self.quality_score(),
            live_frames: self.state.live_frames,
            suitable_for_capture: self.is_face_suitable_for_capture(),
            faces: self.last_face.into_iter().collect(),
        }
    }

    /// Return to the initial `NoFace` state, keeping the analyzer open.
    pub fn reset(&mut self) {
        self.clear_tracking();
        self.state = AnalyzerState::default();
    }

    /// Reset and stop accepting frames.
    pub fn close(&mut self) {
        self.reset();
        self.closed = true;
        tracing::debug!("analyzer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
