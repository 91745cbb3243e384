//! Debounced commit logic for liveness proposals.
//!
//! [`AnalyzerState`] is a plain value: counters, the committed status and the
//! pending checking deadline. [`AnalyzerState::step`] maps a state and a
//! per-frame proposal to the next state and its committed status without
//! touching any clock or history, so the whole debounce policy can be driven
//! frame by frame in tests.
//!
//! The checking timeout is a deadline in frame time rather than a timer: it
//! is armed when the committed status enters `Checking`, dropped when it
//! leaves, and consumed by [`AnalyzerState::force_decision`].

use crate::config::AnalyzerConfig;
use crate::types::{CommitReason, LivenessStatus};

/// Debounce counters and committed status of one analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnalyzerState {
    pub committed: LivenessStatus,
    pub reason: CommitReason,
    /// Proposal seen on the previous frame.
    pub last_proposal: Option<LivenessStatus>,
    /// Consecutive frames with the same proposal.
    pub stable_frames: u32,
    /// Consecutive `LiveFace` proposals.
    pub live_frames: u32,
    /// Frame time at which a lingering `Checking` is forced to a decision.
    pub checking_deadline_ms: Option<u64>,
}

/// Latest averaged metrics consulted by a forced decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionEvidence {
    pub quality: f32,
    pub position: f32,
    pub movement: f32,
    pub boundary_compliant: bool,
}

impl AnalyzerState {
    /// Apply one proposal. Returns the next state and its committed status.
    pub fn step(
        &self,
        proposal: LivenessStatus,
        now_ms: u64,
        config: &AnalyzerConfig,
    ) -> (AnalyzerState, LivenessStatus) {
        if proposal == LivenessStatus::NoFace {
            let next = AnalyzerState::default();
            return (next, next.committed);
        }

        let mut next = *self;
        if next.last_proposal == Some(proposal) {
            next.stable_frames = next.stable_frames.saturating_add(1);
        } else {
            next.stable_frames = 1;
            next.last_proposal = Some(proposal);
        }

        if proposal == LivenessStatus::LiveFace {
            next.live_frames = next.live_frames.saturating_add(1);
        } else {
            next.live_frames = 0;
        }

        match proposal {
            LivenessStatus::FaceTooCloseToEdge
            | LivenessStatus::PoorQuality
            | LivenessStatus::PoorPosition => {
                if next.stable_frames >= config.correctable_frames {
                    next.live_frames = 0;
                    next.commit(proposal, CommitReason::Direct, now_ms, config);
                }
            }
            LivenessStatus::LiveFace => {
                let satisfied = next.live_frames >= config.required_live_frames
                    && next.stable_frames >= config.stability_frames;
                if satisfied {
                    next.commit(LivenessStatus::LiveFace, CommitReason::Direct, now_ms, config);
                } else {
                    next.commit(LivenessStatus::Checking, CommitReason::Direct, now_ms, config);
                }
            }
            LivenessStatus::Checking | LivenessStatus::SpoofDetected => {
                if next.stable_frames >= config.stability_frames {
                    next.commit(proposal, CommitReason::Direct, now_ms, config);
                }
            }
            LivenessStatus::NoFace => {}
        }

        // A broken live streak drops a committed LiveFace back to Checking.
        if next.committed == LivenessStatus::LiveFace
            && next.live_frames < config.required_live_frames
        {
            next.commit(LivenessStatus::Checking, CommitReason::Direct, now_ms, config);
        }

        (next, next.committed)
    }

    /// True when the committed status is `Checking` and its deadline has passed.
    pub fn deadline_elapsed(&self, now_ms: u64) -> bool {
        self.committed == LivenessStatus::Checking
            && matches!(self.checking_deadline_ms, Some(deadline) if now_ms >= deadline)
    }

    /// Consume the checking deadline and commit a decision from `evidence`.
    ///
    /// If no rule applies the status stays `Checking` without a new deadline,
    /// so the forced decision fires at most once per entry into `Checking`.
    pub fn force_decision(
        &self,
        evidence: &DecisionEvidence,
        config: &AnalyzerConfig,
    ) -> (AnalyzerState, LivenessStatus) {
        let mut next = *self;
        next.checking_deadline_ms = None;

        if let Some(status) = forced_status(evidence, config) {
            if status == LivenessStatus::LiveFace {
                next.live_frames = next.live_frames.max(config.required_live_frames);
                next.stable_frames = next.stable_frames.max(config.stability_frames);
                next.last_proposal = Some(LivenessStatus::LiveFace);
            } else {
                next.live_frames = 0;
            }
            next.committed = status;
            next.reason = CommitReason::Timeout;
        }

        (next, next.committed)
    }

    fn commit(
        &mut self,
        status: LivenessStatus,
        reason: CommitReason,
        now_ms: u64,
        config: &AnalyzerConfig,
    ) {
        if status == self.committed {
            return;
        }
        self.checking_deadline_ms = if status == LivenessStatus::Checking {
            Some(now_ms.saturating_add(config.checking_timeout_ms))
        } else {
            None
        };
        self.committed = status;
        self.reason = reason;
    }
}

fn forced_status(evidence: &DecisionEvidence, config: &AnalyzerConfig) -> Option<LivenessStatus> {
    if !evidence.boundary_compliant {
        return Some(LivenessStatus::FaceTooCloseToEdge);
    }

    let quality_ok = evidence.quality >= 0.7 * config.quality_threshold;
    let position_ok = evidence.position >= 0.4;
    let movement_ok = evidence.movement >= 0.5 * config.movement_low;

    if quality_ok && position_ok && movement_ok {
        Some(LivenessStatus::LiveFace)
    } else if !quality_ok {
        Some(LivenessStatus::PoorQuality)
    } else if !position_ok {
        Some(LivenessStatus::PoorPosition)
    } else {
        None
    }
}
