//! Passive liveness signals from face-mesh landmark motion.
//!
//! A printed photograph or a still image on a screen produces near-identical
//! landmark positions across consecutive frames. A live person shows small
//! involuntary motion (breathing, micro head sway, eye drift) that moves the
//! mesh by a measurable amount, without jumping around the way a detector
//! does on a replayed or tampered feed.
//!
//! Two scores are derived from the landmark history:
//!
//! - **movement**: mean per-landmark displacement across the most recent
//!   frame pairs, in normalized image units.
//! - **consistency**: starts at 1.0 and decays for every sampled landmark
//!   whose position varies wildly over the last few frames.
//!
//! # Threat Coverage
//!
//! - **Blocks:** printed photographs and static images held in front of the camera.
//! - **Does not block:** video replay, 3D masks, adversarial displays.

use crate::config::AnalyzerConfig;
use crate::history::BoundedHistory;
use crate::types::{Landmark, LandmarkFrame};

/// Movement at or below this is treated as a frozen (pixel-identical) mesh.
pub const FROZEN_MOVEMENT: f32 = 1e-6;

/// Motion scores over the current landmark history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionAnalysis {
    /// Mean sampled-landmark displacement per frame pair.
    pub movement: f32,
    /// Temporal consistency in (0, 1].
    pub consistency: f32,
    /// Number of frame pairs the movement score averaged over.
    pub frame_pairs_analysed: usize,
}

impl MotionAnalysis {
    /// True when at least one pair was analysed and nothing moved.
    pub fn is_frozen(&self) -> bool {
        self.frame_pairs_analysed > 0 && self.movement <= FROZEN_MOVEMENT
    }
}

/// Mean displacement of every `stride`-th landmark across consecutive frames.
///
/// Frames are given oldest first. Returns the mean over frame pairs and the
/// number of pairs. Fewer than 2 frames yields `(0.0, 0)`.
pub fn movement_score(frames: &[&[Landmark]], stride: usize) -> (f32, usize) {
    if frames.len() < 2 {
        return (0.0, 0);
    }
    let stride = stride.max(1);

    let mut total = 0.0f32;
    let mut pair_count = 0usize;

    for pair in frames.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);
        let n = prev.len().min(curr.len());

        let mut pair_total = 0.0f32;
        let mut sampled = 0usize;
        for i in (0..n).step_by(stride) {
            pair_total += curr[i].distance(&prev[i]);
            sampled += 1;
        }

        if sampled > 0 {
            total += pair_total / sampled as f32;
        }
        pair_count += 1;
    }

    (total / pair_count as f32, pair_count)
}

/// Consistency of sampled landmark positions across `frames`.
///
/// Each sampled landmark whose positional variance (x variance + y variance)
/// exceeds `variance_threshold` multiplies the score by `decay`.
pub fn consistency_score(
    frames: &[&[Landmark]],
    stride: usize,
    variance_threshold: f32,
    decay: f32,
) -> f32 {
    if frames.len() < 2 {
        return 1.0;
    }
    let stride = stride.max(1);
    let n = frames.iter().map(|f| f.len()).min().unwrap_or(0);
    let count = frames.len() as f32;

    let mut score = 1.0f32;
    for i in (0..n).step_by(stride) {
        let mean_x = frames.iter().map(|f| f[i].x).sum::<f32>() / count;
        let mean_y = frames.iter().map(|f| f[i].y).sum::<f32>() / count;
        let variance = frames
            .iter()
            .map(|f| {
                let dx = f[i].x - mean_x;
                let dy = f[i].y - mean_y;
                dx * dx + dy * dy
            })
            .sum::<f32>()
            / count;

        if variance > variance_threshold {
            score *= decay;
        }
    }
    score
}

/// Compute both scores over the trailing landmark history.
pub fn analyse(history: &BoundedHistory<LandmarkFrame>, config: &AnalyzerConfig) -> MotionAnalysis {
    let movement_frames: Vec<&[Landmark]> = history
        .recent(config.movement_pairs + 1)
        .map(|f| &f.landmarks[..])
        .collect();
    let (movement, frame_pairs_analysed) =
        movement_score(&movement_frames, config.landmark_stride);

    let consistency_frames: Vec<&[Landmark]> = history
        .recent(config.consistency_frames)
        .map(|f| &f.landmarks[..])
        .collect();
    let consistency = consistency_score(
        &consistency_frames,
        config.landmark_stride,
        config.variance_threshold,
        config.consistency_decay,
    );

    MotionAnalysis {
        movement,
        consistency,
        frame_pairs_analysed,
    }
}
