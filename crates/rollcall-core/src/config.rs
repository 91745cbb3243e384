//! Tunable parameters for the analyzer, the embedding pipeline and the matcher.
//!
//! Every struct deserializes with `#[serde(default)]`, so a configuration
//! file only needs to name the values it overrides.

use serde::Deserialize;

/// Liveness analyzer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// When false, steps 3–7 of the proposal (boundary stability, quality,
    /// position, motion) are skipped and a compliant face proposes `LiveFace`.
    pub enable_liveness_gating: bool,

    /// Preview surface size in pixels.
    pub preview_width: f32,
    pub preview_height: f32,

    // History capacities
    pub landmark_history: usize,
    pub quality_history: usize,
    pub position_history: usize,
    pub boundary_history: usize,

    /// Minimum rolling average quality.
    pub quality_threshold: f32,
    /// Minimum rolling average position score.
    pub position_threshold: f32,
    /// Face area / image area below which position is "too small".
    pub min_face_ratio: f32,
    /// Face area / image area above which position is "too large".
    pub max_face_ratio: f32,
    /// Normalized centroid distance from center tolerated by the position score.
    pub center_tolerance: f32,

    /// Horizontal padding applied to the landmark rect, as a fraction of its width.
    pub horizontal_padding: f32,
    /// Vertical padding applied to the landmark rect, as a fraction of its height.
    pub vertical_padding: f32,
    /// Margin inside the preview, as a fraction of its shorter side.
    pub boundary_margin_ratio: f32,
    /// Minimum visible fraction of the padded face rect.
    pub completeness_threshold: f32,
    /// Trailing boundary entries that must all be compliant.
    pub boundary_window: usize,

    /// Minimum samples before rolling averages are trusted.
    pub min_samples: usize,
    /// Landmark frames required before a spoof can be proposed.
    pub spoof_min_samples: usize,

    /// Movement band (normalized units per frame) accepted as live.
    pub movement_low: f32,
    pub movement_high: f32,
    /// Frame pairs used by the movement score.
    pub movement_pairs: usize,
    /// Frames used by the consistency score.
    pub consistency_frames: usize,
    /// Every n-th landmark is sampled by the motion scores.
    pub landmark_stride: usize,
    /// Per-landmark positional variance above which consistency decays.
    pub variance_threshold: f32,
    pub consistency_decay: f32,
    /// Minimum consistency for a live proposal.
    pub live_consistency: f32,
    /// Consistency below which a static face is treated as a spoof.
    pub spoof_consistency: f32,

    /// Consecutive live proposals required before `LiveFace` commits.
    pub required_live_frames: u32,
    /// Consecutive identical proposals required by the default commit path.
    pub stability_frames: u32,
    /// Consecutive proposals required for correctable statuses (edge/quality/position).
    pub correctable_frames: u32,
    /// Frame time after which a lingering `Checking` is forced to a decision.
    pub checking_timeout_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enable_liveness_gating: true,
            preview_width: 480.0,
            preview_height: 640.0,
            landmark_history: 6,
            quality_history: 8,
            position_history: 5,
            boundary_history: 6,
            quality_threshold: 0.6,
            position_threshold: 0.5,
            min_face_ratio: 0.05,
            max_face_ratio: 0.70,
            center_tolerance: 0.35,
            horizontal_padding: 0.15,
            vertical_padding: 0.20,
            boundary_margin_ratio: 0.05,
            completeness_threshold: 0.95,
            boundary_window: 4,
            min_samples: 3,
            spoof_min_samples: 5,
            movement_low: 0.0003,
            movement_high: 0.004,
            movement_pairs: 4,
            consistency_frames: 3,
            landmark_stride: 5,
            variance_threshold: 0.02,
            consistency_decay: 0.98,
            live_consistency: 0.6,
            spoof_consistency: 0.3,
            required_live_frames: 8,
            stability_frames: 4,
            correctable_frames: 2,
            checking_timeout_ms: 2000,
        }
    }
}

/// Embedding pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Square model input side in pixels.
    pub input_size: u32,
    /// Expected embedding length.
    pub embedding_dim: usize,
    /// Crops whose shorter side is below this are rejected.
    pub min_face_size: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            input_size: 160,
            embedding_dim: 512,
            min_face_size: 80,
        }
    }
}

/// Identity matcher thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Threshold used when checking a new enrollment against existing identities.
    pub duplicate_threshold: f32,
    /// Threshold used for attendance identification.
    pub attendance_threshold: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.70,
            attendance_threshold: 0.80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_override_keeps_defaults() {
        let cfg: AnalyzerConfig =
            serde_json::from_str(r#"{ "required_live_frames": 3, "preview_width": 720.0 }"#)
                .unwrap();
        assert_eq!(cfg.required_live_frames, 3);
        assert_eq!(cfg.preview_width, 720.0);
        assert_eq!(cfg.stability_frames, 4);
        assert_eq!(cfg.checking_timeout_ms, 2000);
    }

    #[test]
    fn test_match_defaults() {
        let cfg = MatchConfig::default();
        assert!(cfg.duplicate_threshold < cfg.attendance_threshold);
    }
}
