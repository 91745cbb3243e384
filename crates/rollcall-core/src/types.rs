use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Number of points in the face-mesh landmark topology.
pub const FACE_MESH_POINTS: usize = 468;

/// A single landmark, normalized to [0,1] relative to the detector input image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Landmark) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Padded face rectangle in preview-surface pixels, plus containment results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundaryResult {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub is_completely_in_frame: bool,
    /// Fraction of the padded rect that lies inside the preview surface.
    pub visibility_ratio: f32,
}

impl BoundaryResult {
    /// A boundary result for a frame without a usable face.
    pub fn outside() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 0.0,
            max_y: 0.0,
            is_completely_in_frame: false,
            visibility_ratio: 0.0,
        }
    }

    /// Fully inside the margined preview and visible above `completeness_threshold`.
    pub fn is_compliant(&self, completeness_threshold: f32) -> bool {
        self.is_completely_in_frame && self.visibility_ratio >= completeness_threshold
    }

    pub fn face_box(&self) -> FaceBox {
        FaceBox {
            left: self.min_x,
            top: self.min_y,
            right: self.max_x,
            bottom: self.max_y,
        }
    }
}

/// Scores derived from one frame's landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub quality: f32,
    pub position: f32,
    pub boundary: BoundaryResult,
}

/// One frame of landmarks retained in history.
#[derive(Debug, Clone)]
pub struct LandmarkFrame {
    pub landmarks: Arc<[Landmark]>,
    pub timestamp_ms: u64,
    pub quality: f32,
}

/// Position score together with the geometry it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionRecord {
    pub score: f32,
    pub center_x: f32,
    pub center_y: f32,
    pub face_ratio: f32,
}

/// Axis-aligned face rectangle in preview pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }
}

/// Committed liveness status of an analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessStatus {
    #[default]
    NoFace,
    PoorQuality,
    PoorPosition,
    FaceTooCloseToEdge,
    Checking,
    LiveFace,
    SpoofDetected,
}

impl LivenessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LivenessStatus::NoFace => "NO_FACE",
            LivenessStatus::PoorQuality => "POOR_QUALITY",
            LivenessStatus::PoorPosition => "POOR_POSITION",
            LivenessStatus::FaceTooCloseToEdge => "FACE_TOO_CLOSE_TO_EDGE",
            LivenessStatus::Checking => "CHECKING",
            LivenessStatus::LiveFace => "LIVE_FACE",
            LivenessStatus::SpoofDetected => "SPOOF_DETECTED",
        }
    }

    /// Short guidance shown to the person in front of the camera.
    pub fn guidance(&self) -> &'static str {
        match self {
            LivenessStatus::NoFace => "Position your face in the frame",
            LivenessStatus::PoorQuality => "Move closer and face the camera",
            LivenessStatus::PoorPosition => "Center your face in the frame",
            LivenessStatus::FaceTooCloseToEdge => "Move away from the edge of the frame",
            LivenessStatus::Checking => "Hold still",
            LivenessStatus::LiveFace => "Face verified, capturing",
            LivenessStatus::SpoofDetected => "Live face required",
        }
    }
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the current status was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitReason {
    /// Initial state, close, or a no-face reset.
    #[default]
    Reset,
    /// Debounced proposal reached its commit threshold.
    Direct,
    /// Forced decision after the checking deadline elapsed.
    Timeout,
}

/// A face embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// A previously registered person: identifying metadata and stored embedding.
#[derive(Debug, Clone)]
pub struct EnrolledIdentity {
    pub id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

/// Result of a 1:N identification.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Best identity when `decided`, otherwise `None`.
    pub identity: Option<EnrolledIdentity>,
    /// Best similarity seen during the scan, reported even on non-match.
    pub similarity: f32,
    pub decided: bool,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            identity: None,
            similarity,
            decided: false,
        }
    }
}
