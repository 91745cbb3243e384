//! rollcall-core: liveness gating and face identification for attendance.
//!
//! Landmarks from an external face-mesh detector drive a per-frame liveness
//! state machine; once a live, well-framed face is confirmed the captured
//! frame is cropped, embedded via ONNX Runtime and matched 1:N against the
//! enrolled identities by cosine similarity.

pub mod analyzer;
pub mod capture;
pub mod config;
pub mod embedding;
pub mod events;
pub mod history;
pub mod matcher;
pub mod metrics;
pub mod motion;
pub mod recognizer;
pub mod state;
pub mod types;

pub use analyzer::{AnalyzerSnapshot, FaceAnalyzer, FrameReport};
pub use config::{AnalyzerConfig, EmbeddingConfig, MatchConfig};
pub use embedding::{EmbeddingError, EmbeddingModel, EmbeddingPipeline, ExtractedEmbedding};
pub use events::{frame_channel, DetectionEvent, FaceDetection};
pub use matcher::{CosineMatcher, IdentityGallery, MatchPurpose, Matcher};
pub use recognizer::OnnxEmbeddingModel;
pub use types::{
    CommitReason, Embedding, EnrolledIdentity, FaceBox, Landmark, LivenessStatus, MatchResult,
};
