use std::sync::Arc;

use image::RgbImage;
use rollcall_core::embedding::EmbeddingQuality;
use rollcall_core::matcher::GallerySnapshot;
use rollcall_core::{
    CosineMatcher, Embedding, EmbeddingConfig, EmbeddingError, EmbeddingModel, EmbeddingPipeline,
    FaceBox, MatchResult, Matcher,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment extraction.
pub struct EnrollResult {
    pub embedding: Embedding,
    pub quality: EmbeddingQuality,
    /// Closest existing identity under the duplicate-check threshold.
    pub duplicate: MatchResult,
}

/// Result of an attendance identification.
pub struct IdentifyResult {
    pub result: MatchResult,
    pub quality: EmbeddingQuality,
    /// Version of the gallery snapshot the match was computed against.
    pub gallery_version: u64,
}

/// Where the captured face lies in a frame.
pub struct Capture {
    pub frame: RgbImage,
    pub face: FaceBox,
    pub preview_width: f32,
    pub preview_height: f32,
}

/// Messages sent from the session to the engine thread.
enum EngineRequest {
    Identify {
        capture: Capture,
        gallery: Arc<GallerySnapshot>,
        threshold: f32,
        reply: oneshot::Sender<Result<IdentifyResult, EngineError>>,
    },
    Enroll {
        face: RgbImage,
        gallery: Arc<GallerySnapshot>,
        duplicate_threshold: f32,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Embed the captured face and match it against `gallery`.
    pub async fn identify(
        &self,
        capture: Capture,
        gallery: Arc<GallerySnapshot>,
        threshold: f32,
    ) -> Result<IdentifyResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                capture,
                gallery,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Embed an already cropped face and check it against existing identities.
    pub async fn enroll(
        &self,
        face: RgbImage,
        gallery: Arc<GallerySnapshot>,
        duplicate_threshold: f32,
    ) -> Result<EnrollResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                face,
                gallery,
                duplicate_threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread owning the embedding model.
///
/// The thread exits, releasing the model, once every handle is dropped.
pub fn spawn_engine(
    model: Box<dyn EmbeddingModel>,
    config: EmbeddingConfig,
) -> Result<EngineHandle, EngineError> {
    let mut pipeline = EmbeddingPipeline::new(model, config);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Identify {
                        capture,
                        gallery,
                        threshold,
                        reply,
                    } => {
                        let result = run_identify(&mut pipeline, &capture, &gallery, threshold);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll {
                        face,
                        gallery,
                        duplicate_threshold,
                        reply,
                    } => {
                        let result = run_enroll(&mut pipeline, &face, &gallery, duplicate_threshold);
                        let _ = reply.send(result);
                    }
                }
            }
            pipeline.release();
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_identify(
    pipeline: &mut EmbeddingPipeline,
    capture: &Capture,
    gallery: &GallerySnapshot,
    threshold: f32,
) -> Result<IdentifyResult, EngineError> {
    let extracted = pipeline.extract_from_frame(
        &capture.frame,
        &capture.face,
        capture.preview_width,
        capture.preview_height,
    )?;

    let result = CosineMatcher.compare(&extracted.embedding, &gallery.identities, threshold);
    tracing::info!(
        decided = result.decided,
        similarity = result.similarity,
        gallery_version = gallery.version,
        candidates = gallery.identities.len(),
        "identify: match computed"
    );

    Ok(IdentifyResult {
        result,
        quality: extracted.quality,
        gallery_version: gallery.version,
    })
}

fn run_enroll(
    pipeline: &mut EmbeddingPipeline,
    face: &RgbImage,
    gallery: &GallerySnapshot,
    duplicate_threshold: f32,
) -> Result<EnrollResult, EngineError> {
    let extracted = pipeline.extract(face)?;
    let duplicate = CosineMatcher.compare(&extracted.embedding, &gallery.identities, duplicate_threshold);
    tracing::info!(
        quality = extracted.quality.score,
        duplicate = duplicate.decided,
        similarity = duplicate.similarity,
        "enroll: embedding extracted"
    );

    Ok(EnrollResult {
        embedding: extracted.embedding,
        quality: extracted.quality,
        duplicate,
    })
}
