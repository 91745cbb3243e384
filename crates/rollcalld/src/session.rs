//! Attendance session: landmark events in, status and match reports out.
//!
//! Events arrive as JSON lines (a `DetectionEvent` plus an optional `frame`
//! image path). Each event is analyzed immediately; when the capture gate
//! opens, the frame is handed to the engine thread in a background task and
//! the analyzer is reset so the next check-in needs fresh liveness evidence.

use std::path::PathBuf;
use std::sync::Arc;

use rollcall_core::{
    frame_channel, AnalyzerSnapshot, DetectionEvent, FaceAnalyzer, FaceBox, IdentityGallery,
    MatchConfig, MatchPurpose,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::engine::{Capture, EngineError, EngineHandle, IdentifyResult};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to read events: {0}")]
    Io(#[from] std::io::Error),
    #[error("event reader task failed: {0}")]
    Reader(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
enum CaptureError {
    #[error("failed to load frame {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame loader task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One input line: a provider event and the frame it was computed on.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionLine {
    #[serde(flatten)]
    pub event: DetectionEvent,
    #[serde(default)]
    pub frame: Option<PathBuf>,
}

/// One output line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Status(AnalyzerSnapshot),
    Match {
        timestamp_ms: u64,
        recognized: bool,
        id: Option<String>,
        display_name: Option<String>,
        similarity: f32,
        embedding_quality: f32,
        gallery_version: u64,
        message: String,
    },
    CaptureFailed {
        timestamp_ms: u64,
        error: String,
    },
}

impl Report {
    fn from_identify(timestamp_ms: u64, out: IdentifyResult) -> Self {
        let identity = out.result.identity.filter(|_| out.result.decided);
        let message = match &identity {
            Some(identity) => format!("recognized {}", identity.display_name),
            None => "not recognized".to_string(),
        };
        Report::Match {
            timestamp_ms,
            recognized: identity.is_some(),
            id: identity.as_ref().map(|i| i.id.clone()),
            display_name: identity.map(|i| i.display_name),
            similarity: out.result.similarity,
            embedding_quality: out.quality.score,
            gallery_version: out.gallery_version,
            message,
        }
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub captures: u64,
}

pub struct Session {
    analyzer: FaceAnalyzer,
    engine: EngineHandle,
    gallery: Arc<IdentityGallery>,
    matching: MatchConfig,
    reports: mpsc::UnboundedSender<Report>,
    snapshots: watch::Sender<AnalyzerSnapshot>,
    pending: JoinSet<()>,
    stats: SessionStats,
}

impl Session {
    pub fn new(
        analyzer: FaceAnalyzer,
        engine: EngineHandle,
        gallery: Arc<IdentityGallery>,
        matching: MatchConfig,
        reports: mpsc::UnboundedSender<Report>,
    ) -> Self {
        let (snapshots, _) = watch::channel(analyzer.snapshot());
        Self {
            analyzer,
            engine,
            gallery,
            matching,
            reports,
            snapshots,
            pending: JoinSet::new(),
            stats: SessionStats::default(),
        }
    }

    /// Receiver of the latest analyzer snapshot, updated every frame.
    pub fn subscribe(&self) -> watch::Receiver<AnalyzerSnapshot> {
        self.snapshots.subscribe()
    }

    /// Analyze one event and dispatch a capture if the gate is open.
    pub fn handle(&mut self, line: &SessionLine) {
        let Some(report) = self.analyzer.process(&line.event) else {
            return;
        };
        self.stats.frames += 1;

        let snapshot = self.analyzer.snapshot();
        self.snapshots.send_replace(snapshot.clone());
        let _ = self.reports.send(Report::Status(snapshot));

        if !report.suitable_for_capture {
            return;
        }
        let (Some(path), Some(face)) = (line.frame.clone(), report.faces.first().copied()) else {
            tracing::warn!(
                timestamp_ms = report.timestamp_ms,
                "capture gate open but the event carried no frame"
            );
            return;
        };

        self.dispatch_capture(report.timestamp_ms, path, face);
        self.analyzer.reset();
    }

    fn dispatch_capture(&mut self, timestamp_ms: u64, path: PathBuf, face: FaceBox) {
        self.stats.captures += 1;
        let engine = self.engine.clone();
        let gallery = self.gallery.snapshot();
        let threshold = MatchPurpose::Attendance.threshold(&self.matching);
        let preview = (
            self.analyzer.config().preview_width,
            self.analyzer.config().preview_height,
        );
        let reports = self.reports.clone();

        tracing::info!(timestamp_ms, frame = %path.display(), "capture dispatched");
        self.pending.spawn(async move {
            let report = match identify(engine, path, face, preview, gallery, threshold).await {
                Ok(out) => Report::from_identify(timestamp_ms, out),
                Err(e) => {
                    tracing::warn!(timestamp_ms, error = %e, "capture failed");
                    Report::CaptureFailed {
                        timestamp_ms,
                        error: e.to_string(),
                    }
                }
            };
            let _ = reports.send(report);
        });
    }

    /// Wait for in-flight captures and close the analyzer.
    pub async fn finish(mut self) -> SessionStats {
        while self.pending.join_next().await.is_some() {}
        self.analyzer.close();
        self.snapshots.send_replace(self.analyzer.snapshot());
        self.stats
    }
}

async fn identify(
    engine: EngineHandle,
    path: PathBuf,
    face: FaceBox,
    (preview_width, preview_height): (f32, f32),
    gallery: Arc<rollcall_core::matcher::GallerySnapshot>,
    threshold: f32,
) -> Result<IdentifyResult, CaptureError> {
    let frame = tokio::task::spawn_blocking(move || {
        image::open(&path)
            .map(|img| img.to_rgb8())
            .map_err(|source| CaptureError::Image { path, source })
    })
    .await??;

    let capture = Capture {
        frame,
        face,
        preview_width,
        preview_height,
    };
    Ok(engine.identify(capture, gallery, threshold).await?)
}

fn parse_line(line: &str, stats: &mut SessionStats) -> Option<SessionLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            stats.malformed += 1;
            tracing::warn!(error = %e, "skipping malformed event line");
            None
        }
    }
}

/// Drive `session` from a stream of JSON lines until it ends.
///
/// With `latest_only`, a reader task feeds a latest-only channel and events
/// that arrive while the previous one is still being handled are dropped.
/// Otherwise every line is processed in order (file replay).
pub async fn run<R>(reader: R, latest_only: bool, mut session: Session) -> Result<SessionStats, SessionError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let mut malformed = SessionStats::default();
    let mut dropped = 0;

    if latest_only {
        let (mut tx, mut rx) = frame_channel::<Arc<SessionLine>>();
        let producer = tokio::spawn(async move {
            let mut stats = SessionStats::default();
            let mut lines = reader.lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(parsed) = parse_line(&line, &mut stats) {
                    tx.send(Arc::new(parsed));
                }
            }
            Ok::<_, std::io::Error>(stats)
        });

        while let Some(line) = rx.next().await {
            session.handle(&line);
        }
        malformed = producer.await??;
        dropped = rx.dropped();
    } else {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(parsed) = parse_line(&line, &mut malformed) {
                session.handle(&parsed);
            }
        }
    }

    let mut stats = session.finish().await;
    stats.dropped = dropped;
    stats.malformed = malformed.malformed;
    Ok(stats)
}

/// Write reports as JSON lines until every sender is gone.
pub async fn write_reports<W>(mut rx: mpsc::UnboundedReceiver<Report>, mut out: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(report) = rx.recv().await {
        let mut line = serde_json::to_vec(&report).map_err(std::io::Error::other)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        written += 1;
    }
    out.flush().await?;
    Ok(written)
}
