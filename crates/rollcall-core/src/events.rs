//! Landmark-provider events and the latest-only channel that carries them.
//!
//! The provider pushes; the analyzer pulls whatever is newest. If the
//! analyzer is still busy with a frame when the next one arrives, the unread
//! frame is overwritten rather than queued.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::types::Landmark;

/// One detected face as reported by the landmark provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub landmarks: Vec<Landmark>,
    /// Size of the image the detector ran on.
    pub input_width: u32,
    pub input_height: u32,
    #[serde(default)]
    pub inference_time_ms: u64,
}

/// Result bundle for one camera frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Frame time, monotonic milliseconds.
    pub timestamp_ms: u64,
    #[serde(default)]
    pub faces: Vec<FaceDetection>,
    /// Set when the provider failed on this frame.
    #[serde(default)]
    pub error: Option<String>,
}

impl DetectionEvent {
    /// The single tracked face: the first detection with landmarks, unless the
    /// provider reported an error.
    pub fn primary_face(&self) -> Option<&FaceDetection> {
        if self.error.is_some() {
            return None;
        }
        self.faces.iter().find(|f| !f.landmarks.is_empty())
    }
}

/// Producer half of a latest-only channel.
#[derive(Debug)]
pub struct FrameSender<T> {
    tx: watch::Sender<Option<(u64, T)>>,
    seq: u64,
}

/// Consumer half of a latest-only channel.
#[derive(Debug)]
pub struct FrameReceiver<T> {
    rx: watch::Receiver<Option<(u64, T)>>,
    last_seq: u64,
    dropped: u64,
}

/// Create a latest-only channel: at most one unread value is retained.
pub fn frame_channel<T>() -> (FrameSender<T>, FrameReceiver<T>) {
    let (tx, rx) = watch::channel(None);
    (
        FrameSender { tx, seq: 0 },
        FrameReceiver {
            rx,
            last_seq: 0,
            dropped: 0,
        },
    )
}

impl<T> FrameSender<T> {
    /// Publish a frame, replacing any frame the consumer has not read yet.
    pub fn send(&mut self, value: T) {
        self.seq += 1;
        self.tx.send_replace(Some((self.seq, value)));
    }

    /// Number of frames published so far.
    pub fn sent(&self) -> u64 {
        self.seq
    }
}

impl<T: Clone> FrameReceiver<T> {
    /// Wait for the newest unread frame. Returns `None` once the sender is
    /// gone and every published frame has been seen.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            let current = self.rx.borrow_and_update().clone();
            if let Some((seq, value)) = current {
                let skipped = seq.saturating_sub(self.last_seq + 1);
                if skipped > 0 {
                    self.dropped += skipped;
                    tracing::trace!(skipped, total = self.dropped, "dropped stale frames");
                }
                self.last_seq = seq;
                return Some(value);
            }
        }
    }

    /// Frames overwritten before the consumer could read them.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
