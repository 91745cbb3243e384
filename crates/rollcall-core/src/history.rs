use std::collections::VecDeque;

use crate::config::AnalyzerConfig;
use crate::types::{LandmarkFrame, PositionRecord};

/// Fixed-capacity FIFO: pushing into a full buffer evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_back(value);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// The most recent `n` entries (or fewer), oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }
}

/// The four per-analyzer histories: landmark frames, quality scalars,
/// position records and boundary compliance flags.
#[derive(Debug, Clone)]
pub struct HistoryBuffers {
    pub landmarks: BoundedHistory<LandmarkFrame>,
    pub quality: BoundedHistory<f32>,
    pub position: BoundedHistory<PositionRecord>,
    pub boundary: BoundedHistory<bool>,
}

impl HistoryBuffers {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            landmarks: BoundedHistory::new(config.landmark_history),
            quality: BoundedHistory::new(config.quality_history),
            position: BoundedHistory::new(config.position_history),
            boundary: BoundedHistory::new(config.boundary_history),
        }
    }

    /// Append one processed face frame to every buffer.
    pub fn push_frame(&mut self, frame: LandmarkFrame, position: PositionRecord, compliant: bool) {
        self.quality.push(frame.quality);
        self.landmarks.push(frame);
        self.position.push(position);
        self.boundary.push(compliant);
    }

    pub fn clear(&mut self) {
        self.landmarks.clear();
        self.quality.clear();
        self.position.clear();
        self.boundary.clear();
    }

    /// Mean of the quality history, `None` when empty.
    pub fn average_quality(&self) -> Option<f32> {
        mean(self.quality.iter().copied(), self.quality.len())
    }

    /// Mean position score, `None` when empty.
    pub fn average_position(&self) -> Option<f32> {
        mean(self.position.iter().map(|p| p.score), self.position.len())
    }

    /// True when the last `window` boundary flags exist and are all compliant.
    pub fn boundary_window_compliant(&self, window: usize) -> bool {
        self.boundary.len() >= window && self.boundary.recent(window).all(|&ok| ok)
    }

    /// Number of compliant entries among the last `window` boundary flags.
    pub fn recent_compliant_count(&self, window: usize) -> usize {
        self.boundary.recent(window).filter(|&&ok| ok).count()
    }
}

fn mean(values: impl Iterator<Item = f32>, len: usize) -> Option<f32> {
    if len == 0 {
        return None;
    }
    Some(values.sum::<f32>() / len as f32)
}
