//! Bounded per-anchor reading windows.
//!
//! Readings are kept in small FIFO windows keyed by `(tag, anchor)`. A window
//! is "full" once it holds exactly `capacity` samples; older samples are
//! evicted as new ones arrive. Anchors that were never heard have no window.

use crate::core::types::{AggregatedSample, Reading};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, VecDeque};

/// Default number of samples averaged per anchor.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// The most recent readings for one `(tag, anchor)` pair.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingWindow {
    capacity: usize,
    readings: VecDeque<Reading>,
}

impl ReadingWindow {
    /// Create an empty window holding at most `capacity` readings.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a reading, evicting the oldest one at capacity.
    pub fn push(&mut self, reading: Reading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.readings.len() == self.capacity
    }

    /// Readings oldest first.
    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Signal strengths oldest first.
    pub fn rssi_values(&self) -> Vec<i32> {
        self.readings.iter().map(|r| r.rssi).collect()
    }

    /// Arithmetic mean of the window, `None` when empty.
    pub fn mean_rssi(&self) -> Option<f64> {
        if self.readings.is_empty() {
            return None;
        }
        Some(self.readings.iter().map(|r| r.rssi as f64).mean())
    }
}

/// Per-`(tag, anchor)` reading windows.
///
/// The buffer does no validation: unknown anchors are stored like any other
/// and are filtered out later by the estimator.
#[derive(Debug, Clone)]
pub struct ReadingBuffer {
    window_size: usize,
    windows: BTreeMap<String, BTreeMap<String, ReadingWindow>>,
    next_seq: u64,
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl ReadingBuffer {
    /// Create a buffer whose windows hold `window_size` readings each.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Append a reading to its `(tag, anchor)` window and return its arrival number.
    pub fn ingest(&mut self, mut reading: Reading) -> u64 {
        self.next_seq += 1;
        reading.seq = self.next_seq;

        let window_size = self.window_size;
        self.windows
            .entry(reading.tag_id.clone())
            .or_default()
            .entry(reading.anchor_id.clone())
            .or_insert_with(|| ReadingWindow::new(window_size))
            .push(reading);

        self.next_seq
    }

    /// Window for one pair, if the anchor has been heard for that tag.
    pub fn window(&self, tag_id: &str, anchor_id: &str) -> Option<&ReadingWindow> {
        self.windows.get(tag_id).and_then(|w| w.get(anchor_id))
    }

    /// Tags with at least one window.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    /// Full windows of one tag, keyed by anchor id.
    pub fn full_anchors(&self, tag_id: &str) -> BTreeMap<&str, &ReadingWindow> {
        self.windows
            .get(tag_id)
            .map(|anchors| {
                anchors
                    .iter()
                    .filter(|(_, window)| window.is_full())
                    .map(|(anchor, window)| (anchor.as_str(), window))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mean signal strength of every full window of one tag.
    pub fn aggregate(&self, tag_id: &str) -> Vec<AggregatedSample> {
        self.full_anchors(tag_id)
            .into_iter()
            .filter_map(|(anchor, window)| {
                window
                    .mean_rssi()
                    .map(|rssi| AggregatedSample::new(anchor, rssi))
            })
            .collect()
    }

    /// Drop every window.
    pub fn clear(&mut self) {
        self.windows.clear();
    }

    /// Total number of buffered readings.
    pub fn len(&self) -> usize {
        self.windows
            .values()
            .flat_map(|anchors| anchors.values())
            .map(ReadingWindow::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
