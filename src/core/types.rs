//! Value types shared by the estimation pipeline.

use serde::{Deserialize, Serialize};

/// Subject identifier used when a reading does not name its tag.
pub const DEFAULT_TAG_ID: &str = "TAG01";

/// Kind tag attached to every published estimate.
pub const TAG_KIND: &str = "tag";

/// A point on the floor plan, in the same units as the anchor layout.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A single signal-strength sample reported by an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Tag the anchor heard
    pub tag_id: String,
    /// Anchor that heard it
    pub anchor_id: String,
    /// Received signal strength (dBm, usually negative)
    pub rssi: i32,
    /// Arrival order, assigned by the buffer on ingestion
    pub seq: u64,
}

impl Reading {
    /// Create a reading for the default tag. The sequence number is assigned on ingestion.
    pub fn new(anchor_id: impl Into<String>, rssi: i32) -> Self {
        Self::for_tag(DEFAULT_TAG_ID, anchor_id, rssi)
    }

    /// Create a reading for an explicit tag.
    pub fn for_tag(tag_id: impl Into<String>, anchor_id: impl Into<String>, rssi: i32) -> Self {
        Self {
            tag_id: tag_id.into(),
            anchor_id: anchor_id.into(),
            rssi,
            seq: 0,
        }
    }
}

/// Mean signal strength of one anchor's full window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSample {
    pub anchor_id: String,
    pub rssi: f64,
}

impl AggregatedSample {
    pub fn new(anchor_id: impl Into<String>, rssi: f64) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            rssi,
        }
    }
}

/// A computed tag position, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    /// Subject the fix belongs to
    pub id: String,
    /// Always [`TAG_KIND`]
    pub kind: String,
    /// Solved position
    pub pos: Position,
}

impl PositionEstimate {
    pub fn new(id: impl Into<String>, pos: Position) -> Self {
        Self {
            id: id.into(),
            kind: TAG_KIND.to_string(),
            pos,
        }
    }
}
