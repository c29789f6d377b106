//! Static anchor layout.
//!
//! The layout is a JSON object mapping anchor ids to floor-plan coordinates:
//!
//! ```json
//! { "A1": { "x": 0.0, "y": 0.0 }, "A2": { "x": 10.0, "y": 0.0 } }
//! ```
//!
//! A missing or malformed file is not fatal: the service starts with an empty
//! registry, keeps accepting subscribers, and simply never produces a fix.

use crate::core::types::Position;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One fixed receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorDescriptor {
    pub id: String,
    pub position: Position,
}

/// Immutable anchor id → position mapping, loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorRegistry {
    anchors: BTreeMap<String, Position>,
}

impl AnchorRegistry {
    /// Build a registry from `(id, x, y)` triples.
    pub fn from_points<I, S>(points: I) -> Self
    where
        I: IntoIterator<Item = (S, f64, f64)>,
        S: Into<String>,
    {
        Self {
            anchors: points
                .into_iter()
                .map(|(id, x, y)| (id.into(), Position::new(x, y)))
                .collect(),
        }
    }

    /// Parse a layout document.
    pub fn from_json_str(json: &str) -> Result<Self, AnchorError> {
        let anchors: BTreeMap<String, Position> =
            serde_json::from_str(json).map_err(|e| AnchorError::Parse(e.to_string()))?;

        if let Some((id, _)) = anchors
            .iter()
            .find(|(_, p)| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(AnchorError::Parse(format!(
                "anchor {id} has non-finite coordinates"
            )));
        }

        Ok(Self { anchors })
    }

    /// Read and parse a layout file.
    pub fn load(path: &Path) -> Result<Self, AnchorError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| AnchorError::Io(e.to_string()))?;
        Self::from_json_str(&content)
    }

    /// Read a layout file, falling back to an empty registry on any failure.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(registry) => {
                tracing::info!(
                    path = %path.display(),
                    anchors = registry.len(),
                    "Loaded anchor layout"
                );
                registry
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "Anchor layout unavailable, continuing without anchors: {}",
                    e
                );
                Self::default()
            }
        }
    }

    pub fn get(&self, anchor_id: &str) -> Option<Position> {
        self.anchors.get(anchor_id).copied()
    }

    pub fn contains(&self, anchor_id: &str) -> bool {
        self.anchors.contains_key(anchor_id)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Anchors in id order.
    pub fn iter(&self) -> impl Iterator<Item = AnchorDescriptor> + '_ {
        self.anchors.iter().map(|(id, position)| AnchorDescriptor {
            id: id.clone(),
            position: *position,
        })
    }

    /// The layout as sent to subscribers.
    pub fn layout(&self) -> &BTreeMap<String, Position> {
        &self.anchors
    }

    /// Default position shown before the first fix: the middle of the
    /// bounding box that starts at the origin. `(0, 0)` with no anchors.
    pub fn initial_position(&self) -> Position {
        if self.anchors.is_empty() {
            return Position::default();
        }
        let max_x = self
            .anchors
            .values()
            .map(|p| p.x)
            .fold(f64::NEG_INFINITY, f64::max);
        let max_y = self
            .anchors
            .values()
            .map(|p| p.y)
            .fold(f64::NEG_INFINITY, f64::max);
        Position::new(max_x / 2.0, max_y / 2.0)
    }
}

/// Anchor layout errors.
#[derive(Debug)]
pub enum AnchorError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for AnchorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnchorError::Io(e) => write!(f, "IO error: {e}"),
            AnchorError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for AnchorError {}
