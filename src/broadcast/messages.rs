//! Messages pushed to subscribers.
//!
//! Every message is one JSON text frame with a `type` discriminator and a
//! `payload` object:
//!
//! ```text
//! {"type": "initial_setup",   "payload": {"initial_pos": {..}, "anchors": {..}}}
//! {"type": "position_update", "payload": {"id": "TAG01", "kind": "tag", "pos": {..}}}
//! ```

use crate::anchors::AnchorRegistry;
use crate::core::types::{Position, PositionEstimate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Handshake payload: everything needed to render the map before the first fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialSetup {
    pub initial_pos: Position,
    pub anchors: BTreeMap<String, Position>,
}

impl InitialSetup {
    pub fn from_registry(registry: &AnchorRegistry) -> Self {
        Self {
            initial_pos: registry.initial_position(),
            anchors: registry.layout().clone(),
        }
    }
}

/// Outbound subscriber message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    InitialSetup(InitialSetup),
    PositionUpdate(PositionEstimate),
}

impl ServerMessage {
    /// Serialize to the text frame sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_setup_wire_format() {
        let registry = AnchorRegistry::from_points([("A1", 0.0, 0.0), ("A2", 8.0, 6.0)]);
        let json = ServerMessage::InitialSetup(InitialSetup::from_registry(&registry))
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "initial_setup");
        assert_eq!(value["payload"]["initial_pos"]["x"], 4.0);
        assert_eq!(value["payload"]["initial_pos"]["y"], 3.0);
        assert_eq!(value["payload"]["anchors"]["A2"]["x"], 8.0);
    }

    #[test]
    fn test_position_update_wire_format() {
        let json = ServerMessage::PositionUpdate(PositionEstimate::new(
            "TAG01",
            Position::new(5.0, 4.5),
        ))
        .to_json()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "position_update");
        assert_eq!(value["payload"]["id"], "TAG01");
        assert_eq!(value["payload"]["kind"], "tag");
        assert_eq!(value["payload"]["pos"]["y"], 4.5);
    }

    #[test]
    fn test_empty_layout_handshake() {
        let setup = InitialSetup::from_registry(&AnchorRegistry::default());
        assert!(setup.anchors.is_empty());
        assert_eq!(setup.initial_pos, Position::new(0.0, 0.0));
    }
}
