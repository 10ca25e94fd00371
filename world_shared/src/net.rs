//! Wire protocol.
//!
//! Goals:
//! - Describe the registration/state HTTP bodies and the socket envelopes.
//! - Keep serialization explicit: every socket message is a JSON object with
//!   exactly one top-level key naming the message, e.g.
//!   `{"SetUnitDestination":{"id":"u1","destination":[4.0,2.0]}}`.
//!
//! Ground-plane positions travel as `[x, z]` pairs; height is a client-side
//! concern.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// `[x, z]` on the ground plane.
pub type GroundPos = (f32, f32);

/// Body of `POST {api}/register`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterRequest {
    pub user_id: u64,
}

/// Response of `POST {api}/register`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterResponse {
    /// Socket URL to open, e.g. `ws://127.0.0.1:8000/ws/<token>`.
    pub url: String,
}

/// One unit as returned by `GET {api}/game`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitState {
    pub id: String,
    pub position: GroundPos,
    pub destination: GroundPos,
}

/// Response of `GET {api}/game`, keyed by unit id.
pub type GameStateSnapshot = BTreeMap<String, UnitState>;

/// Client -> server commands. Fire and forget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientCommand {
    CreateUnit { position: GroundPos },
    SetUnitPosition { id: String, position: GroundPos },
    SetUnitDestination { id: String, destination: GroundPos },
}

impl ClientCommand {
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("serialize command")
    }
}

/// Server -> client: a unit was created.
///
/// The server may send the full unit record; only these fields are read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateUnit {
    pub id: String,
    pub position: GroundPos,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<GroundPos>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetUnitPosition {
    pub id: String,
    pub position: GroundPos,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetUnitDestination {
    pub id: String,
    pub destination: GroundPos,
}

/// Server -> client: a unit left the world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoveUnit {
    pub id: String,
}

/// Inbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMessage {
    CreateUnit(CreateUnit),
    SetUnitPosition(SetUnitPosition),
    SetUnitDestination(SetUnitDestination),
    RemoveUnit(RemoveUnit),
}

/// Discriminant of a [`ServerMessage`], used to key handler registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    CreateUnit,
    SetUnitPosition,
    SetUnitDestination,
    RemoveUnit,
}

impl ServerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::CreateUnit(_) => MessageKind::CreateUnit,
            ServerMessage::SetUnitPosition(_) => MessageKind::SetUnitPosition,
            ServerMessage::SetUnitDestination(_) => MessageKind::SetUnitDestination,
            ServerMessage::RemoveUnit(_) => MessageKind::RemoveUnit,
        }
    }

    /// Parses one socket text frame.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("deserialize server message")
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("serialize server message")
    }
}

/// A payload type carried by exactly one [`ServerMessage`] variant.
pub trait Inbound: Sized + 'static {
    const KIND: MessageKind;

    fn from_message(msg: &ServerMessage) -> Option<&Self>;
}

impl Inbound for CreateUnit {
    const KIND: MessageKind = MessageKind::CreateUnit;

    fn from_message(msg: &ServerMessage) -> Option<&Self> {
        match msg {
            ServerMessage::CreateUnit(m) => Some(m),
            _ => None,
        }
    }
}

impl Inbound for SetUnitPosition {
    const KIND: MessageKind = MessageKind::SetUnitPosition;

    fn from_message(msg: &ServerMessage) -> Option<&Self> {
        match msg {
            ServerMessage::SetUnitPosition(m) => Some(m),
            _ => None,
        }
    }
}

impl Inbound for SetUnitDestination {
    const KIND: MessageKind = MessageKind::SetUnitDestination;

    fn from_message(msg: &ServerMessage) -> Option<&Self> {
        match msg {
            ServerMessage::SetUnitDestination(m) => Some(m),
            _ => None,
        }
    }
}

impl Inbound for RemoveUnit {
    const KIND: MessageKind = MessageKind::RemoveUnit;

    fn from_message(msg: &ServerMessage) -> Option<&Self> {
        match msg {
            ServerMessage::RemoveUnit(m) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_single_tagged_key() -> anyhow::Result<()> {
        let create = ClientCommand::CreateUnit {
            position: (10.0, 15.0),
        };
        assert_eq!(
            create.to_json()?,
            r#"{"CreateUnit":{"position":[10.0,15.0]}}"#
        );

        let dest = ClientCommand::SetUnitDestination {
            id: "u1".to_string(),
            destination: (1.5, -2.0),
        };
        let value: serde_json::Value = serde_json::from_str(&dest.to_json()?)?;
        assert_eq!(value["SetUnitDestination"]["id"], "u1");
        assert_eq!(value["SetUnitDestination"]["destination"][1], -2.0);
        Ok(())
    }

    #[test]
    fn create_unit_accepts_full_unit_record() -> anyhow::Result<()> {
        let text = r#"{"CreateUnit":{"id":"u1","position":[3.0,4.0],"destination":[3.0,4.0],"unit_type":"Normal"}}"#;
        let msg = ServerMessage::from_json(text)?;
        assert_eq!(msg.kind(), MessageKind::CreateUnit);
        let create = CreateUnit::from_message(&msg).expect("create payload");
        assert_eq!(create.position, (3.0, 4.0));
        assert_eq!(create.destination, Some((3.0, 4.0)));
        Ok(())
    }

    #[test]
    fn create_unit_without_destination() -> anyhow::Result<()> {
        let msg = ServerMessage::from_json(r#"{"CreateUnit":{"id":"u1","position":[3,4]}}"#)?;
        assert_eq!(
            msg,
            ServerMessage::CreateUnit(CreateUnit {
                id: "u1".to_string(),
                position: (3.0, 4.0),
                destination: None,
            })
        );
        Ok(())
    }

    #[test]
    fn unknown_or_garbage_frames_fail_to_parse() {
        assert!(ServerMessage::from_json(r#"{"Explode":{"id":"u1"}}"#).is_err());
        assert!(ServerMessage::from_json("ping").is_err());
        assert!(ServerMessage::from_json(r#"{"SetUnitPosition":{"id":"u1"}}"#).is_err());
    }

    #[test]
    fn payload_extraction_matches_kind_only() -> anyhow::Result<()> {
        let msg = ServerMessage::from_json(r#"{"RemoveUnit":{"id":"u9"}}"#)?;
        assert!(RemoveUnit::from_message(&msg).is_some());
        assert!(SetUnitPosition::from_message(&msg).is_none());
        Ok(())
    }

    #[test]
    fn game_state_snapshot_parses_map() -> anyhow::Result<()> {
        let text = r#"{"b":{"id":"b","position":[1,2],"destination":[5,2]},"a":{"id":"a","position":[0,0],"destination":[0,0]}}"#;
        let state: GameStateSnapshot = serde_json::from_str(text)?;
        let ids: Vec<_> = state.keys().cloned().collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(state["b"].destination, (5.0, 2.0));
        Ok(())
    }
}
