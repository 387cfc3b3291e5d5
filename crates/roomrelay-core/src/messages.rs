//! JSON wire messages for the room relay.
//!
//! Client messages carry a `type` discriminator. Server messages come in
//! three shapes: typed room events (`visitor_count`, `chat`), status
//! acknowledgments (`{status, message}`) and free-text notices
//! (`{message}`).

use crate::RoomId;
use serde::{Deserialize, Serialize};

/// A message sent by a client over an authenticated connection.
///
/// Fields are optional on the wire so that a message with a missing field
/// still decodes and can be answered with a `Failed` acknowledgment instead
/// of a malformed-message notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the room behind a shareable link. A `roomId` field, if present,
    /// is ignored.
    JoinRoom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<String>,
    },
    /// Leave a previously joined room.
    LeaveRoom {
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
    /// Relay an opaque drawing/chat payload to a room.
    Chat {
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape: Option<String>,
    },
}

/// Outcome carried by an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    Success,
    Failed,
}

/// `{"status": ..., "message": ...}` reply to a single client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: AckStatus,
    pub message: String,
}

/// `{"message": ...}` free-text notice (connection ack, malformed input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
}

/// Events fanned out to every member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    VisitorCount { visitors: usize },
    Chat { shape: String },
}

/// Any message the server writes to a connection.
///
/// Untagged: the variant is recognised by its fields (`type` for events,
/// `status` for acks, a lone `message` for notices), in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Event(RoomEvent),
    Ack(Ack),
    Notice(Notice),
}

impl ServerMessage {
    pub fn notice(message: impl Into<String>) -> Self {
        ServerMessage::Notice(Notice {
            message: message.into(),
        })
    }

    pub fn success(message: impl Into<String>) -> Self {
        ServerMessage::Ack(Ack {
            status: AckStatus::Success,
            message: message.into(),
        })
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ServerMessage::Ack(Ack {
            status: AckStatus::Failed,
            message: message.into(),
        })
    }

    pub fn visitor_count(visitors: usize) -> Self {
        ServerMessage::Event(RoomEvent::VisitorCount { visitors })
    }

    pub fn chat(shape: impl Into<String>) -> Self {
        ServerMessage::Event(RoomEvent::Chat {
            shape: shape.into(),
        })
    }

    /// The acknowledgment status, if this is an ack.
    pub fn status(&self) -> Option<AckStatus> {
        match self {
            ServerMessage::Ack(ack) => Some(ack.status),
            _ => None,
        }
    }
}
