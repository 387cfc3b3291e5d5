//! JSON text framing for the relay connection.
//!
//! Wire format: one JSON object per WebSocket text frame. Binary frames are
//! accepted when they hold valid UTF-8.

use crate::error::{RelayError, RelayResult};
use crate::messages::{ClientMessage, ServerMessage};

/// Encode a server message into the text of one frame.
pub fn encode_server(msg: &ServerMessage) -> RelayResult<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode the text of one inbound frame into a client message.
///
/// Any parse failure (bad JSON, unknown `type`, wrong field types) is
/// reported as [`RelayError::InvalidMessage`] carrying the parser detail.
pub fn decode_client(text: &str) -> RelayResult<ClientMessage> {
    serde_json::from_str(text).map_err(|e| RelayError::InvalidMessage(e.to_string()))
}

/// Decode a binary frame, which must be UTF-8 JSON.
pub fn decode_client_bytes(data: &[u8]) -> RelayResult<ClientMessage> {
    let text = std::str::from_utf8(data)
        .map_err(|e| RelayError::InvalidMessage(format!("frame is not UTF-8: {e}")))?;
    decode_client(text)
}
