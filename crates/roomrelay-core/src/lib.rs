//! roomrelay-core: shared protocol library for the room relay.
//!
//! Provides the JSON wire messages exchanged over a relay connection, the
//! text codec that turns them into frames, and the error type shared by the
//! server and its collaborators.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode_client, decode_client_bytes, encode_server};
pub use error::{RelayError, RelayResult};
pub use messages::{Ack, AckStatus, ClientMessage, Notice, RoomEvent, ServerMessage};

/// Authenticated user identifier, as produced by the identity verifier.
pub type UserId = String;

/// Internal room identifier, as produced by the room resolver.
pub type RoomId = String;

/// Server-assigned identifier of one live connection.
pub type ConnId = u64;
