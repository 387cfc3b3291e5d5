//! Room resolution and event persistence.
//!
//! Both are external, possibly latent collaborators. The relay only ever
//! reads the link mapping and only ever appends events.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlEventStore;
pub use memory::{MemoryEventStore, StaticRoomResolver};

use futures_util::future::BoxFuture;
use roomrelay_core::{RelayResult, RoomId};
use serde::{Deserialize, Serialize};

/// Maps a shareable room link to the internal room id.
pub trait RoomResolver: Send + Sync {
    /// `Ok(None)` when no room is behind `link`; `Err` when the lookup itself
    /// failed.
    fn resolve_room_id<'a>(&'a self, link: &'a str) -> BoxFuture<'a, RelayResult<Option<RoomId>>>;
}

/// Durable record of chat/drawing events.
pub trait EventStore: Send + Sync {
    fn persist_event<'a>(&'a self, room_id: &'a str, shape: &'a str) -> BoxFuture<'a, RelayResult<()>>;
}

/// One persisted chat/drawing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub room_id: RoomId,
    /// Opaque serialized payload as sent by the client.
    pub shape: String,
    /// Milliseconds since the Unix epoch.
    pub at_ms: u64,
}

impl StoredEvent {
    pub fn now(room_id: &str, shape: &str) -> Self {
        let at_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            room_id: room_id.to_string(),
            shape: shape.to_string(),
            at_ms,
        }
    }
}
