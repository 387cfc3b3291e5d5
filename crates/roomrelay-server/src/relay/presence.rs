//! Per-room presence: the set of distinct users in each room.

use roomrelay_core::{RoomId, UserId};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Distinct users per room. Entries exist only while non-empty.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    rooms: HashMap<RoomId, HashSet<UserId>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user_id` to the room, creating the entry if needed. Returns the
    /// visitor count.
    pub fn join(&mut self, room_id: &str, user_id: &str) -> usize {
        let visitors = self.rooms.entry(room_id.to_string()).or_default();
        visitors.insert(user_id.to_string());
        visitors.len()
    }

    /// Remove `user_id` from the room, dropping the entry once empty. Returns
    /// the visitor count.
    ///
    /// Callers decide whether the user has really left (no other connection
    /// of theirs remains in the room). A missing entry or user means the
    /// state drifted; it is logged and counted as zero rather than failing.
    pub fn leave(&mut self, room_id: &str, user_id: &str) -> usize {
        let Some(visitors) = self.rooms.get_mut(room_id) else {
            warn!(room_id, user_id, "leave for room with no presence entry");
            return 0;
        };
        if !visitors.remove(user_id) {
            warn!(room_id, user_id, "leave for user not present in room");
        }
        let count = visitors.len();
        if count == 0 {
            self.rooms.remove(room_id);
        }
        count
    }

    /// Distinct users in the room, 0 when there is no entry.
    pub fn visitor_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, HashSet::len)
    }

    /// Number of occupied rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
