//! Shared membership state: the connection registry and presence tracker
//! behind one lock.
//!
//! Every mutation takes the write lock for its whole duration, so a
//! connection's room set, the room index and the presence sets always move
//! together. Nothing here awaits anything but the lock itself.

use super::connection::ConnectionHandle;
use super::presence::PresenceTracker;
use super::registry::ConnectionRegistry;
use roomrelay_core::{ConnId, RoomId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct RoomTable {
    registry: ConnectionRegistry,
    presence: PresenceTracker,
}

impl RoomTable {
    /// Drop `user_id` from the room's presence unless another of their
    /// connections is still joined. The connection itself must already be
    /// out of the room.
    fn release_presence(&mut self, room_id: &str, user_id: &str) -> usize {
        if self.registry.user_joined(room_id, user_id) {
            self.presence.visitor_count(room_id)
        } else {
            self.presence.leave(room_id, user_id)
        }
    }
}

/// Result of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Visitor count after the join.
    pub visitors: usize,
    /// False when the connection was already in the room.
    pub newly_joined: bool,
}

/// Connection removed by [`RelayState::unregister`].
#[derive(Debug)]
pub struct Departure {
    pub user_id: UserId,
    /// Rooms the connection was joined to, already released.
    pub rooms: Vec<RoomId>,
    pub connected_at: Instant,
}

/// Summary counters for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub connections: usize,
    pub rooms: usize,
}

/// Owned membership state, shared by every session through an `Arc`.
#[derive(Debug, Default)]
pub struct RelayState {
    table: RwLock<RoomTable>,
    next_conn_id: AtomicU64,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection id. Ids are never reused.
    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register an authenticated connection with no rooms.
    pub async fn register(&self, handle: ConnectionHandle, user_id: UserId) {
        let mut table = self.table.write().await;
        table.registry.register(handle, user_id);
    }

    /// Join `room_id`. `None` if the connection is no longer registered.
    pub async fn join(&self, conn_id: ConnId, room_id: &str) -> Option<JoinOutcome> {
        let mut table = self.table.write().await;
        let newly_joined = table.registry.add_room(conn_id, room_id)?;
        let user_id = table.registry.get(conn_id)?.user_id.clone();
        let visitors = table.presence.join(room_id, &user_id);
        debug!(conn_id, room_id, visitors, newly_joined, "joined room");
        Some(JoinOutcome {
            visitors,
            newly_joined,
        })
    }

    /// Leave `room_id`. `None` if the connection was not joined to it, in
    /// which case nothing changes.
    pub async fn leave(&self, conn_id: ConnId, room_id: &str) -> Option<usize> {
        let mut table = self.table.write().await;
        let user_id = table.registry.get(conn_id)?.user_id.clone();
        if !table.registry.remove_room(conn_id, room_id) {
            return None;
        }
        let visitors = table.release_presence(room_id, &user_id);
        debug!(conn_id, room_id, visitors, "left room");
        Some(visitors)
    }

    /// Remove the connection and release every room it had joined.
    ///
    /// Only the first call for a given id returns `Some`.
    pub async fn unregister(&self, conn_id: ConnId) -> Option<Departure> {
        let mut table = self.table.write().await;
        let conn = table.registry.unregister(conn_id)?;
        let mut rooms = Vec::with_capacity(conn.rooms.len());
        for room_id in conn.rooms {
            table.release_presence(&room_id, &conn.user_id);
            rooms.push(room_id);
        }
        Some(Departure {
            user_id: conn.user_id,
            rooms,
            connected_at: conn.connected_at,
        })
    }

    /// Snapshot of the connections joined to `room_id`.
    pub async fn connections_in_room(&self, room_id: &str) -> Vec<ConnectionHandle> {
        self.table.read().await.registry.connections_in_room(room_id)
    }

    pub async fn visitor_count(&self, room_id: &str) -> usize {
        self.table.read().await.presence.visitor_count(room_id)
    }

    pub async fn stats(&self) -> RelayStats {
        let table = self.table.read().await;
        RelayStats {
            connections: table.registry.len(),
            rooms: table.presence.room_count(),
        }
    }
}

#[cfg(test)]
impl RelayState {
    pub async fn is_member(&self, conn_id: ConnId, room_id: &str) -> bool {
        self.table.read().await.registry.is_member(conn_id, room_id)
    }

    pub async fn is_registered(&self, conn_id: ConnId) -> bool {
        self.table.read().await.registry.get(conn_id).is_some()
    }
}
