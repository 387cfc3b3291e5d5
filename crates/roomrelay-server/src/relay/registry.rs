//! Registry of live authenticated connections and the rooms each has joined.
//!
//! Alongside the per-connection room sets it keeps a room -> connections
//! index so fan-out never scans every connection. Both are updated in the
//! same call and never diverge.

use super::connection::ConnectionHandle;
use roomrelay_core::{ConnId, RoomId, UserId};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::debug;

/// A registered connection.
#[derive(Debug)]
pub struct Connection {
    /// Send capability for this connection.
    pub handle: ConnectionHandle,
    /// Authenticated user behind the connection.
    pub user_id: UserId,
    /// Rooms currently joined.
    pub rooms: HashSet<RoomId>,
    /// When the connection registered.
    pub connected_at: Instant,
}

/// Live connections indexed by id and by room.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnId, Connection>,
    room_index: HashMap<RoomId, HashSet<ConnId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with an empty room set.
    pub fn register(&mut self, handle: ConnectionHandle, user_id: UserId) {
        let id = handle.id();
        self.connections.insert(
            id,
            Connection {
                handle,
                user_id,
                rooms: HashSet::new(),
                connected_at: Instant::now(),
            },
        );
    }

    /// Remove a connection and its index entries.
    ///
    /// Returns the removed record on the first call only, so callers can use
    /// it to run teardown exactly once.
    pub fn unregister(&mut self, conn_id: ConnId) -> Option<Connection> {
        let conn = self.connections.remove(&conn_id)?;
        for room_id in &conn.rooms {
            self.unindex(room_id, conn_id);
        }
        debug!(conn_id, rooms = conn.rooms.len(), "connection unregistered");
        Some(conn)
    }

    /// Add `room_id` to the connection's room set.
    ///
    /// `None` if the connection is unknown, otherwise whether the room was
    /// newly added.
    pub fn add_room(&mut self, conn_id: ConnId, room_id: &str) -> Option<bool> {
        let conn = self.connections.get_mut(&conn_id)?;
        if !conn.rooms.insert(room_id.to_string()) {
            return Some(false);
        }
        self.room_index
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id);
        Some(true)
    }

    /// Remove `room_id` from the connection's room set. Returns whether it was
    /// a member.
    pub fn remove_room(&mut self, conn_id: ConnId, room_id: &str) -> bool {
        let Some(conn) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if !conn.rooms.remove(room_id) {
            return false;
        }
        self.unindex(room_id, conn_id);
        true
    }

    fn unindex(&mut self, room_id: &str, conn_id: ConnId) {
        if let Some(members) = self.room_index.get_mut(room_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.room_index.remove(room_id);
            }
        }
    }

    pub fn get(&self, conn_id: ConnId) -> Option<&Connection> {
        self.connections.get(&conn_id)
    }

    /// Handles of every connection joined to `room_id`.
    pub fn connections_in_room(&self, room_id: &str) -> Vec<ConnectionHandle> {
        self.room_index
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| self.connections.get(id))
                    .map(|c| c.handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any live connection of `user_id` is joined to `room_id`.
    pub fn user_joined(&self, room_id: &str, user_id: &str) -> bool {
        self.room_index.get(room_id).is_some_and(|members| {
            members
                .iter()
                .filter_map(|id| self.connections.get(id))
                .any(|c| c.user_id == user_id)
        })
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
impl ConnectionRegistry {
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether the connection has joined `room_id`.
    pub fn is_member(&self, conn_id: ConnId, room_id: &str) -> bool {
        self.connections
            .get(&conn_id)
            .is_some_and(|c| c.rooms.contains(room_id))
    }

    /// Number of rooms with at least one member connection.
    pub fn room_count(&self) -> usize {
        self.room_index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: ConnId) -> ConnectionHandle {
        ConnectionHandle::new(id, 4).0
    }

    fn ids(handles: Vec<ConnectionHandle>) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = handles.iter().map(|h| h.id()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn register_and_join() {
        let mut reg = ConnectionRegistry::new();
        reg.register(handle(1), "alice".into());
        reg.register(handle(2), "bob".into());

        assert_eq!(reg.add_room(1, "r1"), Some(true));
        assert_eq!(reg.add_room(2, "r1"), Some(true));
        assert_eq!(reg.add_room(1, "r1"), Some(false));
        assert_eq!(ids(reg.connections_in_room("r1")), vec![1, 2]);
        assert!(reg.connections_in_room("r2").is_empty());
        assert_eq!(reg.get(1).map(|c| c.rooms.len()), Some(1));
    }

    #[test]
    fn add_room_unknown_connection() {
        let mut reg = ConnectionRegistry::new();
        assert_eq!(reg.add_room(9, "r1"), None);
        assert_eq!(reg.room_count(), 0);
    }

    #[test]
    fn remove_room_updates_index() {
        let mut reg = ConnectionRegistry::new();
        reg.register(handle(1), "alice".into());
        reg.add_room(1, "r1");

        assert!(reg.remove_room(1, "r1"));
        assert!(!reg.remove_room(1, "r1"));
        assert!(!reg.is_member(1, "r1"));
        assert_eq!(reg.room_count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut reg = ConnectionRegistry::new();
        reg.register(handle(1), "alice".into());
        reg.add_room(1, "a");
        reg.add_room(1, "b");

        let conn = reg.unregister(1).unwrap();
        assert_eq!(conn.rooms.len(), 2);
        assert!(reg.unregister(1).is_none());
        assert!(reg.connections_in_room("a").is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn user_joined_sees_other_connections() {
        let mut reg = ConnectionRegistry::new();
        reg.register(handle(1), "alice".into());
        reg.register(handle(2), "alice".into());
        reg.add_room(1, "r1");
        reg.add_room(2, "r1");

        reg.remove_room(1, "r1");
        assert!(reg.user_joined("r1", "alice"));
        reg.remove_room(2, "r1");
        assert!(!reg.user_joined("r1", "alice"));
    }
}
