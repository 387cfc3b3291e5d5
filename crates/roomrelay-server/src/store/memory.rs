//! In-process resolver and event store.

use super::{EventStore, RoomResolver, StoredEvent};
use futures_util::future::{BoxFuture, FutureExt};
use roomrelay_core::{RelayResult, RoomId};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Resolves links from a fixed table (the `[rooms]` config section).
#[derive(Debug, Clone, Default)]
pub struct StaticRoomResolver {
    links: HashMap<String, RoomId>,
}

impl StaticRoomResolver {
    pub fn new(links: HashMap<String, RoomId>) -> Self {
        Self { links }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl RoomResolver for StaticRoomResolver {
    fn resolve_room_id<'a>(&'a self, link: &'a str) -> BoxFuture<'a, RelayResult<Option<RoomId>>> {
        async move { Ok(self.links.get(link).cloned()) }.boxed()
    }
}

/// Default number of events kept by [`MemoryEventStore::new`].
const DEFAULT_CAPACITY: usize = 10_000;

/// Keeps the most recent events in memory. Used when no event log is
/// configured.
#[derive(Debug)]
pub struct MemoryEventStore {
    events: Mutex<VecDeque<StoredEvent>>,
    capacity: usize,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` events, dropping the oldest first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

}

#[cfg(test)]
impl MemoryEventStore {
    /// Copy of the retained events, oldest first.
    pub async fn events(&self) -> Vec<StoredEvent> {
        self.events.lock().await.iter().cloned().collect()
    }
}

impl EventStore for MemoryEventStore {
    fn persist_event<'a>(&'a self, room_id: &'a str, shape: &'a str) -> BoxFuture<'a, RelayResult<()>> {
        async move {
            let mut events = self.events.lock().await;
            if events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(StoredEvent::now(room_id, shape));
            Ok(())
        }
        .boxed()
    }
}
