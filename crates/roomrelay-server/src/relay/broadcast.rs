//! Room fan-out.
//!
//! Recipients are snapshotted from the registry, the lock is released, and
//! each recipient is then sent to concurrently with its own timeout. A
//! failed recipient is closed (its session tears itself down) and does not
//! affect the others.

use super::state::RelayState;
use futures_util::future::join_all;
use roomrelay_core::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivery counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers room-scoped messages to every member connection.
#[derive(Debug, Clone)]
pub struct RoomBroadcaster {
    state: Arc<RelayState>,
    send_timeout: Duration,
}

impl RoomBroadcaster {
    pub fn new(state: Arc<RelayState>, send_timeout: Duration) -> Self {
        Self {
            state,
            send_timeout,
        }
    }

    /// Send `msg` to every connection joined to `room_id` at call time.
    pub async fn broadcast(&self, room_id: &str, msg: &ServerMessage) -> BroadcastReport {
        let recipients = self.state.connections_in_room(room_id).await;
        let timeout = self.send_timeout;

        let results = join_all(recipients.iter().map(|conn| {
            let msg = msg.clone();
            async move { (conn, conn.send(msg, timeout).await) }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (conn, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(conn_id = conn.id(), room_id, error = %e, "delivery failed, closing recipient");
                    conn.close();
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Broadcast the room's current visitor count to its members.
    pub async fn broadcast_visitor_count(&self, room_id: &str) -> BroadcastReport {
        let visitors = self.state.visitor_count(room_id).await;
        let report = self
            .broadcast(room_id, &ServerMessage::visitor_count(visitors))
            .await;
        debug!(
            room_id,
            visitors,
            delivered = report.delivered,
            "updated visitor count"
        );
        report
    }
}
