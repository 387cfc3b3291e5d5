//! Send capability for one live connection.

use roomrelay_core::{ConnId, RelayError, RelayResult, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Notify};

/// Cloneable handle used to push messages to a connection's writer task and
/// to ask the connection to close.
///
/// The outbound queue is bounded; a send that cannot enqueue within its
/// timeout fails instead of stalling the caller.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    tx: mpsc::Sender<ServerMessage>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving end its writer task drains.
    pub fn new(id: ConnId, queue: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = Self {
            id,
            tx,
            close: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Enqueue `msg`, waiting at most `timeout` for queue space.
    pub async fn send(&self, msg: ServerMessage, timeout: Duration) -> RelayResult<()> {
        match self.tx.send_timeout(msg, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(RelayError::Timeout),
            Err(SendTimeoutError::Closed(_)) => {
                Err(RelayError::Delivery(format!("connection {} is closed", self.id)))
            }
        }
    }

    /// Ask the owning session to shut down. The request is remembered if
    /// nobody is waiting yet.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}
