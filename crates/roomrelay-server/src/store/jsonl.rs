//! Append-only event log.
//!
//! Each event is written as one line of JSON. Writes are serialized so
//! concurrent sessions never interleave partial lines.

use super::{EventStore, StoredEvent};
use futures_util::future::{BoxFuture, FutureExt};
use roomrelay_core::{RelayError, RelayResult};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Event store writing newline-delimited JSON to a file.
pub struct JsonlEventStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventStore {
    /// Create a store appending to `path`. Parent directories are created on
    /// first write.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Get the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append_line(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

impl EventStore for JsonlEventStore {
    fn persist_event<'a>(&'a self, room_id: &'a str, shape: &'a str) -> BoxFuture<'a, RelayResult<()>> {
        async move {
            let mut line = serde_json::to_string(&StoredEvent::now(room_id, shape))?;
            line.push('\n');
            self.append_line(&line).await.map_err(|e| {
                error!(path = %self.path.display(), error = %e, "failed to append event");
                RelayError::Persistence(e.to_string())
            })?;
            debug!(room_id, "event persisted");
            Ok(())
        }
        .boxed()
    }
}
