//! Core server: accepts WebSocket connections and runs one session per
//! connection until the peer leaves or the server shuts down.

use crate::auth::{IdentityVerifier, JwtVerifier, RateLimiter};
use crate::config::ServerConfig;
use crate::relay::RelayState;
use crate::session::{SessionHandler, SessionSettings};
use crate::store::{EventStore, JsonlEventStore, MemoryEventStore, RoomResolver, StaticRoomResolver};
use crate::transport::websocket::{self, InboundFrame, WebSocketConnection, WebSocketListener};
use futures_util::StreamExt;
use roomrelay_core::{RelayError, RelayResult};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How often rate limiter state is collected and stats are logged.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
/// How long open sessions get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The room relay server instance.
pub struct RelayServer {
    config: ServerConfig,
    handler: Arc<SessionHandler>,
    /// Connection attempts per remote IP.
    rate_limiter: Arc<Mutex<RateLimiter>>,
    /// Flips to `true` once shutdown is requested.
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Create a server with the collaborators named by the config.
    pub fn new(config: ServerConfig) -> RelayResult<Self> {
        let verifier = Arc::new(JwtVerifier::new(config.jwt_secret.as_bytes()));

        let resolver = StaticRoomResolver::new(config.rooms.clone());
        if resolver.is_empty() {
            warn!("no room links configured, every join_room will fail");
        } else {
            info!(links = resolver.len(), "loaded room links");
        }

        let store: Arc<dyn EventStore> = match &config.event_log {
            Some(path) => {
                let store = JsonlEventStore::new(path.clone());
                info!(path = %store.path().display(), "persisting chat events");
                Arc::new(store)
            }
            None => {
                info!(capacity = config.memory_events, "no event log configured, keeping events in memory");
                Arc::new(MemoryEventStore::with_capacity(config.memory_events))
            }
        };

        Ok(Self::with_collaborators(config, verifier, Arc::new(resolver), store))
    }

    /// Create a server around explicit auth, lookup and persistence backends.
    pub fn with_collaborators(
        config: ServerConfig,
        verifier: Arc<dyn IdentityVerifier>,
        resolver: Arc<dyn RoomResolver>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let settings = SessionSettings {
            send_timeout: config.send_timeout,
            outbound_queue: config.outbound_queue,
        };
        let handler = Arc::new(SessionHandler::new(
            Arc::new(RelayState::new()),
            verifier,
            resolver,
            store,
            settings,
        ));
        let rate_limiter = RateLimiter::new(config.auth_attempts_per_minute, 60);

        Self {
            config,
            handler,
            rate_limiter: Arc::new(Mutex::new(rate_limiter)),
            shutdown_tx: watch::channel(false).0,
        }
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> RelayResult<WebSocketListener> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        websocket::start_listener(addr, self.config.max_frame_bytes).await
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` resolves, then
    /// close every session and wait (briefly) for them to finish.
    pub async fn serve<F>(self, listener: WebSocketListener, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        let server = Arc::new(self);
        let WebSocketListener {
            local_addr,
            mut incoming,
        } = listener;

        let maintenance = tokio::spawn(maintenance_loop(
            server.handler.clone(),
            server.rate_limiter.clone(),
        ));

        info!(addr = %local_addr, "roomrelay-server ready");

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                Some(ws_conn) = incoming.recv() => {
                    let srv = server.clone();
                    sessions.spawn(async move {
                        if let Err(e) = srv.handle_websocket(ws_conn).await {
                            warn!(error = %e, "WebSocket connection error");
                        }
                    });
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "session task panicked");
                        }
                    }
                }
            }
        }

        // Stop accepting, then ask every session to wind down.
        drop(incoming);
        maintenance.abort();
        info!(open = sessions.len(), "closing sessions");
        server.shutdown_tx.send_replace(true);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while sessions.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            warn!(remaining = sessions.len(), "sessions did not close in time, aborting");
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        let stats = server.handler.state().stats().await;
        info!(connections = stats.connections, rooms = stats.rooms, "server stopped");
        Ok(())
    }

    /// Run one WebSocket connection: authenticate, then pump frames until
    /// either side closes.
    async fn handle_websocket(&self, conn: WebSocketConnection) -> RelayResult<()> {
        let WebSocketConnection {
            mut ws_stream,
            remote_addr,
            token,
        } = conn;
        debug!(remote = %remote_addr, "handling WebSocket connection");

        let allowed = self
            .rate_limiter
            .lock()
            .await
            .check_and_record(remote_addr.ip());
        if !allowed {
            let _ = ws_stream.close(None).await;
            return Err(RelayError::Auth(format!(
                "too many connection attempts from {}",
                remote_addr.ip()
            )));
        }

        let (session, outbound) = match self.handler.connect(token.as_deref()).await {
            Ok(accepted) => accepted,
            Err(e) => {
                let _ = ws_stream.close(None).await;
                return Err(e);
            }
        };
        let conn_id = session.conn_id();
        info!(conn_id, remote = %remote_addr, user_id = %session.user_id(), "session started");

        let (sink, mut stream) = ws_stream.split();
        let mut writer = tokio::spawn(websocket::write_loop(sink, outbound));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    debug!(conn_id, "shutdown signal received");
                    break;
                }
                _ = session.handle().closed() => {
                    debug!(conn_id, "connection closed by server");
                    break;
                }
                frame = websocket::recv_frame(&mut stream, self.config.max_frame_bytes) => {
                    match frame {
                        Ok(Some(InboundFrame::Text(text))) => session.handle_text(&text).await,
                        Ok(Some(InboundFrame::Binary(data))) => session.handle_bytes(&data).await,
                        Ok(None) => {
                            debug!(conn_id, "WebSocket session ended (peer closed)");
                            break;
                        }
                        Err(e) => {
                            debug!(conn_id, error = %e, "WebSocket session ended");
                            break;
                        }
                    }
                }
            }
        }

        session.close().await;

        // The writer finishes once the queue is drained and every handle is
        // gone; a stalled peer is cut off.
        if tokio::time::timeout(self.config.send_timeout, &mut writer)
            .await
            .is_err()
        {
            debug!(conn_id, "writer did not drain in time, aborting");
            writer.abort();
        }
        Ok(())
    }
}

/// Resolves once the shutdown flag is set (or its sender is gone).
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn maintenance_loop(handler: Arc<SessionHandler>, rate_limiter: Arc<Mutex<RateLimiter>>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    loop {
        interval.tick().await;

        {
            let mut limiter = rate_limiter.lock().await;
            limiter.gc();
            debug!(tracked = limiter.tracked(), "rate limiter collected");
        }

        let stats = handler.state().stats().await;
        debug!(connections = stats.connections, rooms = stats.rooms, "relay stats");
    }
}
