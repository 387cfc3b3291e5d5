//! Session protocol state machine.
//!
//! A connection is unauthenticated until [`SessionHandler::connect`]
//! verifies its token; from then on each inbound message is dispatched to
//! one handler per message type. External calls (verify, resolve, persist)
//! are awaited without holding the membership lock. Teardown releases every
//! joined room and refreshes each room's visitor count, exactly once.

use crate::auth::IdentityVerifier;
use crate::relay::{ConnectionHandle, RelayState, RoomBroadcaster};
use crate::store::{EventStore, RoomResolver};
use roomrelay_core::{
    codec, ClientMessage, ConnId, RelayError, RelayResult, RoomId, ServerMessage, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Sent once the connection is authenticated.
pub const CONNECTED: &str = "You are connected to the websocket server.";
const ROOM_NOT_FOUND: &str = "Cannot find the room corresponding to this link";
const ROOM_LOOKUP_FAILED: &str = "Error in fetching the rooms.";
const LEFT_ROOM: &str = "Successfully Left the room.";
const NOT_IN_ROOM: &str = "you are not in this room";
const CHAT_MISSING_FIELDS: &str = "No shapes or roomId sent.";
const CHAT_NOT_SAVED: &str = "Could not save the message in the db.";
const MALFORMED: &str = "Incorrect message format.";

/// Per-connection delivery limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// How long a send may wait for space in a recipient's queue.
    pub send_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            outbound_queue: 64,
        }
    }
}

/// Interprets client messages against the shared relay state.
pub struct SessionHandler {
    state: Arc<RelayState>,
    broadcaster: RoomBroadcaster,
    verifier: Arc<dyn IdentityVerifier>,
    resolver: Arc<dyn RoomResolver>,
    store: Arc<dyn EventStore>,
    settings: SessionSettings,
}

impl SessionHandler {
    pub fn new(
        state: Arc<RelayState>,
        verifier: Arc<dyn IdentityVerifier>,
        resolver: Arc<dyn RoomResolver>,
        store: Arc<dyn EventStore>,
        settings: SessionSettings,
    ) -> Self {
        let broadcaster = RoomBroadcaster::new(state.clone(), settings.send_timeout);
        Self {
            state,
            broadcaster,
            verifier,
            resolver,
            store,
            settings,
        }
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Authenticate a new connection and register it with no rooms.
    ///
    /// Returns the session and the outbound queue its writer must drain. On
    /// failure nothing is registered and the caller closes the transport.
    pub async fn connect(
        self: &Arc<Self>,
        token: Option<&str>,
    ) -> RelayResult<(Session, mpsc::Receiver<ServerMessage>)> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelayError::Auth("missing token".into()))?;
        let user_id = self.verifier.verify(token).await?;

        let conn_id = self.state.next_conn_id();
        let (handle, outbound) = ConnectionHandle::new(conn_id, self.settings.outbound_queue);
        let session = Session {
            handler: self.clone(),
            handle: handle.clone(),
            user_id: user_id.clone(),
            torn_down: false,
        };
        self.state.register(handle, user_id.clone()).await;
        info!(conn_id, user_id = %user_id, "connection authenticated");

        self.reply(&session, ServerMessage::notice(CONNECTED)).await;
        Ok((session, outbound))
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&self, session: &Session, text: &str) {
        match codec::decode_client(text) {
            Ok(msg) => self.dispatch(session, msg).await,
            Err(e) => self.reject_malformed(session, e).await,
        }
    }

    /// Decode and handle one binary frame.
    pub async fn handle_bytes(&self, session: &Session, data: &[u8]) {
        match codec::decode_client_bytes(data) {
            Ok(msg) => self.dispatch(session, msg).await,
            Err(e) => self.reject_malformed(session, e).await,
        }
    }

    pub async fn dispatch(&self, session: &Session, msg: ClientMessage) {
        match msg {
            ClientMessage::JoinRoom { link } => self.join_room(session, link).await,
            ClientMessage::LeaveRoom { room_id } => self.leave_room(session, room_id).await,
            ClientMessage::Chat { room_id, shape } => self.chat(session, room_id, shape).await,
        }
    }

    async fn reject_malformed(&self, session: &Session, err: RelayError) {
        debug!(conn_id = session.conn_id(), error = %err, "malformed message");
        let detail = match err {
            RelayError::InvalidMessage(detail) => detail,
            other => other.to_string(),
        };
        self.reply(session, ServerMessage::notice(format!("{MALFORMED} {detail}")))
            .await;
    }

    /// Refuse a request with a Failed ack carrying `message`.
    async fn reject(&self, session: &Session, err: RelayError, message: &str) {
        debug!(conn_id = session.conn_id(), error = %err, "request refused");
        self.reply(session, ServerMessage::failed(message)).await;
    }

    async fn join_room(&self, session: &Session, link: Option<String>) {
        let conn_id = session.conn_id();
        let Some(link) = link.filter(|l| !l.is_empty()) else {
            let err = RelayError::NotFound("join_room without a link".into());
            self.reject(session, err, ROOM_NOT_FOUND).await;
            return;
        };

        let room_id = match self.resolver.resolve_room_id(&link).await {
            Ok(Some(room_id)) => room_id,
            Ok(None) => {
                let err = RelayError::NotFound(format!("no room behind link {link}"));
                self.reject(session, err, ROOM_NOT_FOUND).await;
                return;
            }
            Err(e) => {
                warn!(conn_id, link = %link, error = %e, "room lookup failed");
                self.reply(session, ServerMessage::failed(ROOM_LOOKUP_FAILED))
                    .await;
                return;
            }
        };

        // The connection may have been torn down while the lookup was in flight.
        let Some(outcome) = self.state.join(conn_id, &room_id).await else {
            debug!(conn_id, room_id = %room_id, "connection gone before join completed");
            return;
        };
        info!(
            conn_id,
            user_id = %session.user_id(),
            room_id = %room_id,
            visitors = outcome.visitors,
            newly_joined = outcome.newly_joined,
            "joined room"
        );

        self.reply(
            session,
            ServerMessage::success(format!("Joined the room: {room_id}")),
        )
        .await;
        self.broadcaster.broadcast_visitor_count(&room_id).await;
    }

    async fn leave_room(&self, session: &Session, room_id: Option<RoomId>) {
        let conn_id = session.conn_id();
        let left = match room_id.filter(|r| !r.is_empty()) {
            Some(room_id) => self
                .state
                .leave(conn_id, &room_id)
                .await
                .map(|visitors| (room_id, visitors)),
            None => None,
        };

        let Some((room_id, visitors)) = left else {
            let err = RelayError::NotFound("connection is not in the requested room".into());
            self.reject(session, err, NOT_IN_ROOM).await;
            return;
        };
        info!(conn_id, user_id = %session.user_id(), room_id = %room_id, visitors, "left room");

        self.reply(session, ServerMessage::success(LEFT_ROOM)).await;
        self.broadcaster.broadcast_visitor_count(&room_id).await;
    }

    async fn chat(&self, session: &Session, room_id: Option<RoomId>, shape: Option<String>) {
        let conn_id = session.conn_id();
        let (Some(room_id), Some(shape)) = (
            room_id.filter(|r| !r.is_empty()),
            shape.filter(|s| !s.is_empty()),
        ) else {
            self.reply(session, ServerMessage::failed(CHAT_MISSING_FIELDS))
                .await;
            return;
        };

        // Live delivery does not depend on the event being stored.
        if let Err(e) = self.store.persist_event(&room_id, &shape).await {
            warn!(conn_id, room_id = %room_id, error = %e, "could not persist chat event");
            self.reply(session, ServerMessage::failed(CHAT_NOT_SAVED)).await;
        }

        let report = self
            .broadcaster
            .broadcast(&room_id, &ServerMessage::chat(shape))
            .await;
        debug!(
            conn_id,
            room_id = %room_id,
            delivered = report.delivered,
            failed = report.failed,
            "chat relayed"
        );
    }

    /// Send a direct reply. A connection that cannot take its own replies is
    /// closed.
    async fn reply(&self, session: &Session, msg: ServerMessage) {
        if let Err(e) = session.handle.send(msg, self.settings.send_timeout).await {
            warn!(conn_id = session.conn_id(), error = %e, "reply failed, closing connection");
            session.handle.close();
        }
    }

    /// Unregister the connection, release its rooms and refresh their visitor
    /// counts. Returns false if the connection was already torn down.
    pub async fn teardown(&self, conn_id: ConnId) -> bool {
        let Some(departure) = self.state.unregister(conn_id).await else {
            return false;
        };
        for room_id in &departure.rooms {
            self.broadcaster.broadcast_visitor_count(room_id).await;
        }
        info!(
            conn_id,
            user_id = %departure.user_id,
            rooms = departure.rooms.len(),
            connected_secs = departure.connected_at.elapsed().as_secs(),
            "connection closed"
        );
        true
    }
}

/// One authenticated connection.
///
/// Dropping a session without calling [`Session::close`] (for example when
/// its task is cancelled) still schedules teardown on the runtime. Outside a
/// runtime teardown is skipped with a warning; that only happens while the
/// process is exiting and is not a supported way to end a session.
pub struct Session {
    handler: Arc<SessionHandler>,
    handle: ConnectionHandle,
    user_id: UserId,
    torn_down: bool,
}

impl Session {
    pub fn conn_id(&self) -> ConnId {
        self.handle.id()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub async fn handle_text(&self, text: &str) {
        self.handler.handle_text(self, text).await;
    }

    pub async fn handle_bytes(&self, data: &[u8]) {
        self.handler.handle_bytes(self, data).await;
    }

    /// Tear the session down and wait for it to finish.
    ///
    /// Teardown runs on its own task so that cancelling this call cannot
    /// leave the rooms half released.
    pub async fn close(mut self) {
        self.torn_down = true;
        let handler = self.handler.clone();
        let conn_id = self.conn_id();
        if let Err(e) = tokio::spawn(async move { handler.teardown(conn_id).await }).await {
            error!(conn_id, error = %e, "teardown task failed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        let handler = self.handler.clone();
        let conn_id = self.conn_id();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    handler.teardown(conn_id).await;
                });
            }
            // Only reachable once the runtime is gone at process exit.
            Err(_) => warn!(conn_id, "no runtime available, connection state not released"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryEventStore, StaticRoomResolver};
    use futures_util::future::{BoxFuture, FutureExt};
    use roomrelay_core::AckStatus;
    use std::collections::HashMap;

    /// Accepts `token-<user>` for any user.
    struct PrefixVerifier;

    impl IdentityVerifier for PrefixVerifier {
        fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, RelayResult<UserId>> {
            async move {
                token
                    .strip_prefix("token-")
                    .map(str::to_string)
                    .ok_or_else(|| RelayError::Auth("bad token".into()))
            }
            .boxed()
        }
    }

    struct FailingStore;

    impl EventStore for FailingStore {
        fn persist_event<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, RelayResult<()>> {
            async { Err(RelayError::Persistence("database unavailable".into())) }.boxed()
        }
    }

    struct FailingResolver;

    impl RoomResolver for FailingResolver {
        fn resolve_room_id<'a>(&'a self, _: &'a str) -> BoxFuture<'a, RelayResult<Option<RoomId>>> {
            async { Err(RelayError::Other("connection refused".into())) }.boxed()
        }
    }

    fn resolver() -> Arc<dyn RoomResolver> {
        Arc::new(StaticRoomResolver::new(HashMap::from([
            ("abc".to_string(), "r1".to_string()),
            ("def".to_string(), "r2".to_string()),
        ])))
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            send_timeout: Duration::from_millis(50),
            outbound_queue: 16,
        }
    }

    fn build(
        resolver: Arc<dyn RoomResolver>,
        store: Arc<dyn EventStore>,
        settings: SessionSettings,
    ) -> Arc<SessionHandler> {
        Arc::new(SessionHandler::new(
            Arc::new(RelayState::new()),
            Arc::new(PrefixVerifier),
            resolver,
            store,
            settings,
        ))
    }

    fn handler() -> Arc<SessionHandler> {
        build(resolver(), Arc::new(MemoryEventStore::new()), settings())
    }

    async fn connect(
        handler: &Arc<SessionHandler>,
        user: &str,
    ) -> (Session, mpsc::Receiver<ServerMessage>) {
        let token = format!("token-{user}");
        let (session, mut rx) = handler.connect(Some(&token)).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::notice(CONNECTED));
        (session, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn rejects_missing_or_invalid_token() {
        let h = handler();
        assert!(matches!(h.connect(None).await, Err(RelayError::Auth(_))));
        assert!(matches!(h.connect(Some("")).await, Err(RelayError::Auth(_))));
        assert!(matches!(h.connect(Some("garbage")).await, Err(RelayError::Auth(_))));
        assert_eq!(h.state().stats().await.connections, 0);
    }

    #[tokio::test]
    async fn drawing_room_scenario() {
        let h = handler();
        let (a, mut a_rx) = connect(&h, "alice").await;
        let (b, mut b_rx) = connect(&h, "bob").await;

        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerMessage::success("Joined the room: r1"),
                ServerMessage::visitor_count(1),
            ]
        );

        b.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        assert_eq!(drain(&mut a_rx), vec![ServerMessage::visitor_count(2)]);
        assert_eq!(
            drain(&mut b_rx),
            vec![
                ServerMessage::success("Joined the room: r1"),
                ServerMessage::visitor_count(2),
            ]
        );

        a.handle_text(r#"{"type":"chat","roomId":"r1","shape":"circle:10,10"}"#)
            .await;
        assert_eq!(drain(&mut a_rx), vec![ServerMessage::chat("circle:10,10")]);
        assert_eq!(drain(&mut b_rx), vec![ServerMessage::chat("circle:10,10")]);

        b.close().await;
        assert_eq!(drain(&mut a_rx), vec![ServerMessage::visitor_count(1)]);
    }

    #[tokio::test]
    async fn duplicate_join_rebroadcasts_count() {
        let h = handler();
        let (a, mut a_rx) = connect(&h, "alice").await;

        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerMessage::success("Joined the room: r1"),
                ServerMessage::visitor_count(1),
                ServerMessage::success("Joined the room: r1"),
                ServerMessage::visitor_count(1),
            ]
        );
        assert_eq!(h.state().connections_in_room("r1").await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_link_fails_without_state_change() {
        let h = handler();
        let (a, mut a_rx) = connect(&h, "alice").await;

        a.handle_text(r#"{"type":"join_room","link":"missing"}"#).await;
        a.handle_text(r#"{"type":"join_room"}"#).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerMessage::failed(ROOM_NOT_FOUND),
                ServerMessage::failed(ROOM_NOT_FOUND),
            ]
        );
        assert_eq!(h.state().stats().await.rooms, 0);
    }

    #[tokio::test]
    async fn resolver_error_is_reported() {
        let h = build(
            Arc::new(FailingResolver),
            Arc::new(MemoryEventStore::new()),
            settings(),
        );
        let (a, mut a_rx) = connect(&h, "alice").await;

        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerMessage::failed(ROOM_LOOKUP_FAILED)]
        );
    }

    #[tokio::test]
    async fn leaving_unjoined_room_is_silent_for_others() {
        let h = handler();
        let (a, mut a_rx) = connect(&h, "alice").await;
        let (b, mut b_rx) = connect(&h, "bob").await;
        b.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        drain(&mut b_rx);

        a.handle_text(r#"{"type":"leave_room","roomId":"r1"}"#).await;
        a.handle_text(r#"{"type":"leave_room"}"#).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerMessage::failed(NOT_IN_ROOM),
                ServerMessage::failed(NOT_IN_ROOM),
            ]
        );
        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(h.state().visitor_count("r1").await, 1);
    }

    #[tokio::test]
    async fn leave_refreshes_remaining_members() {
        let h = handler();
        let (a, mut a_rx) = connect(&h, "alice").await;
        let (b, mut b_rx) = connect(&h, "bob").await;
        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        b.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        a.handle_text(r#"{"type":"leave_room","roomId":"r1"}"#).await;
        assert_eq!(drain(&mut a_rx), vec![ServerMessage::success(LEFT_ROOM)]);
        assert_eq!(drain(&mut b_rx), vec![ServerMessage::visitor_count(1)]);
        assert!(!h.state().is_member(a.conn_id(), "r1").await);
    }

    #[tokio::test]
    async fn chat_missing_fields_is_rejected() {
        let store = Arc::new(MemoryEventStore::new());
        let h = build(resolver(), store.clone(), settings());
        let (a, mut a_rx) = connect(&h, "alice").await;
        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        drain(&mut a_rx);

        a.handle_text(r#"{"type":"chat","roomId":"r1"}"#).await;
        a.handle_text(r#"{"type":"chat","shape":"circle:1,1"}"#).await;
        a.handle_text(r#"{"type":"chat","roomId":"r1","shape":""}"#).await;
        let replies = drain(&mut a_rx);
        assert_eq!(replies.len(), 3);
        assert!(replies
            .iter()
            .all(|m| *m == ServerMessage::failed(CHAT_MISSING_FIELDS)));
        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn chat_is_persisted() {
        let store = Arc::new(MemoryEventStore::new());
        let h = build(resolver(), store.clone(), settings());
        let (a, mut a_rx) = connect(&h, "alice").await;
        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        drain(&mut a_rx);

        a.handle_text(r#"{"type":"chat","roomId":"r1","shape":"rect:0,0,4,4"}"#)
            .await;
        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].room_id, "r1");
        assert_eq!(events[0].shape, "rect:0,0,4,4");
    }

    #[tokio::test]
    async fn chat_is_delivered_when_persistence_fails() {
        let h = build(resolver(), Arc::new(FailingStore), settings());
        let (a, mut a_rx) = connect(&h, "alice").await;
        let (b, mut b_rx) = connect(&h, "bob").await;
        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        b.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        a.handle_text(r#"{"type":"chat","roomId":"r1","shape":"circle:10,10"}"#)
            .await;
        let a_msgs = drain(&mut a_rx);
        assert_eq!(a_msgs[0].status(), Some(AckStatus::Failed));
        assert_eq!(a_msgs[1], ServerMessage::chat("circle:10,10"));
        assert_eq!(drain(&mut b_rx), vec![ServerMessage::chat("circle:10,10")]);
    }

    #[tokio::test]
    async fn malformed_message_keeps_connection_usable() {
        let h = handler();
        let (a, mut a_rx) = connect(&h, "alice").await;

        a.handle_text("{not json").await;
        a.handle_text(r#"{"type":"dance"}"#).await;
        a.handle_bytes(&[0xff, 0x00]).await;
        let replies = drain(&mut a_rx);
        assert_eq!(replies.len(), 3);
        for reply in &replies {
            match reply {
                ServerMessage::Notice(n) => assert!(n.message.starts_with(MALFORMED)),
                other => panic!("expected notice, got {other:?}"),
            }
        }

        a.handle_bytes(br#"{"type":"join_room","link":"abc"}"#).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerMessage::success("Joined the room: r1"),
                ServerMessage::visitor_count(1),
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_releases_every_room_once() {
        let h = handler();
        let (a, mut a_rx) = connect(&h, "alice").await;
        let (b, mut b_rx) = connect(&h, "bob").await;
        let (c, mut c_rx) = connect(&h, "carol").await;
        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        a.handle_text(r#"{"type":"join_room","link":"def"}"#).await;
        b.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        c.handle_text(r#"{"type":"join_room","link":"def"}"#).await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        let a_id = a.conn_id();
        a.close().await;
        assert_eq!(drain(&mut b_rx), vec![ServerMessage::visitor_count(1)]);
        assert_eq!(drain(&mut c_rx), vec![ServerMessage::visitor_count(1)]);

        // no further traffic reaches the closed connection
        b.handle_text(r#"{"type":"chat","roomId":"r1","shape":"dot"}"#).await;
        assert!(drain(&mut a_rx).is_empty());

        assert!(!h.teardown(a_id).await);
        assert!(drain(&mut b_rx).iter().all(|m| *m == ServerMessage::chat("dot")));
        assert!(drain(&mut c_rx).is_empty());
    }

    #[tokio::test]
    async fn same_user_counted_once_until_last_connection_leaves() {
        let h = handler();
        let (a1, mut a1_rx) = connect(&h, "alice").await;
        let (a2, mut a2_rx) = connect(&h, "alice").await;
        a1.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        a2.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        assert_eq!(drain(&mut a2_rx).last(), Some(&ServerMessage::visitor_count(1)));
        drain(&mut a1_rx);

        a1.close().await;
        assert_eq!(drain(&mut a2_rx), vec![ServerMessage::visitor_count(1)]);
        assert_eq!(h.state().visitor_count("r1").await, 1);

        a2.close().await;
        assert_eq!(h.state().visitor_count("r1").await, 0);
    }

    #[tokio::test]
    async fn dropped_session_is_torn_down() {
        let h = handler();
        let (a, _a_rx) = connect(&h, "alice").await;
        let (b, mut b_rx) = connect(&h, "bob").await;
        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        b.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        drain(&mut b_rx);

        let a_id = a.conn_id();
        drop(a);
        for _ in 0..50 {
            if !h.state().is_registered(a_id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!h.state().is_registered(a_id).await);

        let msg = tokio::time::timeout(Duration::from_millis(200), b_rx.recv())
            .await
            .unwrap();
        assert_eq!(msg, Some(ServerMessage::visitor_count(1)));
    }

    #[tokio::test]
    async fn slow_member_is_evicted_and_counts_recover() {
        let h = build(
            resolver(),
            Arc::new(MemoryEventStore::new()),
            SessionSettings {
                send_timeout: Duration::from_millis(20),
                outbound_queue: 2,
            },
        );
        // bob never drains: the connect notice and join ack fill his queue
        let (bob, _bob_rx) = h.connect(Some("token-bob")).await.unwrap();
        bob.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        tokio::time::timeout(Duration::from_millis(200), bob.handle().closed())
            .await
            .expect("slow member was not closed");
        bob.close().await;

        let (a, mut a_rx) = connect(&h, "alice").await;
        a.handle_text(r#"{"type":"join_room","link":"abc"}"#).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerMessage::success("Joined the room: r1"),
                ServerMessage::visitor_count(1),
            ]
        );
    }
}
