//! Connection Manager
//!
//! Owns the single live link for one identity. `connect` opens the link,
//! performs the handshake, then hands the inbound half to a reader task that
//! decodes frames and dispatches them on the [`EventBus`] one at a time.
//! A liveness task republishes the connected flag on a fixed interval and
//! notices a writer that died without the reader seeing a close.
//!
//! There is no automatic reconnection. After a drop the caller decides
//! whether to call `connect` again.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use souk_protocol::frame::{decode_server, encode_client};
use souk_protocol::{ClientEvent, HandshakePayload, PeerId, ProtocolError, ServerEvent};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};
use uuid::Uuid;

use crate::bus::{Event, EventBus, EventKind, Subscription};
use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, HandlerError};
use crate::lock;
use crate::transport::{Connector, TransportLink};

/// Who we authenticate as.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: PeerId,
    pub token: String,
}

impl Identity {
    pub fn new(user_id: impl Into<PeerId>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct ActiveLink {
    connection_id: Uuid,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

struct Inner {
    state: ConnectionState,
    identity: Option<Identity>,
    link: Option<ActiveLink>,
}

thread_local! {
    /// Address of the `Shared` whose dispatch lock this thread holds.
    static DISPATCHING: Cell<usize> = const { Cell::new(0) };
}

/// Restores the thread's dispatch marker when a serialized section ends.
struct DispatchMarker(usize);

impl Drop for DispatchMarker {
    fn drop(&mut self) {
        DISPATCHING.with(|d| d.set(self.0));
    }
}

struct Shared {
    bus: EventBus,
    inner: Mutex<Inner>,
    connected_tx: watch::Sender<bool>,
    /// Held while anything is dispatched, so inbound frames, lifecycle
    /// events and teardown never interleave across threads.
    dispatch: Mutex<()>,
}

impl Shared {
    /// Run `f` holding the dispatch lock. Re-entrant on the thread that
    /// already holds it, so a handler may call `disconnect`.
    fn serialized<R>(&self, f: impl FnOnce() -> R) -> R {
        let me = self as *const Shared as usize;
        if DISPATCHING.with(Cell::get) == me {
            return f();
        }
        let _guard = lock(&self.dispatch);
        let _marker = DispatchMarker(DISPATCHING.with(|d| d.replace(me)));
        f()
    }

    fn is_active(&self, connection_id: Uuid) -> bool {
        lock(&self.inner).link.as_ref().map(|l| l.connection_id) == Some(connection_id)
    }

    /// Tear down the link identified by `connection_id`, if it is still the
    /// active one. Returns whether anything changed.
    fn mark_disconnected(&self, connection_id: Uuid) -> bool {
        self.serialized(|| {
            let link = {
                let mut inner = lock(&self.inner);
                if inner.link.as_ref().map(|l| l.connection_id) != Some(connection_id) {
                    return false;
                }
                inner.state = ConnectionState::Disconnected;
                inner.link.take()
            };
            if let Some(link) = link {
                link.cancel.cancel();
            }
            self.connected_tx.send_replace(false);
            info!(conn_id = %connection_id, "connection lost");
            self.bus.dispatch(&Event::Disconnected);
            true
        })
    }

    fn link_alive(&self, connection_id: Uuid) -> bool {
        lock(&self.inner)
            .link
            .as_ref()
            .is_some_and(|l| l.connection_id == connection_id && !l.outbound.is_closed())
    }

    /// Decode and dispatch one frame read from `connection_id`. Frames from a
    /// link that was torn down meanwhile are discarded.
    fn handle_frame(&self, connection_id: Uuid, text: &str) {
        self.serialized(|| {
            if !self.is_active(connection_id) {
                debug!("discarding frame from closed link");
                return;
            }
            match decode_server(text) {
                Ok(event) => {
                    trace!(event = event.name(), "inbound event");
                    self.bus.dispatch(&Event::Server(event));
                }
                Err(ProtocolError::UnknownEvent(name)) => {
                    debug!(event = %name, "ignoring unknown event");
                }
                Err(e) => {
                    warn!(code = e.error_code(), error = %e, "dropping inbound frame");
                }
            }
        })
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    /// Serializes connect attempts so a second caller waits for the first.
    connect_lock: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            connector,
            config,
            shared: Arc::new(Shared {
                bus: EventBus::new(),
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    identity: None,
                    link: None,
                }),
                connected_tx,
                dispatch: Mutex::new(()),
            }),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the connection and complete the handshake.
    ///
    /// A no-op when already connected as the same identity. Connecting as a
    /// different identity requires a `disconnect` first.
    pub async fn connect(&self, identity: &Identity) -> Result<(), ConnectionError> {
        let _serial = self.connect_lock.lock().await;

        {
            let mut inner = lock(&self.shared.inner);
            if inner.state == ConnectionState::Connected {
                return match &inner.identity {
                    Some(current) if current.user_id != identity.user_id => {
                        Err(ConnectionError::IdentityMismatch {
                            connected: current.user_id.clone(),
                            requested: identity.user_id.clone(),
                        })
                    }
                    _ => {
                        debug!(user = %identity.user_id, "already connected");
                        Ok(())
                    }
                };
            }
            inner.state = ConnectionState::Connecting;
            inner.identity = Some(identity.clone());
        }

        let (link, early) = match self.open_link(identity).await {
            Ok(opened) => opened,
            Err(e) => {
                let mut inner = lock(&self.shared.inner);
                inner.state = ConnectionState::Disconnected;
                inner.identity = None;
                warn!(user = %identity.user_id, code = e.error_code(), error = %e, "connect failed");
                return Err(e);
            }
        };

        let connection_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let TransportLink { outbound, inbound } = link;
        {
            let mut inner = lock(&self.shared.inner);
            if inner.state != ConnectionState::Connecting {
                // disconnect() was called while the handshake was in flight
                return Err(ConnectionError::ClosedDuringHandshake);
            }
            inner.state = ConnectionState::Connected;
            inner.link = Some(ActiveLink {
                connection_id,
                outbound,
                cancel: cancel.clone(),
            });
        }
        self.shared.connected_tx.send_replace(true);
        info!(conn_id = %connection_id, user = %identity.user_id, "connected");

        self.shared.serialized(|| {
            if !self.shared.is_active(connection_id) {
                return;
            }
            self.shared.bus.dispatch(&Event::Connected);
            for event in early {
                self.shared.bus.dispatch(&Event::Server(event));
            }
        });

        let span = info_span!("connection", conn_id = %connection_id);
        tokio::spawn(
            run_reader(self.shared.clone(), inbound, cancel.clone(), connection_id)
                .instrument(span.clone()),
        );
        tokio::spawn(
            run_liveness(
                self.shared.clone(),
                cancel,
                self.config.liveness_interval,
                connection_id,
            )
            .instrument(span),
        );
        Ok(())
    }

    /// Open a raw link and wait for the server to accept the handshake.
    /// Events that arrive ahead of the ack are returned for later dispatch.
    async fn open_link(
        &self,
        identity: &Identity,
    ) -> Result<(TransportLink, Vec<ServerEvent>), ConnectionError> {
        let mut link = self.connector.connect(self.config.inbound_buffer).await?;

        let handshake = ClientEvent::Handshake(HandshakePayload {
            token: identity.token.clone(),
            user_id: identity.user_id.clone(),
        });
        let frame =
            encode_client(&handshake).map_err(|e| ConnectionError::Transport(e.to_string()))?;
        link.outbound
            .send(frame)
            .map_err(|_| ConnectionError::ClosedDuringHandshake)?;

        let timeout = self.config.handshake_timeout;
        let early = tokio::time::timeout(timeout, await_handshake_ack(&mut link.inbound))
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout(timeout))??;
        Ok((link, early))
    }

    /// Close the link. Idempotent; `Disconnected` is dispatched only when a
    /// live link was actually torn down.
    ///
    /// Waits for an in-flight dispatch to finish; once this returns no
    /// further inbound event from the old link reaches a handler.
    pub fn disconnect(&self) {
        self.shared.serialized(|| {
            let link = {
                let mut inner = lock(&self.shared.inner);
                inner.state = ConnectionState::Disconnected;
                inner.identity = None;
                inner.link.take()
            };
            let Some(link) = link else {
                return;
            };
            link.cancel.cancel();
            self.shared.connected_tx.send_replace(false);
            info!(conn_id = %link.connection_id, "disconnected");
            self.shared.bus.dispatch(&Event::Disconnected);
        })
    }

    /// Queue an event for the server. Returns false (and logs) when there is
    /// no live connection; nothing is buffered for later.
    pub fn send(&self, event: ClientEvent) -> bool {
        let inner = lock(&self.shared.inner);
        let Some(link) = inner
            .link
            .as_ref()
            .filter(|_| inner.state == ConnectionState::Connected)
        else {
            warn!(event = event.name(), "not connected, dropping outbound event");
            return false;
        };

        let frame = match encode_client(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = event.name(), error = %e, "failed to encode outbound event");
                return false;
            }
        };
        if link.outbound.send(frame).is_err() {
            warn!(conn_id = %link.connection_id, event = event.name(), "outbound link closed");
            return false;
        }
        trace!(event = event.name(), "outbound event queued");
        true
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.inner).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch the connected flag. Republished on every liveness tick.
    pub fn connected_flag(&self) -> watch::Receiver<bool> {
        self.shared.connected_tx.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        lock(&self.shared.inner).identity.clone()
    }

    pub fn connection_id(&self) -> Option<Uuid> {
        lock(&self.shared.inner)
            .link
            .as_ref()
            .map(|l| l.connection_id)
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(kind, handler)
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(link) = lock(&self.shared.inner).link.take() {
            link.cancel.cancel();
        }
    }
}

async fn await_handshake_ack(
    inbound: &mut mpsc::Receiver<String>,
) -> Result<Vec<ServerEvent>, ConnectionError> {
    let mut early = Vec::new();
    while let Some(text) = inbound.recv().await {
        match decode_server(&text) {
            Ok(ServerEvent::HandshakeAck(ack)) => {
                debug!(user = %ack.user_id, "handshake acknowledged");
                return Ok(early);
            }
            Ok(ServerEvent::HandshakeError(rejection)) => {
                return Err(ConnectionError::HandshakeRejected(rejection.error));
            }
            Ok(event) => early.push(event),
            Err(ProtocolError::UnknownEvent(name)) => {
                debug!(event = %name, "ignoring unknown event during handshake");
            }
            Err(e) => warn!(error = %e, "dropping frame during handshake"),
        }
    }
    Err(ConnectionError::ClosedDuringHandshake)
}

async fn run_reader(
    shared: Arc<Shared>,
    mut inbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
    connection_id: Uuid,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("reader cancelled");
                return;
            }
            frame = inbound.recv() => match frame {
                Some(text) => shared.handle_frame(connection_id, &text),
                None => {
                    shared.mark_disconnected(connection_id);
                    return;
                }
            }
        }
    }
}

async fn run_liveness(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    interval: std::time::Duration,
    connection_id: Uuid,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if !shared.link_alive(connection_id) {
                    warn!("outbound link closed, marking connection lost");
                    shared.mark_disconnected(connection_id);
                    return;
                }
                shared.connected_tx.send_if_modified(|connected| {
                    let changed = !*connected;
                    *connected = true;
                    changed
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryPeer, MemoryServer, memory_transport};
    use souk_protocol::{PresenceStatus, UserStatusPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manager() -> (ConnectionManager, MemoryServer) {
        let (connector, server) = memory_transport();
        (
            ConnectionManager::new(Arc::new(connector), ConnectionConfig::default()),
            server,
        )
    }

    async fn connect(manager: &ConnectionManager, server: &mut MemoryServer, user: &str) -> MemoryPeer {
        let identity = Identity::new(user, "token");
        let (result, peer) = tokio::join!(manager.connect(&identity), async {
            let mut peer = server.accept().await.unwrap();
            peer.accept_handshake().await.unwrap();
            peer
        });
        result.unwrap();
        peer
    }

    fn count(manager: &ConnectionManager, kind: EventKind) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = manager.subscribe(kind, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (hits, sub)
    }

    #[test]
    fn identity_debug_redacts_token() {
        let identity = Identity::new("a", "secret-token");
        let debug = format!("{identity:?}");
        assert!(debug.contains("\"a\""));
        assert!(!debug.contains("secret-token"));
    }

    #[tokio::test]
    async fn test_connect_handshakes_and_dispatches_connected() {
        let (manager, mut server) = manager();
        let (connected, _sub) = count(&manager, EventKind::Connected);

        let _peer = connect(&manager, &mut server, "a").await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(*manager.connected_flag().borrow());
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert!(manager.connection_id().is_some());
    }

    #[tokio::test]
    async fn test_connect_twice_is_a_no_op() {
        let (manager, mut server) = manager();
        let (connected, _sub) = count(&manager, EventKind::Connected);
        let _peer = connect(&manager, &mut server, "a").await;
        let first_id = manager.connection_id();

        manager.connect(&Identity::new("a", "token")).await.unwrap();
        assert!(server.try_accept().is_none());
        assert_eq!(manager.connection_id(), first_id);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_as_other_identity_is_refused() {
        let (manager, mut server) = manager();
        let _peer = connect(&manager, &mut server, "a").await;
        let err = manager.connect(&Identity::new("b", "token")).await.unwrap_err();
        assert_eq!(err.error_code(), "identity_mismatch");
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_handshake_rejection() {
        let (manager, mut server) = manager();
        let identity = Identity::new("a", "bad");
        let (result, _peer) = tokio::join!(manager.connect(&identity), async {
            let mut peer = server.accept().await.unwrap();
            peer.reject_handshake("invalid token").await.unwrap();
            peer
        });
        assert_eq!(
            result.unwrap_err(),
            ConnectionError::HandshakeRejected("invalid token".into())
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.identity().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (manager, mut server) = manager();
        let silent = tokio::spawn(async move {
            let peer = server.accept().await.unwrap();
            std::future::pending::<()>().await;
            drop(peer);
        });

        let err = manager.connect(&Identity::new("a", "t")).await.unwrap_err();
        assert_eq!(err, ConnectionError::HandshakeTimeout(Duration::from_secs(10)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        silent.abort();
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_disconnected() {
        let (connector, _server) = memory_transport();
        connector.refuse_connections(Some("offline"));
        let manager = ConnectionManager::new(Arc::new(connector), ConnectionConfig::default());
        let err = manager.connect(&Identity::new("a", "t")).await.unwrap_err();
        assert_eq!(err.error_code(), "transport_error");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_events_before_ack_are_delivered_after_connected() {
        let (manager, mut server) = manager();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        let _c = manager.subscribe(EventKind::Connected, move |_| {
            lock(&o).push("connected");
            Ok(())
        });
        let o = order.clone();
        let _s = manager.subscribe(EventKind::UserStatus, move |_| {
            lock(&o).push("status");
            Ok(())
        });

        let identity = Identity::new("a", "t");
        let (result, _peer) = tokio::join!(manager.connect(&identity), async {
            let mut peer = server.accept().await.unwrap();
            peer.recv_event().await.unwrap();
            peer.push(ServerEvent::UserStatus(UserStatusPayload {
                user_id: PeerId::from("c"),
                status: PresenceStatus::Online,
            }))
            .await;
            peer.push(ServerEvent::HandshakeAck(souk_protocol::HandshakeAckPayload {
                user_id: PeerId::from("a"),
            }))
            .await;
            peer
        });
        result.unwrap();
        assert_eq!(*lock(&order), vec!["connected", "status"]);
    }

    #[tokio::test]
    async fn test_server_close_dispatches_disconnected() {
        let (manager, mut server) = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = manager.subscribe(EventKind::Disconnected, move |_| {
            let _ = tx.send(());
            Ok(())
        });

        let mut peer = connect(&manager, &mut server, "a").await;
        peer.close();
        rx.recv().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!*manager.connected_flag().borrow());
        assert!(!manager.send(ClientEvent::TypingStop(souk_protocol::TypingPayload {
            user_id: PeerId::from("a"),
            receiver_id: PeerId::from("b"),
        })));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (manager, mut server) = manager();
        let (disconnected, _sub) = count(&manager, EventKind::Disconnected);
        let _peer = connect(&manager, &mut server, "a").await;

        manager.disconnect();
        manager.disconnect();
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    fn online(user: &str) -> ServerEvent {
        ServerEvent::UserStatus(UserStatusPayload {
            user_id: PeerId::from(user),
            status: PresenceStatus::Online,
        })
    }

    #[tokio::test]
    async fn test_buffered_frames_are_not_dispatched_after_disconnect() {
        let (manager, mut server) = manager();
        let (statuses, _sub) = count(&manager, EventKind::UserStatus);
        let peer = connect(&manager, &mut server, "a").await;

        for i in 0..20 {
            assert!(peer.push(online(&format!("u{i}"))).await);
        }
        manager.disconnect();
        let seen = statuses.load(Ordering::SeqCst);

        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(statuses.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_waits_for_in_flight_dispatch() {
        let (manager, mut server) = manager();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        let _s = manager.subscribe(EventKind::UserStatus, move |_| {
            std::thread::sleep(Duration::from_millis(1));
            lock(&o).push("status");
            Ok(())
        });
        let o = order.clone();
        let _d = manager.subscribe(EventKind::Disconnected, move |_| {
            lock(&o).push("disconnected");
            Ok(())
        });
        let peer = connect(&manager, &mut server, "a").await;

        for i in 0..20 {
            peer.push(online(&format!("u{i}"))).await;
        }
        tokio::task::yield_now().await;
        manager.disconnect();
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let order = lock(&order);
        assert_eq!(order.last(), Some(&"disconnected"));
        assert_eq!(order.iter().filter(|e| **e == "disconnected").count(), 1);
    }

    #[tokio::test]
    async fn test_handler_may_disconnect_during_dispatch() {
        let (connector, mut server) = memory_transport();
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(connector),
            ConnectionConfig::default(),
        ));
        let (disconnected, _d) = count(&manager, EventKind::Disconnected);
        let weak = Arc::downgrade(&manager);
        let _s = manager.subscribe(EventKind::UserStatus, move |_| {
            if let Some(manager) = weak.upgrade() {
                manager.disconnect();
            }
            Ok(())
        });
        let peer = connect(&manager, &mut server, "a").await;

        peer.push(online("c")).await;
        peer.push(online("d")).await;
        let mut flag = manager.connected_flag();
        tokio::time::timeout(Duration::from_secs(5), flag.wait_for(|c| !*c))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_detects_dead_writer() {
        let (manager, mut server) = manager();
        let (disconnected, _sub) = count(&manager, EventKind::Disconnected);
        let mut peer = connect(&manager, &mut server, "a").await;
        let flag = manager.connected_flag();

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(manager.is_connected());
        assert!(*flag.borrow());

        // The server stops reading but never closes its sending half, so
        // the reader sees nothing.
        peer.stop_reading();
        tokio::time::sleep(Duration::from_secs(5) + Duration::from_millis(10)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!*flag.borrow());
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect_uses_new_link() {
        let (manager, mut server) = manager();
        let _first = connect(&manager, &mut server, "a").await;
        let first_id = manager.connection_id();
        manager.disconnect();

        let _second = connect(&manager, &mut server, "b").await;
        assert_ne!(manager.connection_id(), first_id);
        assert_eq!(manager.identity().unwrap().user_id, PeerId::from("b"));
    }

    #[tokio::test]
    async fn test_send_reaches_server() {
        let (manager, mut server) = manager();
        let mut peer = connect(&manager, &mut server, "a").await;
        let event = ClientEvent::TypingStart(souk_protocol::TypingPayload {
            user_id: PeerId::from("a"),
            receiver_id: PeerId::from("b"),
        });
        assert!(manager.send(event.clone()));
        assert_eq!(peer.recv_event().await, Some(event));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_are_dropped() {
        let (manager, mut server) = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = manager.subscribe(EventKind::UserStatus, move |event| {
            let _ = tx.send(event.clone());
            Ok(())
        });
        let peer = connect(&manager, &mut server, "a").await;

        peer.push_raw("not json").await;
        peer.push_raw(r#"{"event":"user_status","data":{"status":"online"}}"#).await;
        peer.push_raw(r#"{"event":"mystery","data":{}}"#).await;
        peer.push(ServerEvent::UserStatus(UserStatusPayload {
            user_id: PeerId::from("c"),
            status: PresenceStatus::Offline,
        }))
        .await;

        let Event::Server(ServerEvent::UserStatus(status)) = rx.recv().await.unwrap() else {
            panic!("expected a user_status event");
        };
        assert_eq!(status.user_id, PeerId::from("c"));
        assert!(manager.is_connected());
    }
}
