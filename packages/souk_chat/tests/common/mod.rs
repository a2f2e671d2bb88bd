//! Shared fixtures: an in-memory server peer, a scripted REST collaborator,
//! and a probe that waits for events to finish dispatching.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use souk_chat::protocol::{
    ChatHistory, ChatId, ConversationSummary, Message, Notification, NotificationId,
    NotificationKind, PeerId, ServerEvent, ServerMessageId, UnreadNotifications,
};
use souk_chat::{
    ApiError, ChatApi, ClientConfig, Event, EventKind, Identity, MemoryPeer, MemoryServer,
    MessagingClient, Subscription, memory_transport,
};
use tokio::sync::mpsc;

// ── REST fake ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeApiState {
    pub histories: Vec<(PeerId, ChatHistory)>,
    pub chats: Vec<ConversationSummary>,
    pub unread: UnreadNotifications,
    pub chat_unread_count: u32,
    pub fail_with: Option<u16>,
    pub calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeApi {
    pub state: Mutex<FakeApiState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_history(&self, peer: &str, history: ChatHistory) {
        self.state
            .lock()
            .unwrap()
            .histories
            .push((PeerId::from(peer), history));
    }

    pub fn fail_next_calls(&self, status: Option<u16>) {
        self.state.lock().unwrap().fail_with = status;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.fail_with {
            Some(status) => Err(ApiError::Status {
                status,
                message: "scripted failure".into(),
            }),
            None => Ok(()),
        }
    }
}

impl ChatApi for FakeApi {
    fn chat_history<'a>(&'a self, peer: &'a PeerId) -> BoxFuture<'a, Result<ChatHistory, ApiError>> {
        Box::pin(async move {
            self.record(format!("GET /chat/history/{peer}"))?;
            let state = self.state.lock().unwrap();
            Ok(state
                .histories
                .iter()
                .find(|(p, _)| p == peer)
                .map(|(_, h)| h.clone())
                .unwrap_or_default())
        })
    }

    fn chat_list(&self) -> BoxFuture<'_, Result<Vec<ConversationSummary>, ApiError>> {
        Box::pin(async move {
            self.record("GET /chat/list".into())?;
            Ok(self.state.lock().unwrap().chats.clone())
        })
    }

    fn mark_chat_read<'a>(&'a self, chat_id: &'a ChatId) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move { self.record(format!("PUT /chat/{chat_id}/read")) })
    }

    fn chat_unread_count(&self) -> BoxFuture<'_, Result<u32, ApiError>> {
        Box::pin(async move {
            self.record("GET /chat/unread-count".into())?;
            Ok(self.state.lock().unwrap().chat_unread_count)
        })
    }

    fn unread_notifications(&self) -> BoxFuture<'_, Result<UnreadNotifications, ApiError>> {
        Box::pin(async move {
            self.record("GET /notifications/unread".into())?;
            Ok(self.state.lock().unwrap().unread.clone())
        })
    }

    fn mark_notification_read<'a>(
        &'a self,
        id: &'a NotificationId,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move { self.record(format!("PUT /notifications/{id}")) })
    }

    fn mark_all_notifications_read(&self) -> BoxFuture<'_, Result<(), ApiError>> {
        Box::pin(async move { self.record("PUT /notifications/mark-all-read".into()) })
    }

    fn delete_notification<'a>(
        &'a self,
        id: &'a NotificationId,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move { self.record(format!("DELETE /notifications/{id}")) })
    }
}

// ── fixtures ────────────────────────────────────────────────────────

pub fn peer(id: &str) -> PeerId {
    PeerId::from(id)
}

pub fn message(id: &str, from: &str, to: &str, text: &str) -> Message {
    Message {
        server_id: ServerMessageId::from(id),
        sender_id: peer(from),
        receiver_id: peer(to),
        text: text.into(),
        sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        read: false,
    }
}

pub fn chat_notification(id: &str, source: Option<&str>) -> Notification {
    Notification {
        id: NotificationId::from(id),
        kind: NotificationKind::Chat,
        source_peer_id: source.map(peer),
        payload: serde_json::json!({}),
        is_read: false,
        created_at: None,
    }
}

// ── harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub client: MessagingClient,
    pub server_peer: MemoryPeer,
    pub server: MemoryServer,
    pub api: Arc<FakeApi>,
}

impl Harness {
    /// Log `user` in against an in-memory server that accepts the handshake.
    pub async fn login(user: &str) -> Self {
        Self::login_with(user, ClientConfig::default()).await
    }

    pub async fn login_with(user: &str, config: ClientConfig) -> Self {
        let (connector, mut server) = memory_transport();
        let api = FakeApi::new();
        let identity = Identity::new(user, "token");

        let (client, server_peer) = tokio::join!(
            MessagingClient::login(config, identity, Arc::new(connector), api.clone()),
            async {
                let mut peer = server.accept().await.expect("client never connected");
                peer.accept_handshake().await.expect("no handshake");
                peer
            }
        );

        Self {
            client: client.expect("login failed"),
            server_peer,
            server,
            api,
        }
    }

    /// Push `event` and wait until every handler has seen it.
    pub async fn push(&self, event: ServerEvent) {
        let kind = EventKind::from(&event);
        let mut probe = EventProbe::new(&self.client, kind);
        assert!(self.server_peer.push(event).await, "client link closed");
        probe.next().await;
    }
}

// ── event probe ─────────────────────────────────────────────────────

/// Collects events of one kind. Subscribed after the client's own
/// components, so an event seen here has already been handled by them.
pub struct EventProbe {
    rx: mpsc::UnboundedReceiver<Event>,
    _subscription: Subscription,
}

impl EventProbe {
    pub fn new(client: &MessagingClient, kind: EventKind) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = client.connection().subscribe(kind, move |event| {
            let _ = tx.send(event.clone());
            Ok(())
        });
        Self {
            rx,
            _subscription: subscription,
        }
    }

    pub async fn next(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("probe channel closed")
    }
}
