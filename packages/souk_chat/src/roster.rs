//! The chat list: one row per peer with a last-message preview and an unread
//! count. Seeded from `/chat/list` and kept current from live events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use souk_protocol::{ChatId, ConversationSummary, Message, PeerId, ServerEvent};
use tracing::{debug, info};

use crate::api::ChatApi;
use crate::bus::{Event, EventKind, Subscription};
use crate::connection::ConnectionManager;
use crate::error::ApiError;
use crate::lock;
use crate::session::ConversationSession;

type Rows = Arc<Mutex<HashMap<PeerId, ConversationSummary>>>;

fn row<'a>(rows: &'a mut HashMap<PeerId, ConversationSummary>, peer: &PeerId) -> &'a mut ConversationSummary {
    rows.entry(peer.clone()).or_insert_with(|| ConversationSummary {
        peer_id: peer.clone(),
        chat_id: None,
        last_message: None,
        unread_count: 0,
    })
}

fn record_incoming(rows: &Rows, session: &ConversationSession, peer: &PeerId, message: &Message) {
    let viewing = session.is_open_with(peer);
    let mut rows = lock(rows);
    let summary = row(&mut rows, peer);
    summary.last_message = Some(message.clone());
    if !viewing {
        summary.unread_count += 1;
    }
}

fn record_outgoing(rows: &Rows, peer: &PeerId, chat_id: Option<&ChatId>, message: &Message) {
    let mut rows = lock(rows);
    let summary = row(&mut rows, peer);
    summary.last_message = Some(message.clone());
    if summary.chat_id.is_none() {
        summary.chat_id = chat_id.cloned();
    }
}

pub struct ConversationRoster {
    api: Arc<dyn ChatApi>,
    rows: Rows,
    /// Unread messages the server reported in chats that have no row here.
    unlisted_unread: Arc<Mutex<u32>>,
    _subscriptions: Vec<Subscription>,
}

impl ConversationRoster {
    pub fn attach(
        connection: &ConnectionManager,
        own_id: PeerId,
        session: ConversationSession,
        api: Arc<dyn ChatApi>,
    ) -> Self {
        let rows: Rows = Arc::default();

        let on_incoming = {
            let rows = rows.clone();
            connection.subscribe(EventKind::NewMessage, move |event| {
                if let Event::Server(ServerEvent::NewMessage(incoming)) = event {
                    record_incoming(&rows, &session, &incoming.sender_id, &incoming.message);
                }
                Ok(())
            })
        };
        let on_sent = {
            let rows = rows.clone();
            connection.subscribe(EventKind::MessageSent, move |event| {
                if let Event::Server(ServerEvent::MessageSent(ack)) = event {
                    let peer = ack.message.peer_of(&own_id);
                    record_outgoing(&rows, peer, ack.chat_id.as_ref(), &ack.message);
                }
                Ok(())
            })
        };

        Self {
            api,
            rows,
            unlisted_unread: Arc::default(),
            _subscriptions: vec![on_incoming, on_sent],
        }
    }

    pub async fn refresh(&self) -> Result<(), ApiError> {
        let chats = self.api.chat_list().await?;
        info!(chats = chats.len(), "chat list refreshed");
        let mut rows = lock(&self.rows);
        rows.clear();
        for summary in chats {
            rows.insert(summary.peer_id.clone(), summary);
        }
        *lock(&self.unlisted_unread) = 0;
        Ok(())
    }

    /// Seed the overall unread total from `/chat/unread-count`. Whatever the
    /// server counts beyond the known rows is carried as unlisted until the
    /// next `refresh`.
    pub async fn sync_unread_total(&self) -> Result<u32, ApiError> {
        let server_total = self.api.chat_unread_count().await?;
        let listed: u32 = lock(&self.rows).values().map(|s| s.unread_count).sum();
        *lock(&self.unlisted_unread) = server_total.saturating_sub(listed);
        debug!(server_total, listed, "unread total synced");
        Ok(self.unread_total())
    }

    /// Remember the chat id learned from opening a conversation.
    pub fn note_chat_id(&self, peer: &PeerId, chat_id: &ChatId) {
        let mut rows = lock(&self.rows);
        row(&mut rows, peer).chat_id = Some(chat_id.clone());
    }

    /// Mark the conversation with `peer` read. Without a known chat id there
    /// is nothing to tell the server and only the local count is reset.
    pub async fn mark_read(&self, peer: &PeerId) -> Result<(), ApiError> {
        let chat_id = lock(&self.rows).get(peer).and_then(|s| s.chat_id.clone());
        match &chat_id {
            Some(chat_id) => self.api.mark_chat_read(chat_id).await?,
            None => debug!(peer = %peer, "no chat id yet, resetting unread locally"),
        }
        if let Some(summary) = lock(&self.rows).get_mut(peer) {
            summary.unread_count = 0;
        }
        Ok(())
    }

    /// Rows ordered by most recent message first.
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        let mut rows: Vec<ConversationSummary> = lock(&self.rows).values().cloned().collect();
        rows.sort_by(|a, b| {
            let a_at = a.last_message.as_ref().map(|m| m.sent_at);
            let b_at = b.last_message.as_ref().map(|m| m.sent_at);
            b_at.cmp(&a_at).then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        rows
    }

    pub fn unread_for(&self, peer: &PeerId) -> u32 {
        lock(&self.rows)
            .get(peer)
            .map(|s| s.unread_count)
            .unwrap_or(0)
    }

    /// Unread messages across the known rows plus any the server reported
    /// for chats not listed yet.
    pub fn unread_total(&self) -> u32 {
        let listed: u32 = lock(&self.rows).values().map(|s| s.unread_count).sum();
        listed + *lock(&self.unlisted_unread)
    }
}
