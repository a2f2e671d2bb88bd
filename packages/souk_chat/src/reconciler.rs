//! Message Reconciler
//!
//! Outgoing messages are shown immediately as [`LogEntry::Pending`] and keyed
//! by a client-generated [`TempId`]. The server answers each one with either
//! `message_sent` (the entry is replaced in place by the persisted message) or
//! `message_error` (the entry is rolled back and a [`SendFailure`] is
//! published). Both paths consume the same pending record, so every temp id
//! resolves exactly once; a second answer is logged as a [`StaleAck`].
//!
//! Display order is local append order. An ack that crosses a near
//! simultaneous incoming message on the wire can therefore show the two in a
//! different order than they were actually sent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use souk_protocol::{
    ChatHistory, ChatId, ClientEvent, Message, MessageErrorPayload, MessageSentPayload,
    NewMessagePayload, PeerId, SendMessagePayload, ServerEvent, TempId,
};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::bus::{Event, EventKind, Subscription};
use crate::connection::ConnectionManager;
use crate::error::{SendFailure, StaleAck};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// A message we sent that the server has not answered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub temp_id: TempId,
    pub peer_id: PeerId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

/// One row of a conversation as displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Pending(OutgoingMessage),
    Message(Message),
}

impl LogEntry {
    pub fn text(&self) -> &str {
        match self {
            Self::Pending(outgoing) => &outgoing.text,
            Self::Message(message) => &message.text,
        }
    }

    pub fn temp_id(&self) -> Option<&TempId> {
        match self {
            Self::Pending(outgoing) => Some(&outgoing.temp_id),
            Self::Message(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// How one send was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent {
        temp_id: TempId,
        peer_id: PeerId,
        message: Message,
    },
    Failed(SendFailure),
}

impl DeliveryOutcome {
    pub fn temp_id(&self) -> &TempId {
        match self {
            Self::Sent { temp_id, .. } => temp_id,
            Self::Failed(failure) => &failure.temp_id,
        }
    }
}

#[derive(Debug, Default)]
struct ConversationLog {
    chat_id: Option<ChatId>,
    entries: Vec<LogEntry>,
}

struct PendingRef {
    outgoing: OutgoingMessage,
    /// Index into the peer's log, or `None` while the conversation is closed.
    position: Option<usize>,
}

/// How many resolved sends keep a queryable status.
const RESOLVED_HISTORY: usize = 512;

#[derive(Default)]
struct State {
    next_temp: u64,
    conversations: HashMap<PeerId, ConversationLog>,
    pending: HashMap<TempId, PendingRef>,
    /// Terminal statuses of the most recent resolutions, oldest first in
    /// `resolved`.
    statuses: HashMap<TempId, DeliveryStatus>,
    resolved: VecDeque<TempId>,
}

impl State {
    fn record_resolution(&mut self, temp_id: &TempId, status: DeliveryStatus) {
        self.statuses.insert(temp_id.clone(), status);
        self.resolved.push_back(temp_id.clone());
        while self.resolved.len() > RESOLVED_HISTORY {
            if let Some(oldest) = self.resolved.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    fn status(&self, temp_id: &TempId) -> Option<DeliveryStatus> {
        if self.pending.contains_key(temp_id) {
            return Some(DeliveryStatus::Pending);
        }
        self.statuses.get(temp_id).copied()
    }

    fn next_temp_id(&mut self) -> TempId {
        self.next_temp += 1;
        TempId::new(format!("temp-{}", self.next_temp))
    }

    /// Locate the pending entry for `temp_id` in its log, trusting the index
    /// first and falling back to a scan.
    fn slot_of(&self, temp_id: &TempId, pending: &PendingRef) -> Option<usize> {
        let log = self.conversations.get(&pending.outgoing.peer_id)?;
        let matches = |entry: &LogEntry| entry.temp_id() == Some(temp_id);
        match pending.position {
            Some(pos) if log.entries.get(pos).is_some_and(matches) => Some(pos),
            Some(_) => log.entries.iter().position(matches),
            None => None,
        }
    }

    /// Keep the index in step after an entry at `removed` left `peer`'s log.
    fn shift_after_removal(&mut self, peer: &PeerId, removed: usize) {
        for pending in self.pending.values_mut() {
            if &pending.outgoing.peer_id != peer {
                continue;
            }
            if let Some(pos) = pending.position.as_mut() {
                if *pos > removed {
                    *pos -= 1;
                }
            }
        }
    }

    fn confirm(&mut self, ack: &MessageSentPayload) -> Result<DeliveryOutcome, StaleAck> {
        let pending = self.pending.remove(&ack.temp_id).ok_or_else(|| StaleAck {
            temp_id: ack.temp_id.clone(),
            event: "message_sent",
        })?;
        let slot = self.slot_of(&ack.temp_id, &pending);
        let peer_id = pending.outgoing.peer_id;

        if let Some(log) = self.conversations.get_mut(&peer_id) {
            if log.chat_id.is_none() {
                log.chat_id = ack.chat_id.clone();
            }
            if let Some(slot) = slot {
                log.entries[slot] = LogEntry::Message(ack.message.clone());
            }
        }
        self.record_resolution(&ack.temp_id, DeliveryStatus::Sent);

        Ok(DeliveryOutcome::Sent {
            temp_id: ack.temp_id.clone(),
            peer_id,
            message: ack.message.clone(),
        })
    }

    fn roll_back(&mut self, temp_id: &TempId, reason: &str) -> Result<SendFailure, StaleAck> {
        let pending = self.pending.remove(temp_id).ok_or_else(|| StaleAck {
            temp_id: temp_id.clone(),
            event: "message_error",
        })?;
        let slot = self.slot_of(temp_id, &pending);
        let peer_id = pending.outgoing.peer_id;

        if let (Some(slot), Some(log)) = (slot, self.conversations.get_mut(&peer_id)) {
            log.entries.remove(slot);
            self.shift_after_removal(&peer_id, slot);
        }
        self.record_resolution(temp_id, DeliveryStatus::Failed);

        Ok(SendFailure {
            temp_id: temp_id.clone(),
            peer_id,
            text: pending.outgoing.text,
            reason: reason.to_owned(),
        })
    }

    fn append_incoming(&mut self, incoming: &NewMessagePayload) -> bool {
        let Some(log) = self.conversations.get_mut(&incoming.sender_id) else {
            return false;
        };
        let duplicate = log.entries.iter().any(|entry| {
            matches!(entry, LogEntry::Message(m) if m.server_id == incoming.message.server_id)
        });
        if !duplicate {
            log.entries.push(LogEntry::Message(incoming.message.clone()));
        }
        !duplicate
    }
}

struct Core {
    state: Mutex<State>,
    outcomes: broadcast::Sender<DeliveryOutcome>,
}

impl Core {
    fn on_message_sent(&self, ack: &MessageSentPayload) {
        let result = lock(&self.state).confirm(ack);
        match result {
            Ok(outcome) => {
                debug!(temp_id = %ack.temp_id, server_id = %ack.message.server_id, "message confirmed");
                let _ = self.outcomes.send(outcome);
            }
            Err(stale) => warn!(%stale, "ignoring ack"),
        }
    }

    fn on_message_error(&self, error: &MessageErrorPayload) {
        self.fail(&error.temp_id, &error.error);
    }

    fn fail(&self, temp_id: &TempId, reason: &str) {
        let result = lock(&self.state).roll_back(temp_id, reason);
        match result {
            Ok(failure) => {
                warn!(%failure, "message rolled back");
                let _ = self.outcomes.send(DeliveryOutcome::Failed(failure));
            }
            Err(stale) => warn!(%stale, "ignoring error"),
        }
    }

    fn on_new_message(&self, incoming: &NewMessagePayload) {
        if lock(&self.state).append_incoming(incoming) {
            trace!(peer = %incoming.sender_id, "incoming message appended");
        }
    }
}

pub struct MessageReconciler {
    connection: Arc<ConnectionManager>,
    core: Arc<Core>,
    _subscriptions: Vec<Subscription>,
}

impl MessageReconciler {
    pub fn attach(connection: Arc<ConnectionManager>, outcome_buffer: usize) -> Self {
        let (outcomes, _) = broadcast::channel(outcome_buffer.max(1));
        let core = Arc::new(Core {
            state: Mutex::new(State::default()),
            outcomes,
        });

        let subscriptions = vec![
            {
                let core = core.clone();
                connection.subscribe(EventKind::MessageSent, move |event| {
                    if let Event::Server(ServerEvent::MessageSent(ack)) = event {
                        core.on_message_sent(ack);
                    }
                    Ok(())
                })
            },
            {
                let core = core.clone();
                connection.subscribe(EventKind::MessageError, move |event| {
                    if let Event::Server(ServerEvent::MessageError(error)) = event {
                        core.on_message_error(error);
                    }
                    Ok(())
                })
            },
            {
                let core = core.clone();
                connection.subscribe(EventKind::NewMessage, move |event| {
                    if let Event::Server(ServerEvent::NewMessage(incoming)) = event {
                        core.on_new_message(incoming);
                    }
                    Ok(())
                })
            },
        ];

        Self {
            connection,
            core,
            _subscriptions: subscriptions,
        }
    }

    /// Optimistically append `text` to the conversation with `peer` and send
    /// it. Returns `None` for blank text.
    ///
    /// Without a live connection the entry is rolled back right away and a
    /// failure is published, so nothing stays pending.
    pub fn send(&self, peer: &PeerId, text: &str) -> Option<TempId> {
        let text = text.trim();
        if text.is_empty() {
            debug!(peer = %peer, "refusing to send blank message");
            return None;
        }

        let temp_id = {
            let mut state = lock(&self.core.state);
            let temp_id = state.next_temp_id();
            let outgoing = OutgoingMessage {
                temp_id: temp_id.clone(),
                peer_id: peer.clone(),
                text: text.to_owned(),
                created_at: Utc::now(),
                status: DeliveryStatus::Pending,
            };
            let position = state.conversations.get_mut(peer).map(|log| {
                log.entries.push(LogEntry::Pending(outgoing.clone()));
                log.entries.len() - 1
            });
            state
                .pending
                .insert(temp_id.clone(), PendingRef { outgoing, position });
            temp_id
        };

        let sent = self
            .connection
            .send(ClientEvent::SendMessage(SendMessagePayload {
                text: text.to_owned(),
                receiver_id: peer.clone(),
                temp_id: temp_id.clone(),
            }));
        if !sent {
            self.core.fail(&temp_id, "not connected");
        }
        Some(temp_id)
    }

    /// Seed the log for `peer` from history. Messages still awaiting an
    /// answer are re-attached after the history, in send order.
    pub fn open_conversation(&self, peer: &PeerId, history: ChatHistory) {
        let mut state = lock(&self.core.state);
        let mut entries: Vec<LogEntry> = history
            .messages
            .into_iter()
            .map(LogEntry::Message)
            .collect();

        let mut waiting: Vec<(u64, TempId)> = state
            .pending
            .iter()
            .filter(|(_, pending)| &pending.outgoing.peer_id == peer)
            .map(|(temp_id, _)| (temp_sequence(temp_id), temp_id.clone()))
            .collect();
        waiting.sort();
        for (_, temp_id) in &waiting {
            if let Some(pending) = state.pending.get_mut(temp_id) {
                pending.position = Some(entries.len());
                entries.push(LogEntry::Pending(pending.outgoing.clone()));
            }
        }

        info!(peer = %peer, messages = entries.len(), pending = waiting.len(), "conversation opened");
        state.conversations.insert(
            peer.clone(),
            ConversationLog {
                chat_id: history.chat_id,
                entries,
            },
        );
    }

    /// Drop the log for `peer`. Pending sends still resolve and publish
    /// their outcome; they just have no row to update.
    pub fn close_conversation(&self, peer: &PeerId) {
        let mut state = lock(&self.core.state);
        if state.conversations.remove(peer).is_none() {
            return;
        }
        for pending in state.pending.values_mut() {
            if &pending.outgoing.peer_id == peer {
                pending.position = None;
            }
        }
        debug!(peer = %peer, "conversation closed");
    }

    pub fn is_open(&self, peer: &PeerId) -> bool {
        lock(&self.core.state).conversations.contains_key(peer)
    }

    /// Snapshot of the conversation with `peer`, oldest first.
    pub fn entries(&self, peer: &PeerId) -> Vec<LogEntry> {
        lock(&self.core.state)
            .conversations
            .get(peer)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    pub fn chat_id(&self, peer: &PeerId) -> Option<ChatId> {
        lock(&self.core.state)
            .conversations
            .get(peer)
            .and_then(|log| log.chat_id.clone())
    }

    /// Current status of a send. Resolved sends are remembered for the most
    /// recent few hundred only; older ones report `None`.
    pub fn status(&self, temp_id: &TempId) -> Option<DeliveryStatus> {
        lock(&self.core.state).status(temp_id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.core.state).pending.len()
    }

    pub fn outcomes(&self) -> broadcast::Receiver<DeliveryOutcome> {
        self.core.outcomes.subscribe()
    }
}

fn temp_sequence(temp_id: &TempId) -> u64 {
    temp_id
        .as_str()
        .strip_prefix("temp-")
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}
