//! The conversation the user is looking at, and the gate that keeps a chat
//! notification from badging a thread that is already on screen.

use std::sync::{Arc, Mutex};

use souk_protocol::{Notification, PeerId};
use tracing::debug;

use crate::lock;

/// At most one open conversation. Opening another replaces it.
#[derive(Debug, Clone, Default)]
pub struct ConversationSession {
    active: Arc<Mutex<Option<PeerId>>>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `peer` the open conversation. Returns the one it replaced.
    pub fn open(&self, peer: &PeerId) -> Option<PeerId> {
        let previous = lock(&self.active).replace(peer.clone());
        debug!(peer = %peer, ?previous, "conversation session opened");
        previous
    }

    pub fn close(&self) -> Option<PeerId> {
        lock(&self.active).take()
    }

    pub fn active_peer(&self) -> Option<PeerId> {
        lock(&self.active).clone()
    }

    pub fn is_open_with(&self, peer: &PeerId) -> bool {
        lock(&self.active).as_ref() == Some(peer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Keep,
    Drop,
}

#[derive(Debug, Clone)]
pub struct NotificationDedupGate {
    session: ConversationSession,
}

impl NotificationDedupGate {
    pub fn new(session: ConversationSession) -> Self {
        Self { session }
    }

    /// `Drop` iff this is a chat notification from the peer whose
    /// conversation is open.
    pub fn gate(&self, notification: &Notification) -> GateDecision {
        if !notification.is_chat() {
            return GateDecision::Keep;
        }
        match notification.sender_hint() {
            Some(source) if self.session.is_open_with(&source) => GateDecision::Drop,
            _ => GateDecision::Keep,
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use souk_protocol::{NotificationId, NotificationKind};

    fn notification(kind: NotificationKind, source: Option<&str>) -> Notification {
        Notification {
            id: NotificationId::from("n1"),
            kind,
            source_peer_id: source.map(PeerId::from),
            payload: json!({}),
            is_read: false,
            created_at: None,
        }
    }

    #[test]
    fn open_replaces_never_stacks() {
        let session = ConversationSession::new();
        assert_eq!(session.open(&PeerId::from("b")), None);
        assert_eq!(session.open(&PeerId::from("c")), Some(PeerId::from("b")));
        assert_eq!(session.active_peer(), Some(PeerId::from("c")));
        assert_eq!(session.close(), Some(PeerId::from("c")));
        assert_eq!(session.active_peer(), None);
    }

    #[test]
    fn drops_chat_from_open_peer_only() {
        let session = ConversationSession::new();
        let gate = NotificationDedupGate::new(session.clone());
        session.open(&PeerId::from("b"));

        assert_eq!(
            gate.gate(&notification(NotificationKind::Chat, Some("b"))),
            GateDecision::Drop
        );
        assert_eq!(
            gate.gate(&notification(NotificationKind::Chat, Some("c"))),
            GateDecision::Keep
        );
        assert_eq!(
            gate.gate(&notification(NotificationKind::Other("order".into()), Some("b"))),
            GateDecision::Keep
        );
        assert_eq!(
            gate.gate(&notification(NotificationKind::Chat, None)),
            GateDecision::Keep
        );
    }

    #[test]
    fn falls_back_to_payload_sender() {
        let session = ConversationSession::new();
        let gate = NotificationDedupGate::new(session.clone());
        session.open(&PeerId::from("b"));

        let mut n = notification(NotificationKind::Chat, None);
        n.payload = json!({"senderId": "b"});
        assert_eq!(gate.gate(&n), GateDecision::Drop);
    }

    #[test]
    fn nothing_dropped_without_open_conversation() {
        let gate = NotificationDedupGate::new(ConversationSession::new());
        assert_eq!(
            gate.gate(&notification(NotificationKind::Chat, Some("b"))),
            GateDecision::Keep
        );
    }
}
