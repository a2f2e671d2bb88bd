//! Domain records carried inside event payloads and REST responses.
//!
//! Field names follow the marketplace backend. The backend historically used
//! `_id`, `textContent` and `dateSent`; those spellings are accepted as aliases
//! on input while output always uses the canonical camelCase names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{ChatId, NotificationId, PeerId, ServerMessageId};

/// A chat message persisted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "id", alias = "_id")]
    pub server_id: ServerMessageId,
    #[serde(alias = "sender", deserialize_with = "peer_ref")]
    pub sender_id: PeerId,
    #[serde(alias = "receiver", deserialize_with = "peer_ref")]
    pub receiver_id: PeerId,
    #[serde(alias = "textContent")]
    pub text: String,
    /// Missing timestamps are stamped on receipt.
    #[serde(alias = "dateSent", default = "Utc::now")]
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "isRead", default)]
    pub read: bool,
}

/// A user reference: a bare id, or a populated user object carrying `_id`
/// or `id` (other fields such as name and email are ignored).
fn peer_ref<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PeerId, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PeerRef {
        Id(PeerId),
        Populated {
            #[serde(alias = "_id")]
            id: PeerId,
        },
    }

    Ok(match PeerRef::deserialize(deserializer)? {
        PeerRef::Id(id) | PeerRef::Populated { id } => id,
    })
}

impl Message {
    /// The other party of the conversation this message belongs to.
    pub fn peer_of(&self, own_id: &PeerId) -> &PeerId {
        if &self.sender_id == own_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Online/offline status pushed by `user_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Category of a notification. Only `chat` carries dedup semantics; every
/// other category is kept verbatim so new server-side kinds pass through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Chat,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::Other(kind) => kind,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(s: String) -> Self {
        if s == "chat" { Self::Chat } else { Self::Other(s) }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Chat => "chat".to_string(),
            NotificationKind::Other(kind) => kind,
        }
    }
}

/// A user-facing notification (unread badge entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "_id")]
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_peer_id: Option<PeerId>,
    #[serde(default, alias = "data")]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_chat(&self) -> bool {
        self.kind == NotificationKind::Chat
    }

    /// Originating peer: the explicit field first, then `payload.senderId`.
    pub fn sender_hint(&self) -> Option<PeerId> {
        self.source_peer_id.clone().or_else(|| {
            self.payload
                .get("senderId")
                .and_then(|v| v.as_str())
                .map(PeerId::from)
        })
    }
}

/// Response of `GET /chat/history/{peerId}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// One row of `GET /chat/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub peer_id: PeerId,
    #[serde(default, alias = "_id")]
    pub chat_id: Option<ChatId>,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
}

/// Response of `GET /notifications/unread`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadNotifications {
    #[serde(default)]
    pub data: Vec<Notification>,
    #[serde(default)]
    pub total_count: u64,
}
