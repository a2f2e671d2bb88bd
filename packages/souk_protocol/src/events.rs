//! Client → server and server → client events.

use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, PeerId, TempId};
use crate::model::{Message, Notification, PresenceStatus};

/// Events sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// First frame on every connection; authenticates the identity.
    Handshake(HandshakePayload),
    SendMessage(SendMessagePayload),
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::SendMessage(_) => "send_message",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    pub token: String,
    pub user_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub text: String,
    pub receiver_id: PeerId,
    pub temp_id: TempId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: PeerId,
    pub receiver_id: PeerId,
}

/// Events pushed FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    HandshakeAck(HandshakeAckPayload),
    HandshakeError(HandshakeErrorPayload),
    /// A message we sent was persisted.
    MessageSent(MessageSentPayload),
    /// A message we sent was rejected.
    MessageError(MessageErrorPayload),
    /// A peer sent us a message.
    NewMessage(NewMessagePayload),
    UserTyping(UserTypingPayload),
    UserStatus(UserStatusPayload),
    NotificationCreated(NotificationCreatedPayload),
}

impl ServerEvent {
    /// Every event name the client understands, in declaration order.
    pub const NAMES: &'static [&'static str] = &[
        "handshake_ack",
        "handshake_error",
        "message_sent",
        "message_error",
        "new_message",
        "user_typing",
        "user_status",
        "notification_created",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::HandshakeAck(_) => "handshake_ack",
            Self::HandshakeError(_) => "handshake_error",
            Self::MessageSent(_) => "message_sent",
            Self::MessageError(_) => "message_error",
            Self::NewMessage(_) => "new_message",
            Self::UserTyping(_) => "user_typing",
            Self::UserStatus(_) => "user_status",
            Self::NotificationCreated(_) => "notification_created",
        }
    }

    pub fn is_known_name(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAckPayload {
    pub user_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeErrorPayload {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentPayload {
    pub temp_id: TempId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageErrorPayload {
    pub temp_id: TempId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub sender_id: PeerId,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub user_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<PeerId>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusPayload {
    pub user_id: PeerId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCreatedPayload {
    pub notification: Notification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PeerId>,
}
