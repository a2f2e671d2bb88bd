//! Wire model and event frames for the Souk real-time messaging protocol.
//!
//! Every frame on the connection is a JSON text frame of the form
//! `{"event": "<name>", "data": {...}}`. Client-originated frames are modelled
//! by [`ClientEvent`], server-pushed frames by [`ServerEvent`]. Decoding an
//! inbound frame distinguishes unknown events from known events whose payload
//! is missing required fields, so callers can drop either with a warning.
//!
//! ```
//! use souk_protocol::{ServerEvent, frame};
//!
//! let text = r#"{"event":"user_status","data":{"userId":"u-2","status":"online"}}"#;
//! match frame::decode_server(text).unwrap() {
//!     ServerEvent::UserStatus(status) => assert_eq!(status.user_id.as_str(), "u-2"),
//!     other => panic!("unexpected event {other:?}"),
//! }
//! ```

pub mod error;
pub mod events;
pub mod frame;
pub mod ids;
pub mod model;

pub use error::ProtocolError;
pub use events::{
    ClientEvent, HandshakeAckPayload, HandshakeErrorPayload, HandshakePayload,
    MessageErrorPayload, MessageSentPayload, NewMessagePayload, NotificationCreatedPayload,
    SendMessagePayload, ServerEvent, TypingPayload, UserStatusPayload, UserTypingPayload,
};
pub use ids::{ChatId, NotificationId, PeerId, ServerMessageId, TempId};
pub use model::{
    ChatHistory, ConversationSummary, Message, Notification, NotificationKind, PresenceStatus,
    UnreadNotifications,
};
