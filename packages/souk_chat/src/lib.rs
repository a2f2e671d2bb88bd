//! Souk chat - real-time messaging core for the marketplace client
//!
//! One [`MessagingClient`] exists per logged-in identity. It owns the single
//! [`ConnectionManager`] and wires every component to it:
//!
//! - [`PresenceRegistry`]: which peers are online
//! - [`TypingCoordinator`]: debounced local typing signal, remote typing state
//! - [`MessageReconciler`]: optimistic sends reconciled against acks and errors
//! - [`ConversationSession`] + [`NotificationCenter`]: the open conversation and
//!   the unread queue it deduplicates against
//! - [`ConversationRoster`]: the chat list with per-peer unread counts
//!
//! Inbound events are dispatched one at a time on the connection's reader
//! task. Handlers are synchronous and never hold a lock across an `.await`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use souk_chat::{ClientConfig, HttpChatApi, Identity, MessagingClient, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::load(None)?;
//!     let identity = Identity::new("user-1", "token");
//!     let api = Arc::new(HttpChatApi::new(&config.server.api_base_url, &identity.token)?);
//!     let connector = Arc::new(WebSocketConnector::new(&config.server.ws_url));
//!
//!     let client = MessagingClient::login(config, identity, connector, api).await?;
//!     let peer = "user-2".into();
//!     client.open_conversation(&peer).await?;
//!     client.reconciler().send(&peer, "Hello");
//!     client.logout();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bus;
mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod notifications;
pub mod presence;
pub mod reconciler;
pub mod roster;
pub mod session;
pub mod timer;
pub mod transport;
pub mod typing;

pub use api::{ChatApi, HttpChatApi};
pub use bus::{DispatchReport, Event, EventBus, EventKind, Subscription};
pub use client::MessagingClient;
pub use config::{ClientConfig, ConnectionConfig};
pub use connection::{ConnectionManager, ConnectionState, Identity};
pub use error::{ApiError, ConfigError, ConnectionError, HandlerError, SendFailure, StaleAck};
pub use notifications::NotificationCenter;
pub use presence::{PresenceRegistry, PresenceSet};
pub use reconciler::{DeliveryOutcome, DeliveryStatus, LogEntry, MessageReconciler, OutgoingMessage};
pub use roster::ConversationRoster;
pub use session::{ConversationSession, GateDecision, NotificationDedupGate};
pub use timer::ScheduledTask;
pub use transport::{Connector, TransportLink};
pub use transport::memory::{MemoryConnector, MemoryPeer, MemoryServer, memory_transport};
pub use transport::websocket::WebSocketConnector;
pub use typing::{TypingCoordinator, TypingState};

pub use souk_protocol as protocol;
pub use souk_protocol::{
    ChatHistory, ChatId, ConversationSummary, Message, Notification, NotificationId, PeerId, TempId,
};

/// Lock a std mutex, recovering the data if a panicking handler poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
