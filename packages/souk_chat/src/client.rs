use std::sync::Arc;

use souk_protocol::PeerId;
use tracing::{info, warn};

use crate::api::ChatApi;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, Identity};
use crate::error::{ApiError, ConnectionError};
use crate::notifications::NotificationCenter;
use crate::presence::PresenceRegistry;
use crate::reconciler::MessageReconciler;
use crate::roster::ConversationRoster;
use crate::session::{ConversationSession, NotificationDedupGate};
use crate::transport::Connector;
use crate::typing::TypingCoordinator;

/// Everything that lives for one logged-in identity.
///
/// Dropping the client (or calling [`logout`](Self::logout)) cancels typing
/// timers, unsubscribes every component and releases the connection.
pub struct MessagingClient {
    identity: Identity,
    api: Arc<dyn ChatApi>,
    connection: Arc<ConnectionManager>,
    session: ConversationSession,
    presence: PresenceRegistry,
    typing: TypingCoordinator,
    reconciler: MessageReconciler,
    notifications: NotificationCenter,
    roster: ConversationRoster,
}

impl MessagingClient {
    /// Wire every component to a fresh connection, then connect.
    pub async fn login(
        config: ClientConfig,
        identity: Identity,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ChatApi>,
    ) -> Result<Self, ConnectionError> {
        let connection = Arc::new(ConnectionManager::new(connector, config.connection.clone()));
        let session = ConversationSession::new();

        let client = Self {
            presence: PresenceRegistry::attach(&connection),
            typing: TypingCoordinator::attach(
                connection.clone(),
                identity.user_id.clone(),
                config.typing_debounce,
            ),
            reconciler: MessageReconciler::attach(connection.clone(), config.outcome_buffer),
            notifications: NotificationCenter::attach(
                &connection,
                NotificationDedupGate::new(session.clone()),
                api.clone(),
            ),
            roster: ConversationRoster::attach(
                &connection,
                identity.user_id.clone(),
                session.clone(),
                api.clone(),
            ),
            session,
            connection,
            api,
            identity,
        };

        client.connection.connect(&client.identity).await?;
        info!(user = %client.identity.user_id, "logged in");
        Ok(client)
    }

    /// Load history for `peer` and make it the open conversation.
    ///
    /// The session is switched only after history arrived, so a failed
    /// fetch leaves the previous conversation open.
    pub async fn open_conversation(&self, peer: &PeerId) -> Result<(), ApiError> {
        let history = self.api.chat_history(peer).await?;
        let chat_id = history.chat_id.clone();

        if let Some(previous) = self.session.open(peer) {
            if &previous != peer {
                self.leave(&previous);
            }
        }
        self.reconciler.open_conversation(peer, history);

        if let Some(chat_id) = &chat_id {
            self.roster.note_chat_id(peer, chat_id);
        }
        if let Err(e) = self.roster.mark_read(peer).await {
            warn!(peer = %peer, error = %e, "failed to mark conversation read");
        }
        Ok(())
    }

    /// Close the open conversation, if any.
    pub fn close_conversation(&self) {
        if let Some(peer) = self.session.close() {
            self.leave(&peer);
        }
    }

    fn leave(&self, peer: &PeerId) {
        self.typing.stop(peer);
        self.reconciler.close_conversation(peer);
    }

    /// Tear down every component and release the connection.
    pub fn logout(self) {
        info!(user = %self.identity.user_id, "logging out");
        drop(self);
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn reconciler(&self) -> &MessageReconciler {
        &self.reconciler
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn roster(&self) -> &ConversationRoster {
        &self.roster
    }
}

impl Drop for MessagingClient {
    fn drop(&mut self) {
        self.typing.shutdown();
        self.connection.disconnect();
    }
}
