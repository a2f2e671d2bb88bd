//! REST collaborators: chat history, the chat list and the notification queue.
//!
//! The real-time connection never carries these; they are plain HTTP calls
//! authenticated with the same bearer token as the handshake.

use futures::future::BoxFuture;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use souk_protocol::{
    ChatHistory, ChatId, ConversationSummary, Message, NotificationId, PeerId, UnreadNotifications,
};
use tracing::debug;

use crate::error::ApiError;

pub trait ChatApi: Send + Sync + 'static {
    /// `GET /chat/history/{peerId}`: find or create the chat with `peer`.
    fn chat_history<'a>(&'a self, peer: &'a PeerId) -> BoxFuture<'a, Result<ChatHistory, ApiError>>;

    /// `GET /chat/list`
    fn chat_list(&self) -> BoxFuture<'_, Result<Vec<ConversationSummary>, ApiError>>;

    /// `PUT /chat/{chatId}/read`
    fn mark_chat_read<'a>(&'a self, chat_id: &'a ChatId) -> BoxFuture<'a, Result<(), ApiError>>;

    /// `GET /chat/unread-count`: unread messages across every chat.
    fn chat_unread_count(&self) -> BoxFuture<'_, Result<u32, ApiError>>;

    /// `GET /notifications/unread`
    fn unread_notifications(&self) -> BoxFuture<'_, Result<UnreadNotifications, ApiError>>;

    /// `PUT /notifications/{id}`
    fn mark_notification_read<'a>(
        &'a self,
        id: &'a NotificationId,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    /// `PUT /notifications/mark-all-read`
    fn mark_all_notifications_read(&self) -> BoxFuture<'_, Result<(), ApiError>>;

    /// `DELETE /notifications/{id}`
    fn delete_notification<'a>(&'a self, id: &'a NotificationId)
    -> BoxFuture<'a, Result<(), ApiError>>;
}

/// History arrives either wrapped as `{"data": {...}}` or flat with the chat
/// record alongside the messages.
#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    data: Option<ChatHistory>,
    #[serde(default)]
    chat: Option<ChatRef>,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ChatRef {
    #[serde(rename = "_id", alias = "id")]
    id: ChatId,
}

impl HistoryResponse {
    fn into_history(self) -> ChatHistory {
        let fallback_id = self.chat.map(|c| c.id);
        match self.data {
            Some(mut history) => {
                if history.chat_id.is_none() {
                    history.chat_id = fallback_id;
                }
                history
            }
            None => ChatHistory {
                chat_id: fallback_id,
                messages: self.messages,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatListResponse {
    #[serde(default)]
    chats: Vec<ConversationSummary>,
}

#[derive(Debug, Deserialize)]
struct UnreadCountResponse {
    #[serde(default)]
    count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpChatApi {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::InvalidUrl(base_url.to_owned()));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("souk-chat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_owned(),
            token: token.to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request(&self, method: Method, path: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.url(path);
        debug!(%method, %url, "api request");
        let resp = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.request(Method::GET, path).await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl ChatApi for HttpChatApi {
    fn chat_history<'a>(&'a self, peer: &'a PeerId) -> BoxFuture<'a, Result<ChatHistory, ApiError>> {
        Box::pin(async move {
            let resp: HistoryResponse = self.get_json(&format!("/chat/history/{peer}")).await?;
            Ok(resp.into_history())
        })
    }

    fn chat_list(&self) -> BoxFuture<'_, Result<Vec<ConversationSummary>, ApiError>> {
        Box::pin(async move {
            let resp: ChatListResponse = self.get_json("/chat/list").await?;
            Ok(resp.chats)
        })
    }

    fn mark_chat_read<'a>(&'a self, chat_id: &'a ChatId) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.request(Method::PUT, &format!("/chat/{chat_id}/read"))
                .await?;
            Ok(())
        })
    }

    fn chat_unread_count(&self) -> BoxFuture<'_, Result<u32, ApiError>> {
        Box::pin(async move {
            let resp: UnreadCountResponse = self.get_json("/chat/unread-count").await?;
            Ok(resp.count)
        })
    }

    fn unread_notifications(&self) -> BoxFuture<'_, Result<UnreadNotifications, ApiError>> {
        Box::pin(async move { self.get_json("/notifications/unread").await })
    }

    fn mark_notification_read<'a>(
        &'a self,
        id: &'a NotificationId,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.request(Method::PUT, &format!("/notifications/{id}"))
                .await?;
            Ok(())
        })
    }

    fn mark_all_notifications_read(&self) -> BoxFuture<'_, Result<(), ApiError>> {
        Box::pin(async move {
            self.request(Method::PUT, "/notifications/mark-all-read")
                .await?;
            Ok(())
        })
    }

    fn delete_notification<'a>(
        &'a self,
        id: &'a NotificationId,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.request(Method::DELETE, &format!("/notifications/{id}"))
                .await?;
            Ok(())
        })
    }
}
