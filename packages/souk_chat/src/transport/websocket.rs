//! WebSocket transport over tokio-tungstenite.
//!
//! The socket is split into a writer pump fed by the link's outbound channel
//! and a reader pump that forwards text frames to the inbound channel. Either
//! pump stopping ends the link.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

use super::{Connector, TransportLink};
use crate::error::ConnectionError;

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, inbound_buffer: usize) -> BoxFuture<'_, Result<TransportLink, ConnectionError>> {
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            info!(url = %self.url, "websocket connected");

            let (mut ws_write, mut ws_read) = ws_stream.split();
            let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
            let (inbound_tx, inbound) = mpsc::channel::<String>(inbound_buffer.max(1));

            tokio::spawn(async move {
                while let Some(text) = outbound_rx.recv().await {
                    if let Err(e) = ws_write.send(tungstenite::Message::Text(text.into())).await {
                        warn!(error = %e, "websocket write failed");
                        break;
                    }
                }
                let _ = ws_write.close().await;
                debug!("websocket writer ended");
            });

            tokio::spawn(async move {
                while let Some(msg) = ws_read.next().await {
                    match msg {
                        Ok(tungstenite::Message::Text(text)) => {
                            if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                                break;
                            }
                        }
                        Ok(tungstenite::Message::Close(frame)) => {
                            debug!(?frame, "websocket closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "websocket read failed");
                            break;
                        }
                    }
                }
                debug!("websocket reader ended");
            });

            Ok(TransportLink { outbound, inbound })
        })
    }
}
