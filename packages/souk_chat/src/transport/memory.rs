//! In-process transport.
//!
//! [`memory_transport`] returns a connector and the server half that accepts
//! its links. Each accepted [`MemoryPeer`] plays the server side of one
//! connection: it reads client frames, answers the handshake and pushes
//! server events.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use souk_protocol::frame::{decode_client, encode_server};
use souk_protocol::{
    ClientEvent, HandshakeAckPayload, HandshakeErrorPayload, HandshakePayload, ServerEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Connector, TransportLink};
use crate::error::ConnectionError;
use crate::lock;

pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            accept_tx,
            refusal: Arc::new(Mutex::new(None)),
        },
        MemoryServer { accept_rx },
    )
}

#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refusal: Arc<Mutex<Option<String>>>,
}

impl MemoryConnector {
    /// Make subsequent connects fail with a transport error (`None` restores).
    pub fn refuse_connections(&self, reason: Option<&str>) {
        *lock(&self.refusal) = reason.map(str::to_owned);
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, inbound_buffer: usize) -> BoxFuture<'_, Result<TransportLink, ConnectionError>> {
        Box::pin(async move {
            let refusal = lock(&self.refusal).clone();
            if let Some(reason) = refusal {
                return Err(ConnectionError::Transport(reason));
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::channel(inbound_buffer.max(1));
            let peer = MemoryPeer {
                from_client: out_rx,
                to_client: Some(in_tx),
            };
            self.accept_tx
                .send(peer)
                .map_err(|_| ConnectionError::Transport("memory server is gone".into()))?;

            Ok(TransportLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}

pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next client link. `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// A link that was already opened, without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

/// Server side of one in-process connection.
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::Sender<String>>,
}

impl MemoryPeer {
    /// Next raw frame written by the client. `None` once the client hung up.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next decodable client event. Undecodable frames are skipped.
    pub async fn recv_event(&mut self) -> Option<ClientEvent> {
        while let Some(text) = self.from_client.recv().await {
            match decode_client(&text) {
                Ok(event) => return Some(event),
                Err(e) => warn!(error = %e, "memory peer skipped client frame"),
            }
        }
        None
    }

    /// A client event that is already queued, without waiting.
    pub fn try_recv_event(&mut self) -> Option<ClientEvent> {
        while let Ok(text) = self.from_client.try_recv() {
            if let Ok(event) = decode_client(&text) {
                return Some(event);
            }
        }
        None
    }

    /// Push a server event. Returns false if the client side is gone.
    pub async fn push(&self, event: ServerEvent) -> bool {
        match encode_server(&event) {
            Ok(text) => self.push_raw(text).await,
            Err(e) => {
                warn!(error = %e, "memory peer could not encode event");
                false
            }
        }
    }

    /// Push an arbitrary text frame, valid or not.
    pub async fn push_raw(&self, text: impl Into<String>) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(text.into()).await.is_ok(),
            None => false,
        }
    }

    /// Wait for the handshake frame and acknowledge it.
    pub async fn accept_handshake(&mut self) -> Option<HandshakePayload> {
        let handshake = self.expect_handshake().await?;
        let ack = ServerEvent::HandshakeAck(HandshakeAckPayload {
            user_id: handshake.user_id.clone(),
        });
        self.push(ack).await;
        Some(handshake)
    }

    /// Wait for the handshake frame and refuse it with `reason`.
    pub async fn reject_handshake(&mut self, reason: &str) -> Option<HandshakePayload> {
        let handshake = self.expect_handshake().await?;
        let error = ServerEvent::HandshakeError(HandshakeErrorPayload {
            error: reason.to_owned(),
        });
        self.push(error).await;
        Some(handshake)
    }

    async fn expect_handshake(&mut self) -> Option<HandshakePayload> {
        loop {
            match self.recv_event().await? {
                ClientEvent::Handshake(payload) => return Some(payload),
                other => debug!(event = other.name(), "memory peer ignored pre-handshake event"),
            }
        }
    }

    /// Drop the client-to-server direction while leaving the other one open.
    /// Client writes fail from here on; the client's reader sees nothing.
    pub fn stop_reading(&mut self) {
        let (_closed, rx) = mpsc::unbounded_channel();
        self.from_client = rx;
    }

    /// Close the server-to-client direction; the client sees the link drop.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    pub fn is_client_gone(&self) -> bool {
        self.to_client.as_ref().is_none_or(|tx| tx.is_closed())
    }
}
