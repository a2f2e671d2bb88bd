//! Raw text-frame links to the messaging server.
//!
//! Submodules:
//! - `websocket`: tokio-tungstenite client with reader and writer pumps
//! - `memory`: in-process channel pair used by tests and local tooling
//!
//! A [`Connector`] only opens the link. The handshake, frame decoding and
//! dispatch belong to the [`ConnectionManager`](crate::ConnectionManager).

pub mod memory;
pub mod websocket;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::ConnectionError;

/// Both directions of one open connection, as JSON text frames.
///
/// Closing either side ends the link: dropping `outbound` tells the transport
/// to close, and `inbound` yields `None` once the server side is gone.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::Receiver<String>,
}

pub trait Connector: Send + Sync + 'static {
    /// Open a fresh link. `inbound_buffer` bounds frames queued for the reader.
    fn connect(&self, inbound_buffer: usize) -> BoxFuture<'_, Result<TransportLink, ConnectionError>>;
}
