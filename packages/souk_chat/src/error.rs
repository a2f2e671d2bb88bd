//! Error types for the messaging core.
//!
//! None of these cross a dispatch boundary: connection errors are returned to
//! the caller of `connect`, send failures are published per temp id, and the
//! rest are logged where they occur.

use std::time::Duration;

use souk_protocol::{PeerId, TempId};

/// Handshake or transport failure. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection closed before the handshake completed")]
    ClosedDuringHandshake,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("already connected as {connected}, refusing to switch to {requested}")]
    IdentityMismatch { connected: PeerId, requested: PeerId },
}

impl ConnectionError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::HandshakeRejected(_) => "handshake_rejected",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::ClosedDuringHandshake => "closed_during_handshake",
            Self::Transport(_) => "transport_error",
            Self::IdentityMismatch { .. } => "identity_mismatch",
        }
    }
}

/// The server (or the local connection) rejected one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("message {temp_id} to {peer_id} failed: {reason}")]
pub struct SendFailure {
    pub temp_id: TempId,
    pub peer_id: PeerId,
    /// Text of the rolled-back message, so the caller can offer a resend.
    pub text: String,
    pub reason: String,
}

/// An ack or error referenced a temp id with nothing pending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no pending message for temp id {temp_id} ({event})")]
pub struct StaleAck {
    pub temp_id: TempId,
    pub event: &'static str,
}

/// Returned by an event handler; logged by the bus, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Failure talking to a REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Http(_) => "http_error",
            Self::Status { .. } => "http_status",
            Self::Decode(_) => "decode_error",
            Self::InvalidUrl(_) => "invalid_url",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(#[from] pub Box<figment::Error>);

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self(Box::new(err))
    }
}
