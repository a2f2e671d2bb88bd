//! Text-frame codec.
//!
//! Decoding is two-phase: the envelope (`event` + `data`) is read first so an
//! unknown event name and a known event with a bad payload produce different
//! errors. Neither is fatal to the connection; the caller logs and drops.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::ProtocolError;
use crate::events::{ClientEvent, ServerEvent};

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

const CLIENT_EVENT_NAMES: &[&str] = &["handshake", "send_message", "typing_start", "typing_stop"];

/// Decode a frame pushed by the server.
pub fn decode_server(text: &str) -> Result<ServerEvent, ProtocolError> {
    decode_with(text, ServerEvent::is_known_name)
}

/// Decode a frame sent by a client (used by server-side harnesses).
pub fn decode_client(text: &str) -> Result<ClientEvent, ProtocolError> {
    decode_with(text, |name| CLIENT_EVENT_NAMES.contains(&name))
}

pub fn encode_client(event: &ClientEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Encode {
        event: event.name().to_string(),
        reason: e.to_string(),
    })
}

pub fn encode_server(event: &ServerEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Encode {
        event: event.name().to_string(),
        reason: e.to_string(),
    })
}

fn decode_with<T: DeserializeOwned>(
    text: &str,
    is_known: impl Fn(&str) -> bool,
) -> Result<T, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;

    if !is_known(&envelope.event) {
        return Err(ProtocolError::UnknownEvent(envelope.event));
    }

    let Envelope { event, data } = envelope;
    serde_json::from_value(json!({ "event": event.as_str(), "data": data })).map_err(|e| {
        ProtocolError::Malformed {
            event,
            reason: e.to_string(),
        }
    })
}
