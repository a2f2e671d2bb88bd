//! Frame decoding errors.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, or JSON without an `event` name.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    /// A known event whose payload is missing required fields or has the
    /// wrong shape.
    #[error("malformed `{event}` event: {reason}")]
    Malformed { event: String, reason: String },

    #[error("failed to encode `{event}`: {reason}")]
    Encode { event: String, reason: String },
}

impl ProtocolError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidFrame(_) => "invalid_frame",
            Self::UnknownEvent(_) => "unknown_event",
            Self::Malformed { .. } => "malformed_event",
            Self::Encode { .. } => "encode_failed",
        }
    }

    /// Event name the error concerns, when one could be read from the frame.
    pub fn event(&self) -> Option<&str> {
        match self {
            Self::InvalidFrame(_) => None,
            Self::UnknownEvent(event) => Some(event),
            Self::Malformed { event, .. } | Self::Encode { event, .. } => Some(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            ProtocolError::InvalidFrame("eof".into()).error_code(),
            "invalid_frame"
        );
        assert_eq!(
            ProtocolError::Malformed {
                event: "new_message".into(),
                reason: "missing field `message`".into(),
            }
            .error_code(),
            "malformed_event"
        );
    }

    #[test]
    fn display_includes_event() {
        let err = ProtocolError::Malformed {
            event: "user_status".into(),
            reason: "missing field `userId`".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed `user_status` event: missing field `userId`"
        );
        assert_eq!(err.event(), Some("user_status"));
        assert_eq!(ProtocolError::InvalidFrame("x".into()).event(), None);
    }
}
