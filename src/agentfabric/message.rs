//! The message model shared by every agent and channel in the fabric.
//!
//! A [`Message`] is immutable after it has been sent: agents that want to
//! derive a new value construct a fresh message and forward that instead.
//! The payload is UTF-8 text, typically JSON or plain prose, and is bounded
//! by [`MAX_PAYLOAD_CHARS`].  Any structured metadata travels *inside* the
//! payload as JSON rather than as extra fields on the envelope.
//!
//! # Example
//!
//! ```rust
//! use agentfabric::Message;
//!
//! let msg = Message::new("analysis", "spectral line detected at 6563 angstrom");
//! assert_eq!(msg.message_type, "analysis");
//! assert!(!msg.id.is_empty());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use uuid::Uuid;

/// Upper bound on payload length, measured in characters.
pub const MAX_PAYLOAD_CHARS: usize = 100_000;

/// A typed message travelling between agents over the channel fabric.
///
/// The `id` is caller-assigned (or a generated UUID) and is used to correlate
/// request/response pairs across channels.  `message_type` is a short category
/// tag such as `"ray_burst"`, `"analysis"`, `"classification"`,
/// `"aggregation"` or `"reasoning_plan"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Opaque correlation id.
    pub id: String,
    /// Short category tag.  Serialised as `type` on the wire.
    #[serde(rename = "type")]
    pub message_type: String,
    /// UTF-8 body, bounded by [`MAX_PAYLOAD_CHARS`].
    pub payload: String,
    /// Creation instant; serialises as an RFC 3339 string.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with a generated UUID id and the current timestamp.
    pub fn new(message_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    /// Override the generated id with a caller-supplied correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// First `n` characters of the payload, for log lines.
    pub fn payload_preview(&self, n: usize) -> String {
        self.payload.chars().take(n).collect()
    }
}

/// Why a payload was rejected by [`validate_payload`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Payload exceeds [`MAX_PAYLOAD_CHARS`].
    TooLong { length: usize },
    /// Payload contains a NUL byte.
    NullByte,
    /// Payload contains a control character other than `\n`, `\r` or `\t`.
    ControlCharacter { character: char },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooLong { length } => write!(
                f,
                "payload too long: {} chars exceeds maximum of {}",
                length, MAX_PAYLOAD_CHARS
            ),
            ValidationError::NullByte => write!(f, "payload contains a null byte"),
            ValidationError::ControlCharacter { character } => {
                write!(f, "payload contains control character {:?}", character)
            }
        }
    }
}

impl Error for ValidationError {}

/// Validate a payload at a message entry point.
///
/// Enforced rules: at most [`MAX_PAYLOAD_CHARS`] characters, no NUL bytes,
/// and no control characters other than newline, carriage return and tab.
/// Validation errors are never fatal to an agent loop; callers log the error
/// and skip the message.
pub fn validate_payload(payload: &str) -> Result<(), ValidationError> {
    let length = payload.chars().count();
    if length > MAX_PAYLOAD_CHARS {
        return Err(ValidationError::TooLong { length });
    }
    for character in payload.chars() {
        if character == '\0' {
            return Err(ValidationError::NullByte);
        }
        if character.is_control() && character != '\n' && character != '\r' && character != '\t' {
            return Err(ValidationError::ControlCharacter { character });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_new_assigns_id_and_timestamp() {
        let msg = Message::new("analysis", "hello");
        assert!(!msg.id.is_empty());
        assert_eq!(msg.message_type, "analysis");
        assert_eq!(msg.payload, "hello");
    }

    #[test]
    fn test_message_with_id() {
        let msg = Message::new("analysis", "hello").with_id("req-42");
        assert_eq!(msg.id, "req-42");
    }

    #[test]
    fn test_message_serde_uses_type_on_the_wire() {
        let msg = Message::new("classification", "x").with_id("m1");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"classification\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_type, "classification");
        assert_eq!(back.id, "m1");
    }

    #[test]
    fn test_validate_accepts_normal_text() {
        assert!(validate_payload("plain text with\nnewlines\tand tabs\r\n").is_ok());
        assert!(validate_payload("").is_ok());
    }

    #[test]
    fn test_validate_rejects_null_byte() {
        assert_eq!(validate_payload("a\0b"), Err(ValidationError::NullByte));
    }

    #[test]
    fn test_validate_rejects_control_characters() {
        match validate_payload("a\u{1b}b") {
            Err(ValidationError::ControlCharacter { character }) => {
                assert_eq!(character, '\u{1b}')
            }
            other => panic!("expected control character error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let payload = "x".repeat(MAX_PAYLOAD_CHARS + 1);
        match validate_payload(&payload) {
            Err(ValidationError::TooLong { length }) => {
                assert_eq!(length, MAX_PAYLOAD_CHARS + 1)
            }
            other => panic!("expected too-long error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_payload_at_the_boundary() {
        let payload = "x".repeat(MAX_PAYLOAD_CHARS);
        assert!(validate_payload(&payload).is_ok());
    }
}
