//! Wire format for the chat socket.
//!
//! Inbound frames are JSON envelopes tagged by `type`:
//! `{"type":"MESSAGE","receiver":"bob","content":"hi"}` or
//! `{"type":"TYPING","receiver":"bob"}`. Outbound frames are either a stored
//! message record or a typing signal.

use serde::{Deserialize, Serialize};

pub const TYPE_MESSAGE: &str = "MESSAGE";
pub const TYPE_TYPING: &str = "TYPING";

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Message { receiver: String, content: String },
    Typing { receiver: String },
    /// Well-formed envelope with an unrecognized `type`.
    Unknown { kind: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{kind} envelope missing field `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    receiver: Option<String>,
    content: Option<String>,
}

/// Parse one inbound text payload. Never has side effects.
pub fn decode(raw: &str) -> Result<Operation, DecodeError> {
    let envelope: RawEnvelope = serde_json::from_str(raw)?;

    match envelope.kind.as_str() {
        TYPE_MESSAGE => Ok(Operation::Message {
            receiver: envelope.receiver.ok_or(DecodeError::MissingField {
                kind: TYPE_MESSAGE,
                field: "receiver",
            })?,
            content: envelope.content.ok_or(DecodeError::MissingField {
                kind: TYPE_MESSAGE,
                field: "content",
            })?,
        }),
        TYPE_TYPING => Ok(Operation::Typing {
            receiver: envelope.receiver.ok_or(DecodeError::MissingField {
                kind: TYPE_TYPING,
                field: "receiver",
            })?,
        }),
        _ => Ok(Operation::Unknown {
            kind: envelope.kind,
        }),
    }
}

/// Typing indicator pushed to the receiver. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub from: String,
    pub typing: bool,
}

impl TypingSignal {
    pub fn started(from: &str) -> Self {
        Self {
            from: from.to_string(),
            typing: true,
        }
    }
}
