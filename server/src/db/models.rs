//! Records persisted in the message log.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat message as stored and as delivered to the receiver's connection.
///
/// Immutable once built. `sender` is always the authenticated identity of the
/// connection that produced it; `receiver` is taken verbatim from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    /// Serialized as RFC 3339 (ISO-8601) UTC
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a new message stamped with a fresh UUIDv7 id and the current time.
    /// The timestamp is truncated to microseconds, the precision the store keeps.
    pub fn new(sender: &str, receiver: &str, content: &str) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            content: content.to_string(),
            timestamp: Utc::now().trunc_subsecs(6),
        }
    }
}
