//! Routes decoded operations: persist, push live, or drop.
//!
//! Delivery is best effort. Persistence is always attempted for chat
//! messages; the live push to the receiver is independent of it and a failed
//! push never undoes or fails the operation.

use axum::extract::ws::Message as WsMessage;
use serde::Serialize;
use std::sync::Arc;

use crate::chat::store::MessageStore;
use crate::db::models::Message;
use crate::ws::protocol::{Operation, TypingSignal};
use crate::ws::registry::SessionRegistry;

/// What happened to one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Message {
        id: String,
        persisted: bool,
        live: bool,
    },
    Typing {
        live: bool,
    },
    Ignored,
}

/// Stateless dispatcher over the shared session registry and message store.
#[derive(Clone)]
pub struct DeliveryEngine {
    sessions: SessionRegistry,
    store: Arc<dyn MessageStore>,
}

impl DeliveryEngine {
    pub fn new(sessions: SessionRegistry, store: Arc<dyn MessageStore>) -> Self {
        Self { sessions, store }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Execute `operation` on behalf of the authenticated `sender`.
    pub async fn deliver(&self, sender: &str, operation: Operation) -> DeliveryOutcome {
        match operation {
            Operation::Message { receiver, content } => {
                self.deliver_message(sender, &receiver, &content).await
            }
            Operation::Typing { receiver } => self.deliver_typing(sender, &receiver),
            Operation::Unknown { kind } => {
                tracing::debug!(user_id = %sender, kind = %kind, "Ignoring unknown envelope type");
                DeliveryOutcome::Ignored
            }
        }
    }

    async fn deliver_message(&self, sender: &str, receiver: &str, content: &str) -> DeliveryOutcome {
        let message = Message::new(sender, receiver, content);
        let id = message.id.clone();

        // Persist first; a store failure is logged and live delivery still goes ahead
        let (message, persisted) = match self.store.save(message.clone()).await {
            Ok(saved) => {
                tracing::debug!(message_id = %saved.id, sender = %sender, receiver = %receiver, "Message persisted");
                (saved, true)
            }
            Err(e) => {
                tracing::error!(
                    message_id = %id,
                    sender = %sender,
                    receiver = %receiver,
                    error = %e,
                    "Failed to persist message"
                );
                (message, false)
            }
        };

        let live = self.push(receiver, &message);
        if !live {
            tracing::debug!(receiver = %receiver, message_id = %id, "Receiver offline, message stored only");
        }

        DeliveryOutcome::Message { id, persisted, live }
    }

    fn deliver_typing(&self, sender: &str, receiver: &str) -> DeliveryOutcome {
        let live = self.push(receiver, &TypingSignal::started(sender));
        DeliveryOutcome::Typing { live }
    }

    /// Serialize `payload` and queue it on the receiver's open connection.
    /// Returns whether the frame was handed to the connection.
    fn push<T: Serialize>(&self, receiver: &str, payload: &T) -> bool {
        let Some(handle) = self.sessions.lookup(receiver) else {
            return false;
        };
        if !handle.is_open() {
            return false;
        }

        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(receiver = %receiver, error = %e, "Failed to serialize outbound payload");
                return false;
            }
        };

        match handle.send(WsMessage::Text(json.into())) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(receiver = %receiver, error = %e, "Live delivery failed");
                false
            }
        }
    }
}
