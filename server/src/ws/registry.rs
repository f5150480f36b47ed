//! Session registry: which user is reachable on which live connection.
//!
//! One session per user. A newer connection for the same user replaces the
//! older mapping; the older connection stays open but stops receiving
//! routed traffic. Removal is guarded by connection id so a superseded
//! connection shutting down cannot evict its replacement.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sender half of a connection's bounded outbound channel. The connection's
/// writer task owns the receiving half and the socket sink.
pub type ConnectionSender = mpsc::Sender<Message>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(Uuid),
    /// The receiver is not draining its queue; the frame was dropped.
    #[error("outbound queue of connection {0} is full")]
    Full(Uuid),
}

/// Non-owning handle to a live connection. The transport owns teardown.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// False once the connection's writer task has gone away.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a frame for the connection's writer task without waiting.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full(self.id),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed(self.id),
        })
    }
}

/// A user bound to its live connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: &str, handle: ConnectionHandle) -> Self {
        Self {
            user_id: user_id.to_string(),
            handle,
            connected_at: Utc::now(),
        }
    }
}

/// Concurrent user -> session map shared by every connection task.
/// Cloning is cheap and all clones see the same sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `session.user_id` (last registered wins).
    pub fn register(&self, session: Session) {
        let user_id = session.user_id.clone();
        let connection_id = session.handle.id();

        if let Some(previous) = self.sessions.insert(user_id.clone(), session) {
            tracing::info!(
                user_id = %user_id,
                previous_connection = %previous.handle.id(),
                connection_id = %connection_id,
                "Session superseded by newer connection"
            );
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            sessions = self.sessions.len(),
            "Session registered"
        );
    }

    /// Current connection for `user_id`, if any.
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.sessions.get(user_id).map(|s| s.handle.clone())
    }

    /// Remove the mapping for `user_id` only if it still points at `handle`.
    /// Returns whether an entry was removed.
    pub fn unregister(&self, user_id: &str, handle: &ConnectionHandle) -> bool {
        let removed = self
            .sessions
            .remove_if(user_id, |_, current| current.handle.id() == handle.id())
            .is_some();

        tracing::debug!(
            user_id = %user_id,
            connection_id = %handle.id(),
            removed,
            "Session unregistered"
        );
        removed
    }

    /// Whether `user_id` has a registered session whose connection is still open.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.lookup(user_id).is_some_and(|h| h.is_open())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn lookup_absent_user() {
        let registry = SessionRegistry::new();
        assert!(registry.lookup("nobody").is_none());
        assert!(!registry.is_online("nobody"));
        assert!(registry.is_empty());
    }

    #[test]
    fn second_registration_wins() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();

        registry.register(Session::new("alice", first.clone()));
        registry.register(Session::new("alice", second.clone()));

        assert_eq!(registry.lookup("alice").unwrap().id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_unregister_keeps_newer_session() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();

        registry.register(Session::new("alice", first.clone()));
        registry.register(Session::new("alice", second.clone()));

        assert!(!registry.unregister("alice", &first));
        assert_eq!(registry.lookup("alice").unwrap().id(), second.id());

        assert!(registry.unregister("alice", &second));
        assert!(registry.lookup("alice").is_none());
    }

    #[test]
    fn unregister_unknown_user_is_noop() {
        let registry = SessionRegistry::new();
        let (h, _rx) = handle();
        assert!(!registry.unregister("ghost", &h));
    }

    #[test]
    fn handle_reports_closed_after_receiver_drops() {
        let registry = SessionRegistry::new();
        let (h, rx) = handle();
        registry.register(Session::new("bob", h.clone()));
        assert!(registry.is_online("bob"));

        drop(rx);
        assert!(!h.is_open());
        assert!(!registry.is_online("bob"));
        assert_eq!(h.send(Message::Text("x".into())), Err(SendError::Closed(h.id())));
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let (tx, mut rx) = mpsc::channel(2);
        let h = ConnectionHandle::new(tx);

        assert!(h.send(Message::Text("1".into())).is_ok());
        assert!(h.send(Message::Text("2".into())).is_ok());
        assert_eq!(h.send(Message::Text("3".into())), Err(SendError::Full(h.id())));
        assert!(h.is_open());

        assert!(rx.try_recv().is_ok());
        assert!(h.send(Message::Text("4".into())).is_ok());
    }

    #[test]
    fn clones_share_state() {
        let registry = SessionRegistry::new();
        let view = registry.clone();
        let (h, _rx) = handle();

        registry.register(Session::new("carol", h.clone()));
        assert_eq!(view.lookup("carol").unwrap().id(), h.id());
    }

    #[test]
    fn concurrent_registration_of_distinct_users() {
        let registry = SessionRegistry::new();
        let mut keep = Vec::new();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let (h, rx) = handle();
                keep.push(rx);
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.register(Session::new(&format!("user{i}"), h));
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.len(), 8);
    }
}
