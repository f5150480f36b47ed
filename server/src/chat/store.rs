//! Durable message log.
//!
//! The delivery path and the history endpoint only see the `MessageStore`
//! trait. `SqliteMessageStore` is the production implementation; every call
//! runs on the blocking pool so a slow write never stalls a connection task.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::Message;
use crate::db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
    #[error("stored timestamp {0:?} is not RFC 3339")]
    InvalidTimestamp(String),
}

/// Persistence collaborator used by the delivery engine and the history endpoint.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to the log and return the persisted record.
    async fn save(&self, message: Message) -> Result<Message, StoreError>;

    /// Every message exchanged between `user_a` and `user_b`, in either
    /// direction, oldest first.
    async fn fetch_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<Message>, StoreError>;
}

/// SQLite-backed message log sharing the server's connection.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

/// Fixed precision keeps the TEXT column lexically sortable.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(raw: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(raw))
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save(&self, message: Message) -> Result<Message, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            conn.execute(
                "INSERT INTO messages (id, sender, receiver, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.id,
                    message.sender,
                    message.receiver,
                    message.content,
                    encode_timestamp(&message.timestamp),
                ],
            )?;
            Ok(message)
        })
        .await?
    }

    async fn fetch_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let db = self.db.clone();
        let user_a = user_a.to_string();
        let user_b = user_b.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let mut stmt = conn.prepare(
                "SELECT id, sender, receiver, content, timestamp
                 FROM messages
                 WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
                 ORDER BY timestamp ASC, rowid ASC",
            )?;

            let rows = stmt.query_map(rusqlite::params![user_a, user_b], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (id, sender, receiver, content, timestamp) = row?;
                messages.push(Message {
                    id,
                    sender,
                    receiver,
                    content,
                    timestamp: decode_timestamp(timestamp)?,
                });
            }
            Ok(messages)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn store() -> SqliteMessageStore {
        SqliteMessageStore::new(init_memory_db().unwrap())
    }

    #[tokio::test]
    async fn save_returns_record_unchanged() {
        let store = store();
        let msg = Message::new("alice", "bob", "hello");

        let saved = store.save(msg.clone()).await.unwrap();
        assert_eq!(saved, msg);
    }

    #[tokio::test]
    async fn conversation_covers_both_directions_only() {
        let store = store();
        for i in 0..3 {
            store
                .save(Message::new("alice", "bob", &format!("a{i}")))
                .await
                .unwrap();
        }
        for i in 0..2 {
            store
                .save(Message::new("bob", "alice", &format!("b{i}")))
                .await
                .unwrap();
        }
        store.save(Message::new("alice", "carol", "other")).await.unwrap();
        store.save(Message::new("carol", "bob", "other")).await.unwrap();

        let convo = store.fetch_conversation("alice", "bob").await.unwrap();
        assert_eq!(convo.len(), 5);
        for msg in &convo {
            let pair = [msg.sender.as_str(), msg.receiver.as_str()];
            assert!(pair.contains(&"alice") && pair.contains(&"bob"));
        }

        // Argument order does not matter
        let reversed = store.fetch_conversation("bob", "alice").await.unwrap();
        assert_eq!(reversed, convo);
    }

    #[tokio::test]
    async fn conversation_is_oldest_first() {
        let store = store();
        let first = store.save(Message::new("alice", "bob", "first")).await.unwrap();
        let second = store.save(Message::new("bob", "alice", "second")).await.unwrap();

        let convo = store.fetch_conversation("alice", "bob").await.unwrap();
        let ids: Vec<_> = convo.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
    }

    #[tokio::test]
    async fn timestamps_survive_round_trip_at_microsecond_precision() {
        let store = store();
        let saved = store.save(Message::new("alice", "bob", "t")).await.unwrap();

        let loaded = store.fetch_conversation("alice", "bob").await.unwrap();
        let delta = (loaded[0].timestamp - saved.timestamp).num_microseconds().unwrap();
        assert_eq!(delta, 0);
    }

    #[tokio::test]
    async fn duplicate_id_is_a_database_error() {
        let store = store();
        let msg = Message::new("alice", "bob", "once");
        store.save(msg.clone()).await.unwrap();

        let err = store.save(msg).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
