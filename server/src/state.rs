use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenVerifier;
use crate::chat::store::{MessageStore, SqliteMessageStore};
use crate::config::WebSocketConfig;
use crate::db::DbPool;
use crate::ws::delivery::DeliveryEngine;
use crate::ws::SessionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
/// Created at server start; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions, one per connected user
    pub sessions: SessionRegistry,
    /// Routes chat operations using `sessions` and the message store
    pub engine: DeliveryEngine,
    /// Turns bearer tokens into user identities
    pub verifier: Arc<dyn TokenVerifier>,
    /// Heartbeat settings for every connection
    pub websocket: WebSocketConfig,
    /// Cancelled on process shutdown; ends every receive loop
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the state around the SQLite message store.
    pub fn new(
        db: DbPool,
        verifier: Arc<dyn TokenVerifier>,
        websocket: WebSocketConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_store(
            Arc::new(SqliteMessageStore::new(db)),
            verifier,
            websocket,
            shutdown,
        )
    }

    /// Same as `new` with a caller-supplied message store.
    pub fn with_store(
        store: Arc<dyn MessageStore>,
        verifier: Arc<dyn TokenVerifier>,
        websocket: WebSocketConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let sessions = SessionRegistry::new();
        let engine = DeliveryEngine::new(sessions.clone(), store);
        Self {
            sessions,
            engine,
            verifier,
            websocket,
            shutdown,
        }
    }
}
