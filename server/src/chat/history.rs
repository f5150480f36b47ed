//! Conversation history over REST.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::middleware::AuthUser;
use crate::db::models::Message;
use crate::state::AppState;

/// GET /chats/{with_user} -- every message between the caller and `with_user`,
/// oldest first. Bearer auth required.
pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(with_user): Path<String>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let messages = state
        .engine
        .store()
        .fetch_conversation(&user.user_id, &with_user)
        .await
        .map_err(|e| {
            tracing::error!(
                user_id = %user.user_id,
                with_user = %with_user,
                error = %e,
                "Failed to load conversation"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}
