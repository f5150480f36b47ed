use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::{TokenVerifier, VerifyError};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection: `?token=JWT`.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Close codes sent to clients.
/// 1001 = going away (heartbeat lost, server shutdown)
/// 1003 = token rejected by the verifier
/// 1007 = token missing or malformed
/// 1011 = unrecoverable processing error
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_UNAUTHORIZED: u16 = 1003;
pub const CLOSE_BAD_REQUEST: u16 = 1007;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Why a handshake was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    MissingToken,
    Rejected(VerifyError),
}

impl HandshakeError {
    pub fn close_frame(&self) -> CloseFrame {
        match self {
            HandshakeError::MissingToken => CloseFrame {
                code: CLOSE_BAD_REQUEST,
                reason: "Token required".into(),
            },
            HandshakeError::Rejected(_) => CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "Invalid token".into(),
            },
        }
    }
}

/// Resolve the connecting user from the handshake token.
pub fn authenticate(
    verifier: &dyn TokenVerifier,
    token: Option<&str>,
) -> Result<String, HandshakeError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(HandshakeError::MissingToken)?;

    verifier.verify(token).map_err(HandshakeError::Rejected)
}

/// GET /chat?token=JWT
/// On auth failure, upgrades then immediately closes with the matching close code,
/// so no session is ever registered. On success, runs the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match authenticate(state.verifier.as_ref(), params.token.as_deref()) {
        Ok(user_id) => {
            tracing::info!(user_id = %user_id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        Err(err) => {
            let close_frame = err.close_frame();
            tracing::warn!(
                close_code = close_frame.code,
                reason = %close_frame.reason.as_str(),
                error = ?err,
                "WebSocket handshake rejected"
            );
            ws.on_upgrade(move |socket| reject(socket, close_frame))
        }
    }
}

async fn reject(mut socket: WebSocket, close_frame: CloseFrame) {
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
