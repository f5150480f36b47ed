use axum::{middleware, Router};

use crate::auth::middleware::Verifier;
use crate::chat::history;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the token verifier into request extensions so the AuthUser extractor can find it.
async fn inject_verifier(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(Verifier(state.verifier.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Chat socket (auth via query param, not Authorization header).
    // /ws is kept as an alias for clients that use the conventional path.
    let ws_routes = Router::new()
        .route("/chat", axum::routing::get(ws_handler::ws_upgrade))
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Conversation history (Bearer auth via AuthUser extractor)
    let history_routes = Router::new().route(
        "/chats/{with_user}",
        axum::routing::get(history::get_conversation),
    );

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(history_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_verifier,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
