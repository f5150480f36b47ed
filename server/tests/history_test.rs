//! Integration tests for GET /chats/{with_user}.

use futures_util::SinkExt;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use p2pchat_server::auth::jwt::{issue_access_token, JwtVerifier};
use p2pchat_server::config::WebSocketConfig;
use p2pchat_server::db::models::Message;
use p2pchat_server::state::AppState;

const SECRET: &[u8] = b"history-test-secret-of-32-bytes!";

/// Helper: start the server on a random port and return (base_url, addr, state).
async fn start_test_server() -> (String, SocketAddr, AppState) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = p2pchat_server::db::init_db(&data_dir).expect("Failed to init DB");
    let state = AppState::new(
        db,
        Arc::new(JwtVerifier::new(SECRET.to_vec())),
        WebSocketConfig::default(),
        CancellationToken::new(),
    );

    let app = p2pchat_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr, state)
}

fn token(user: &str) -> String {
    issue_access_token(SECRET, user, 3600).unwrap()
}

async fn get_history(base_url: &str, user: &str, with_user: &str) -> Vec<Message> {
    let resp = reqwest::Client::new()
        .get(format!("{}/chats/{}", base_url, with_user))
        .bearer_auth(token(user))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_conversation_returns_both_directions() {
    let (base_url, _addr, state) = start_test_server().await;
    let store = state.engine.store();

    for i in 0..3 {
        store
            .save(Message::new("alice", "bob", &format!("alice {i}")))
            .await
            .unwrap();
    }
    for i in 0..2 {
        store
            .save(Message::new("bob", "alice", &format!("bob {i}")))
            .await
            .unwrap();
    }
    store.save(Message::new("alice", "carol", "unrelated")).await.unwrap();

    let history = get_history(&base_url, "alice", "bob").await;
    assert_eq!(history.len(), 5);
    for msg in &history {
        let mut pair = [msg.sender.as_str(), msg.receiver.as_str()];
        pair.sort();
        assert_eq!(pair, ["alice", "bob"]);
    }
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    // Same conversation seen from the other side
    assert_eq!(get_history(&base_url, "bob", "alice").await, history);
}

#[tokio::test]
async fn test_messages_sent_over_socket_appear_in_history() {
    let (base_url, addr, state) = start_test_server().await;
    let url = format!("ws://{}/chat?token={}", addr, token("alice"));
    let (mut alice, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    for content in ["first", "second"] {
        let frame = json!({"type": "MESSAGE", "receiver": "bob", "content": content});
        alice.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
    }

    let mut history = Vec::new();
    for _ in 0..200 {
        history = get_history(&base_url, "bob", "alice").await;
        if history.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second"]);
    assert!(state.sessions.lookup("bob").is_none());
}

#[tokio::test]
async fn test_empty_conversation() {
    let (base_url, _addr, _state) = start_test_server().await;
    assert!(get_history(&base_url, "alice", "nobody").await.is_empty());
}

#[tokio::test]
async fn test_history_requires_valid_bearer_token() {
    let (base_url, _addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/chats/bob", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{}/chats/bob", base_url))
        .bearer_auth("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_health() {
    let (base_url, _addr, _state) = start_test_server().await;
    let body = reqwest::get(format!("{}/health", base_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}
