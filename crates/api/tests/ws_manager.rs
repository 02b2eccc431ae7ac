//! Tests for `WsManager`, the status broadcaster.
//!
//! These tests exercise the connection manager directly, without performing
//! any HTTP upgrades. Each connection's outbound channel stands in for its
//! socket.

use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::ws::Message;
use renderflow_api::config::BroadcasterConfig;
use renderflow_api::ws::{close_code, ConnectionState, ServerMessage, WsError, WsManager};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

fn with_token(token: &str) -> BroadcasterConfig {
    BroadcasterConfig {
        auth_token: Some(token.to_string()),
        ..BroadcasterConfig::default()
    }
}

/// Next queued frame, decoded when it is JSON text.
fn next_json(rx: &mut UnboundedReceiver<Message>) -> serde_json::Value {
    match rx.try_recv().expect("a queued frame") {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

fn close_code_of(message: Message) -> u16 {
    match message {
        Message::Close(Some(frame)) => frame.code,
        other => panic!("expected a close frame, got {other:?}"),
    }
}

/// Drain everything queued so far.
fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

// ---------------------------------------------------------------------------
// Test: add/remove bookkeeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_and_remove_track_connection_count() {
    let manager = WsManager::default();
    assert_eq!(manager.connection_count().await, 0);

    let _rx = manager.add("conn-1".to_string(), None).await;
    assert_eq!(manager.connection_count().await, 1);

    manager.remove("nonexistent").await;
    assert_eq!(manager.connection_count().await, 1);

    manager.remove("conn-1").await;
    assert_eq!(manager.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: welcome message and initial state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn welcome_message_announces_auth_requirement() {
    let manager = WsManager::new(with_token("secret"));
    let mut rx = manager.add("conn-1".to_string(), None).await;

    let welcome = next_json(&mut rx);
    assert_eq!(welcome["type"], "connection");
    assert_eq!(welcome["connectionId"], "conn-1");
    assert_eq!(welcome["requiresAuth"], true);

    let meta = manager.metadata("conn-1").await.unwrap();
    assert_eq!(meta.state, ConnectionState::Connecting);
}

#[tokio::test]
async fn without_token_connections_start_authenticated() {
    let manager = WsManager::default();
    let _rx = manager.add("conn-1".to_string(), None).await;

    let meta = manager.metadata("conn-1").await.unwrap();
    assert_eq!(meta.state, ConnectionState::Authenticated);
}

// ---------------------------------------------------------------------------
// Test: authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn matching_token_authenticates() {
    let manager = WsManager::new(with_token("secret"));
    let mut rx = manager.add("conn-1".to_string(), None).await;
    drain(&mut rx);

    manager.authenticate("conn-1", "secret").await.unwrap();

    assert_eq!(next_json(&mut rx)["type"], "authenticated");
    let meta = manager.metadata("conn-1").await.unwrap();
    assert_eq!(meta.state, ConnectionState::Authenticated);
}

#[tokio::test]
async fn wrong_token_errors_and_closes_with_auth_failed() {
    let manager = WsManager::new(with_token("secret"));
    let mut rx = manager.add("conn-1".to_string(), None).await;
    drain(&mut rx);

    let result = manager.authenticate("conn-1", "guess").await;

    assert_matches!(result, Err(WsError::InvalidToken));
    assert_eq!(next_json(&mut rx)["type"], "error");
    assert_eq!(close_code_of(rx.try_recv().unwrap()), close_code::AUTH_FAILED);
    let meta = manager.metadata("conn-1").await.unwrap();
    assert_eq!(meta.state, ConnectionState::Error);
}

#[tokio::test]
async fn unauthenticated_connection_cannot_subscribe() {
    let manager = WsManager::new(with_token("secret"));
    let _rx = manager.add("conn-1".to_string(), None).await;

    let result = manager.subscribe("conn-1", "campaign:1".into(), None).await;
    assert_matches!(result, Err(WsError::NotAuthenticated));
}

#[tokio::test]
async fn auth_timeout_closes_with_distinct_code() {
    let manager = std::sync::Arc::new(WsManager::new(BroadcasterConfig {
        auth_timeout: Duration::from_millis(20),
        ..with_token("secret")
    }));
    let mut rx = manager.add("conn-1".to_string(), None).await;
    drain(&mut rx);

    let timer = manager
        .spawn_auth_timeout("conn-1".to_string())
        .expect("timer should start when a token is configured");
    timer.await.unwrap();

    assert_eq!(next_json(&mut rx)["type"], "error");
    assert_eq!(close_code_of(rx.try_recv().unwrap()), close_code::AUTH_TIMEOUT);
    assert_eq!(
        manager.metadata("conn-1").await.unwrap().state,
        ConnectionState::Error
    );
}

#[tokio::test]
async fn auth_timeout_spares_authenticated_connections() {
    let manager = WsManager::new(with_token("secret"));
    let mut rx = manager.add("conn-1".to_string(), None).await;
    manager.authenticate("conn-1", "secret").await.unwrap();
    drain(&mut rx);

    assert!(!manager.expire_unauthenticated("conn-1").await);
    assert!(drain(&mut rx).is_empty());
}

// ---------------------------------------------------------------------------
// Test: broadcast primitives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn channel_broadcast_reaches_only_subscribers() {
    let manager = WsManager::default();
    let mut rx_x = manager.add("conn-x".to_string(), None).await;
    let mut rx_y = manager.add("conn-y".to_string(), None).await;
    manager.subscribe("conn-x", "X".into(), None).await.unwrap();
    manager.subscribe("conn-y", "Y".into(), None).await.unwrap();
    drain(&mut rx_x);
    drain(&mut rx_y);

    let sent = manager
        .broadcast_to_channel("X", &ServerMessage::error("for X"), None)
        .await;

    assert_eq!(sent, 1);
    assert_eq!(next_json(&mut rx_x)["message"], "for X");
    assert!(drain(&mut rx_y).is_empty());
}

#[tokio::test]
async fn relay_excludes_the_sender() {
    let manager = WsManager::default();
    let mut rx_a = manager.add("conn-a".to_string(), None).await;
    let mut rx_b = manager.add("conn-b".to_string(), None).await;
    manager.subscribe("conn-a", "room".into(), None).await.unwrap();
    manager.subscribe("conn-b", "room".into(), None).await.unwrap();
    drain(&mut rx_a);
    drain(&mut rx_b);

    let sent = manager
        .relay("conn-a", "room", json!({"text": "hi"}))
        .await
        .unwrap();

    assert_eq!(sent, 1);
    assert!(drain(&mut rx_a).is_empty());
    let message = next_json(&mut rx_b);
    assert_eq!(message["type"], "message");
    assert_eq!(message["from"], "conn-a");
    assert_eq!(message["payload"]["text"], "hi");
}

#[tokio::test]
async fn broadcasts_skip_unauthenticated_connections() {
    let manager = WsManager::new(with_token("secret"));
    let mut rx_ready = manager.add("ready".to_string(), None).await;
    let mut rx_pending = manager.add("pending".to_string(), None).await;
    manager.authenticate("ready", "secret").await.unwrap();
    drain(&mut rx_ready);
    drain(&mut rx_pending);

    let sent = manager.broadcast_all(&ServerMessage::error("hello")).await;

    assert_eq!(sent, 1);
    assert_eq!(next_json(&mut rx_ready)["message"], "hello");
    assert!(drain(&mut rx_pending).is_empty());
}

#[tokio::test]
async fn user_and_client_targeting() {
    let manager = WsManager::default();
    let mut rx_1 = manager.add("conn-1".to_string(), None).await;
    let mut rx_2 = manager.add("conn-2".to_string(), None).await;
    manager.identify("conn-1", "user-1".into()).await.unwrap();
    manager
        .subscribe("conn-2", "campaign:1".into(), Some("tab-7".into()))
        .await
        .unwrap();
    drain(&mut rx_1);
    drain(&mut rx_2);

    let to_user = manager
        .broadcast_to_users(&["user-1".to_string()], &ServerMessage::error("user"))
        .await;
    let to_client = manager
        .send_to_client("tab-7", &ServerMessage::error("client"))
        .await;

    assert_eq!((to_user, to_client), (1, 1));
    assert_eq!(next_json(&mut rx_1)["message"], "user");
    assert_eq!(next_json(&mut rx_2)["message"], "client");
    assert!(drain(&mut rx_1).is_empty());
    assert_eq!(
        manager.metadata("conn-1").await.unwrap().state,
        ConnectionState::Active
    );
}

#[tokio::test]
async fn send_failure_marks_connection_error_without_aborting_broadcast() {
    let manager = WsManager::default();
    let rx_dead = manager.add("dead".to_string(), None).await;
    let mut rx_live = manager.add("live".to_string(), None).await;
    drop(rx_dead);
    drain(&mut rx_live);

    let sent = manager.broadcast_all(&ServerMessage::error("still here")).await;

    assert_eq!(sent, 1);
    assert_eq!(next_json(&mut rx_live)["message"], "still here");
    assert_eq!(
        manager.metadata("dead").await.unwrap().state,
        ConnectionState::Error
    );
}

// ---------------------------------------------------------------------------
// Test: heartbeat and cleanup sweeps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_pings_fresh_and_closes_idle_connections() {
    let manager = WsManager::new(BroadcasterConfig {
        idle_timeout: Duration::from_millis(50),
        ..BroadcasterConfig::default()
    });
    let mut rx_idle = manager.add("idle".to_string(), None).await;
    let mut rx_busy = manager.add("busy".to_string(), None).await;
    drain(&mut rx_idle);
    drain(&mut rx_busy);

    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.touch("busy").await;

    let closed = manager.heartbeat_sweep().await;

    assert_eq!(closed, 1);
    assert_eq!(
        close_code_of(rx_idle.try_recv().unwrap()),
        close_code::IDLE_TIMEOUT
    );
    assert_matches!(rx_busy.try_recv(), Ok(Message::Ping(_)));
    assert_eq!(
        manager.metadata("idle").await.unwrap().state,
        ConnectionState::Closing
    );
}

#[tokio::test]
async fn cleanup_removes_closed_transports() {
    let manager = WsManager::default();
    let rx_gone = manager.add("gone".to_string(), None).await;
    let _rx_kept = manager.add("kept".to_string(), None).await;
    drop(rx_gone);

    let removed = manager.cleanup_sweep().await;

    assert_eq!(removed, 1);
    assert_eq!(manager.connection_count().await, 1);
    assert!(manager.metadata("kept").await.is_some());
}

// ---------------------------------------------------------------------------
// Test: shutdown_all() sends going-away Close frames and clears
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let manager = WsManager::default();
    let mut rx1 = manager.add("conn-1".to_string(), None).await;
    let mut rx2 = manager.add("conn-2".to_string(), None).await;
    drain(&mut rx1);
    drain(&mut rx2);

    manager.shutdown_all().await;

    assert_eq!(manager.connection_count().await, 0);
    assert_eq!(close_code_of(rx1.recv().await.unwrap()), close_code::GOING_AWAY);
    assert_eq!(close_code_of(rx2.recv().await.unwrap()), close_code::GOING_AWAY);
    assert!(rx1.recv().await.is_none(), "Channel should be closed after shutdown");
}
