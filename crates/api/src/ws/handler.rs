use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::state::AppState;
use crate::ws::manager::{WsError, WsManager};
use crate::ws::protocol::{ClientMessage, ServerMessage};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with `WsManager` and
/// managed by a sender task plus the receive loop below.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.ws_manager, addr))
}

/// Manage a single WebSocket connection after upgrade.
///
///   1. Registers the connection (welcome message, auth timer).
///   2. Spawns a sender task that forwards messages from the manager channel.
///   3. Dispatches inbound messages until either side closes.
///   4. Cleans up on disconnect.
async fn handle_socket(socket: WebSocket, ws_manager: Arc<WsManager>, addr: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, ip = %addr.ip(), "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone(), Some(addr.ip())).await;
    let auth_timer = ws_manager.spawn_auth_timeout(conn_id.clone());

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the sink; stops after a
    // server-initiated Close.
    let sender_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    ws_manager.touch(&conn_id).await;
                    dispatch(&ws_manager, &conn_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Pong, Ping and binary frames only count as activity.
                    ws_manager.touch(&conn_id).await;
                }
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    }

    ws_manager.remove(&conn_id).await;
    send_task.abort();
    if let Some(timer) = auth_timer {
        timer.abort();
    }
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Parse and apply one client text frame, replying with an error frame on
/// malformed input or a refused command.
async fn dispatch(ws_manager: &WsManager, conn_id: &str, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(conn_id, error = %e, "Malformed WebSocket message");
            ws_manager
                .send_to(conn_id, &ServerMessage::error(format!("Invalid message: {e}")))
                .await;
            return;
        }
    };

    let result = match message {
        ClientMessage::Authenticate { token } => ws_manager.authenticate(conn_id, &token).await,
        ClientMessage::Identify { user_id } => ws_manager.identify(conn_id, user_id).await,
        ClientMessage::Join { channel, client_id } => {
            ws_manager.subscribe(conn_id, channel, client_id).await
        }
        ClientMessage::Unsubscribe { channel } => ws_manager.unsubscribe(conn_id, &channel).await,
        ClientMessage::Ping { timestamp } => {
            ws_manager
                .send_to(conn_id, &ServerMessage::pong(timestamp))
                .await;
            Ok(())
        }
        ClientMessage::Message { target, payload } => ws_manager
            .relay(conn_id, &target, payload)
            .await
            .map(|_| ()),
    };

    // A failed authentication already sent its own error and close frame.
    if let Err(e) = result {
        if e != WsError::InvalidToken {
            ws_manager
                .send_to(conn_id, &ServerMessage::error(e.to_string()))
                .await;
        }
    }
}
