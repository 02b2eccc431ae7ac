use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use renderflow_core::types::Timestamp;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::config::BroadcasterConfig;
use crate::ws::protocol::{now_millis, ServerMessage};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Close codes sent when the server ends a connection.
pub mod close_code {
    pub const GOING_AWAY: u16 = 1001;
    pub const AUTH_FAILED: u16 = 4001;
    pub const AUTH_TIMEOUT: u16 = 4002;
    pub const IDLE_TIMEOUT: u16 = 4003;
}

/// Per-connection lifecycle.
///
/// `connecting -> authenticated -> active -> closing`, or `error` from any
/// state. Only `authenticated` and `active` connections receive broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Active,
    Closing,
    Error,
}

impl ConnectionState {
    pub fn can_receive(self) -> bool {
        matches!(self, ConnectionState::Authenticated | ConnectionState::Active)
    }
}

/// What the broadcaster knows about one connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    pub id: String,
    pub ip: Option<IpAddr>,
    pub connected_at: Timestamp,
    pub last_active_at: Timestamp,
    pub state: ConnectionState,
    pub channels: BTreeSet<String>,
    pub user_id: Option<String>,
    /// Opaque id supplied by the client when joining a channel.
    pub client_id: Option<String>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WsError {
    #[error("Unknown connection")]
    UnknownConnection,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Authentication failed")]
    InvalidToken,
}

struct WsConnection {
    meta: ConnectionMetadata,
    sender: WsSender,
    last_seen: Instant,
}

impl WsConnection {
    /// Queue a frame. A dead channel marks the connection as errored.
    fn send(&mut self, message: Message) -> bool {
        if self.sender.send(message).is_ok() {
            return true;
        }
        if self.meta.state != ConnectionState::Error {
            tracing::warn!(conn_id = %self.meta.id, "WebSocket send failed");
            self.meta.state = ConnectionState::Error;
        }
        false
    }

    fn close(&mut self, state: ConnectionState, code: u16, reason: &'static str) {
        self.meta.state = state;
        let _ = self.sender.send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        })));
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.meta.last_active_at = chrono::Utc::now();
    }

    fn require_authenticated(&self) -> Result<(), WsError> {
        if self.meta.state.can_receive() {
            Ok(())
        } else {
            Err(WsError::NotAuthenticated)
        }
    }
}

/// The status broadcaster: every live WebSocket connection and its state.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
    config: BroadcasterConfig,
}

impl WsManager {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    /// Register a new connection and queue its welcome message.
    ///
    /// Without a configured token the connection starts `authenticated`.
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: String, ip: Option<IpAddr>) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let requires_auth = self.config.auth_token.is_some();
        let now = chrono::Utc::now();

        let mut conn = WsConnection {
            meta: ConnectionMetadata {
                id: conn_id.clone(),
                ip,
                connected_at: now,
                last_active_at: now,
                state: if requires_auth {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Authenticated
                },
                channels: BTreeSet::new(),
                user_id: None,
                client_id: None,
            },
            sender: tx,
            last_seen: Instant::now(),
        };
        conn.send(
            ServerMessage::Connection {
                connection_id: conn_id.clone(),
                requires_auth,
                server_time: now_millis(),
            }
            .to_frame(),
        );

        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection by its ID.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Record inbound traffic for the idle check.
    pub async fn touch(&self, conn_id: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(conn_id) {
            conn.touch();
        }
    }

    // -----------------------------------------------------------------------
    // Client commands
    // -----------------------------------------------------------------------

    /// Check `token` against the configured one.
    ///
    /// A mismatch moves the connection to `error` and closes it with
    /// [`close_code::AUTH_FAILED`].
    pub async fn authenticate(&self, conn_id: &str, token: &str) -> Result<(), WsError> {
        let mut conns = self.connections.write().await;
        let conn = conns.get_mut(conn_id).ok_or(WsError::UnknownConnection)?;

        if let Some(expected) = &self.config.auth_token {
            if expected != token {
                tracing::warn!(conn_id, "WebSocket authentication failed");
                conn.send(ServerMessage::error("Authentication failed").to_frame());
                conn.close(
                    ConnectionState::Error,
                    close_code::AUTH_FAILED,
                    "authentication failed",
                );
                return Err(WsError::InvalidToken);
            }
        }

        match conn.meta.state {
            ConnectionState::Connecting => conn.meta.state = ConnectionState::Authenticated,
            ConnectionState::Authenticated | ConnectionState::Active => {}
            ConnectionState::Closing | ConnectionState::Error => {
                return Err(WsError::NotAuthenticated)
            }
        }
        conn.send(
            ServerMessage::Authenticated {
                connection_id: conn_id.to_string(),
            }
            .to_frame(),
        );
        tracing::debug!(conn_id, "WebSocket authenticated");
        Ok(())
    }

    /// Associate a user id with the connection.
    pub async fn identify(&self, conn_id: &str, user_id: String) -> Result<(), WsError> {
        let mut conns = self.connections.write().await;
        let conn = conns.get_mut(conn_id).ok_or(WsError::UnknownConnection)?;
        conn.require_authenticated()?;

        conn.meta.user_id = Some(user_id.clone());
        conn.meta.state = ConnectionState::Active;
        conn.send(ServerMessage::Identified { user_id }.to_frame());
        Ok(())
    }

    /// Join `channel`, optionally tagging the connection with a client id.
    pub async fn subscribe(
        &self,
        conn_id: &str,
        channel: String,
        client_id: Option<String>,
    ) -> Result<(), WsError> {
        let mut conns = self.connections.write().await;
        let conn = conns.get_mut(conn_id).ok_or(WsError::UnknownConnection)?;
        conn.require_authenticated()?;

        if client_id.is_some() {
            conn.meta.client_id = client_id;
        }
        conn.meta.channels.insert(channel.clone());
        conn.meta.state = ConnectionState::Active;
        conn.send(ServerMessage::Subscribed { channel }.to_frame());
        Ok(())
    }

    pub async fn unsubscribe(&self, conn_id: &str, channel: &str) -> Result<(), WsError> {
        let mut conns = self.connections.write().await;
        let conn = conns.get_mut(conn_id).ok_or(WsError::UnknownConnection)?;
        conn.require_authenticated()?;

        conn.meta.channels.remove(channel);
        conn.send(
            ServerMessage::Unsubscribed {
                channel: channel.to_string(),
            }
            .to_frame(),
        );
        Ok(())
    }

    /// Route a client payload to the other subscribers of `channel`.
    pub async fn relay(
        &self,
        conn_id: &str,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<usize, WsError> {
        {
            let conns = self.connections.read().await;
            let conn = conns.get(conn_id).ok_or(WsError::UnknownConnection)?;
            conn.require_authenticated()?;
        }
        let message = ServerMessage::Message {
            channel: channel.to_string(),
            from: conn_id.to_string(),
            payload,
        };
        Ok(self
            .broadcast_to_channel(channel, &message, Some(conn_id))
            .await)
    }

    /// Send directly to one connection regardless of its state.
    pub async fn send_to(&self, conn_id: &str, message: &ServerMessage) -> bool {
        match self.connections.write().await.get_mut(conn_id) {
            Some(conn) => conn.send(message.to_frame()),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Broadcast primitives
    // -----------------------------------------------------------------------

    /// Send `message` to every eligible connection accepted by `filter`.
    ///
    /// Returns the number of connections the message was queued for.
    async fn fan_out(
        &self,
        message: &ServerMessage,
        filter: impl Fn(&ConnectionMetadata) -> bool,
    ) -> usize {
        let frame = message.to_frame();
        let mut conns = self.connections.write().await;
        let mut sent = 0;
        for conn in conns.values_mut() {
            if conn.meta.state.can_receive() && filter(&conn.meta) && conn.send(frame.clone()) {
                sent += 1;
            }
        }
        sent
    }

    pub async fn broadcast_all(&self, message: &ServerMessage) -> usize {
        self.fan_out(message, |_| true).await
    }

    pub async fn broadcast_to_users(&self, user_ids: &[String], message: &ServerMessage) -> usize {
        self.fan_out(message, |meta| {
            meta.user_id
                .as_ref()
                .is_some_and(|user| user_ids.contains(user))
        })
        .await
    }

    /// Fan out to subscribers of `channel`, skipping `exclude` (the sender).
    pub async fn broadcast_to_channel(
        &self,
        channel: &str,
        message: &ServerMessage,
        exclude: Option<&str>,
    ) -> usize {
        self.fan_out(message, |meta| {
            meta.channels.contains(channel) && Some(meta.id.as_str()) != exclude
        })
        .await
    }

    pub async fn send_to_client(&self, client_id: &str, message: &ServerMessage) -> usize {
        self.fan_out(message, |meta| meta.client_id.as_deref() == Some(client_id))
            .await
    }

    // -----------------------------------------------------------------------
    // Sweeps and lifecycle
    // -----------------------------------------------------------------------

    /// Ping every eligible connection and close those idle for longer than
    /// the configured timeout. Returns how many were closed.
    pub async fn heartbeat_sweep(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let mut conns = self.connections.write().await;
        let mut closed = 0;
        for conn in conns.values_mut() {
            if !conn.meta.state.can_receive() {
                continue;
            }
            if conn.last_seen.elapsed() > idle_timeout {
                tracing::info!(conn_id = %conn.meta.id, "Closing idle WebSocket connection");
                conn.close(
                    ConnectionState::Closing,
                    close_code::IDLE_TIMEOUT,
                    "idle timeout",
                );
                closed += 1;
            } else {
                conn.send(Message::Ping(Bytes::new()));
            }
        }
        tracing::debug!(count = conns.len(), closed, "WebSocket heartbeat sweep");
        closed
    }

    /// Drop connections whose outbound channel is already closed.
    pub async fn cleanup_sweep(&self) -> usize {
        let mut conns = self.connections.write().await;
        let before = conns.len();
        conns.retain(|_, conn| !conn.sender.is_closed());
        let removed = before - conns.len();
        if removed > 0 {
            tracing::debug!(removed, "Removed closed WebSocket connections");
        }
        removed
    }

    /// Close the connection with [`close_code::AUTH_TIMEOUT`] if it is
    /// still waiting to authenticate.
    pub async fn expire_unauthenticated(&self, conn_id: &str) -> bool {
        let mut conns = self.connections.write().await;
        let Some(conn) = conns.get_mut(conn_id) else {
            return false;
        };
        if conn.meta.state != ConnectionState::Connecting {
            return false;
        }
        tracing::info!(conn_id, "WebSocket authentication timed out");
        conn.send(ServerMessage::error("Authentication timeout").to_frame());
        conn.close(
            ConnectionState::Error,
            close_code::AUTH_TIMEOUT,
            "authentication timeout",
        );
        true
    }

    /// Start the authentication timer for a new connection. Returns `None`
    /// when no token is configured.
    pub fn spawn_auth_timeout(self: &Arc<Self>, conn_id: String) -> Option<JoinHandle<()>> {
        self.config.auth_token.as_ref()?;
        let manager = Arc::clone(self);
        let timeout = self.config.auth_timeout;
        Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.expire_unauthenticated(&conn_id).await;
        }))
    }

    /// Mark every connection closing, send a going-away Close frame, then
    /// clear the map.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values_mut() {
            conn.close(
                ConnectionState::Closing,
                close_code::GOING_AWAY,
                "server shutting down",
            );
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn metadata(&self, conn_id: &str) -> Option<ConnectionMetadata> {
        self.connections
            .read()
            .await
            .get(conn_id)
            .map(|conn| conn.meta.clone())
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}
