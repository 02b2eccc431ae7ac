//! Realtime wire protocol.
//!
//! Every frame is a JSON text message tagged by `type`.

use axum::extract::ws::Message;
use renderflow_core::combination::CombinationUpdate;
use renderflow_core::render::RenderStatus;
use renderflow_events::{BatchSummary, JobProgress};
use serde::{Deserialize, Serialize};

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    Identify {
        user_id: String,
    },
    #[serde(alias = "subscribe")]
    Join {
        channel: String,
        #[serde(default)]
        client_id: Option<String>,
    },
    Unsubscribe {
        channel: String,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Routed to every other subscriber of `target`.
    Message {
        target: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// Messages pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Welcome frame sent right after the upgrade.
    Connection {
        connection_id: String,
        requires_auth: bool,
        server_time: i64,
    },
    Authenticated {
        connection_id: String,
    },
    Identified {
        user_id: String,
    },
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    Pong {
        server_time: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_time: Option<i64>,
    },
    Message {
        channel: String,
        from: String,
        payload: serde_json::Value,
    },
    JobProgress {
        job_id: String,
        status: RenderStatus,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumbnail_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CombinationUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        update: CombinationUpdate,
    },
    BatchComplete {
        completed: usize,
        failed: usize,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn pong(client_time: Option<i64>) -> Self {
        ServerMessage::Pong {
            server_time: now_millis(),
            client_time,
        }
    }

    /// Encode as a WebSocket text frame.
    pub fn to_frame(&self) -> Message {
        match serde_json::to_string(self) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server message");
                Message::Text(r#"{"type":"error","message":"encoding failed"}"#.into())
            }
        }
    }
}

impl From<JobProgress> for ServerMessage {
    fn from(p: JobProgress) -> Self {
        ServerMessage::JobProgress {
            job_id: p.job_id,
            status: p.status,
            progress: p.progress,
            result_url: p.result_url,
            thumbnail_url: p.thumbnail_url,
            error: p.error,
        }
    }
}

impl From<BatchSummary> for ServerMessage {
    fn from(s: BatchSummary) -> Self {
        ServerMessage::BatchComplete {
            completed: s.completed,
            failed: s.failed,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
