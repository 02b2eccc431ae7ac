//! Event bus to status broadcaster relay.
//!
//! [`EventRelay`] subscribes to the [`EventBus`](renderflow_events::EventBus)
//! and pushes every render event to all eligible WebSocket connections.

use std::sync::Arc;

use renderflow_events::{BatchSummary, EventBus, RenderEvent};
use renderflow_scheduler::{RenderScheduler, SchedulerEvent};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::ws::{ServerMessage, WsManager};

pub struct EventRelay {
    ws_manager: Arc<WsManager>,
}

impl EventRelay {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Run until the bus closes or `cancel` fires.
    pub async fn run(
        self,
        mut receiver: broadcast::Receiver<RenderEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };
            match received {
                Ok(event) => {
                    let message = to_server_message(event);
                    let delivered = self.ws_manager.broadcast_all(&message).await;
                    tracing::trace!(delivered, "Relayed render event");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event relay lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event relay shutting down");
                    break;
                }
            }
        }
    }
}

/// Publish the scheduler's owner notifications on the event bus.
pub fn forward_scheduler_events(scheduler: &RenderScheduler, events: Arc<EventBus>) {
    scheduler.on_update(Arc::new(move |event: &SchedulerEvent| {
        let event = match event {
            SchedulerEvent::Update { update, job_id } => RenderEvent::CombinationUpdated {
                update: update.clone(),
                job_id: Some(job_id.clone()),
            },
            SchedulerEvent::AllDone { completed, failed } => {
                RenderEvent::BatchComplete(BatchSummary {
                    completed: *completed,
                    failed: *failed,
                })
            }
        };
        events.publish(event);
    }));
}

pub fn to_server_message(event: RenderEvent) -> ServerMessage {
    match event {
        RenderEvent::JobProgress(progress) => progress.into(),
        RenderEvent::CombinationUpdated { update, job_id } => {
            ServerMessage::CombinationUpdate { job_id, update }
        }
        RenderEvent::BatchComplete(summary) => summary.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::ws::Message;

    use super::*;

    #[tokio::test]
    async fn batch_complete_reaches_connected_clients() {
        let bus = EventBus::default();
        let manager = Arc::new(WsManager::default());
        let mut rx = manager.add("conn-1".into(), None).await;
        // Welcome frame.
        rx.recv().await.unwrap();

        let cancel = CancellationToken::new();
        let relay = tokio::spawn(EventRelay::new(manager.clone()).run(bus.subscribe(), cancel.clone()));

        bus.publish(RenderEvent::BatchComplete(BatchSummary {
            completed: 6,
            failed: 0,
        }));

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected a text frame, got {frame:?}");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "batch_complete");
        assert_eq!(value["completed"], 6);

        cancel.cancel();
        relay.await.unwrap();
    }
}
