use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

/// Spawn the heartbeat sweep: pings eligible connections and closes idle
/// ones every `heartbeat_interval`. Runs until `cancel` fires.
pub fn start_heartbeat(ws_manager: Arc<WsManager>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = ws_manager.config().heartbeat_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    ws_manager.heartbeat_sweep().await;
                }
            }
        }
        tracing::debug!("WebSocket heartbeat stopped");
    })
}

/// Spawn the cleanup sweep that drops connections with a closed transport
/// every `cleanup_interval`. Runs until `cancel` fires.
pub fn start_cleanup(ws_manager: Arc<WsManager>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = ws_manager.config().cleanup_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    ws_manager.cleanup_sweep().await;
                }
            }
        }
        tracing::debug!("WebSocket cleanup stopped");
    })
}
