//! Bounded poll worker pool.
//!
//! A fixed number of workers share one queue of due job ids. Per-job
//! delay timers only re-enqueue ids, so the number of concurrent status
//! fetches never exceeds the worker count.

use std::sync::{Arc, Weak};

use renderflow_core::types::JobId;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::RenderAdapter;

pub(crate) fn spawn_workers(
    adapter: Weak<RenderAdapter>,
    rx: mpsc::UnboundedReceiver<JobId>,
    count: usize,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));

    (0..count.max(1))
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let adapter = adapter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = async { rx.lock().await.recv().await } => next,
                    };
                    let Some(job_id) = next else { break };
                    let Some(adapter) = adapter.upgrade() else { break };
                    adapter.poll_tick(job_id).await;
                }
                tracing::debug!(worker, "Poll worker stopped");
            })
        })
        .collect()
}
