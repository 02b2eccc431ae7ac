//! Render adapter: submission, polling, webhooks and status callbacks.
//!
//! [`RenderAdapter`] is created once at startup via [`RenderAdapter::start`]
//! and shared as an `Arc`. It exclusively owns the active-job map and the
//! callback registry. Polling and webhooks both converge on the same
//! transition path, which is idempotent: replays of a status the job has
//! already passed are logged and ignored.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use renderflow_core::execution::{ExecutionOutcome, ExecutionStore, ExecutionSubmission};
use renderflow_core::render::{RenderRequest, RenderSnapshot, RenderStatus, RenderStatusReport};
use renderflow_core::types::JobId;
use renderflow_events::{EventBus, JobProgress, RenderEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, RenderBackend, SubmitResponse};
use crate::poller;
use crate::registry::{
    DeliveryLane, JobRegistry, Registration, StatusCallback, Subscription, Transition,
};

/// Polling cadence and resource bounds.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between consecutive polls of one job.
    pub interval: Duration,
    /// Poll attempts before a job is failed locally.
    pub max_attempts: u32,
    /// Size of the shared poll worker pool.
    pub workers: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
            workers: 8,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Render submission failed: {0}")]
    SubmissionFailed(#[source] BackendError),

    #[error("Render job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What applying a status report did.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(RenderSnapshot),
    /// Same status and progress as already stored.
    Unchanged,
    /// Regression or replay after a terminal state.
    Ignored,
    UnknownJob,
}

/// Result of an inbound webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookOutcome {
    pub transition: TransitionOutcome,
    /// Whether the execution store held a matching record. `None` when no
    /// store write happened or the write failed.
    pub record_found: Option<bool>,
}

/// Wraps the rendering backend and tracks every job it submits.
pub struct RenderAdapter {
    backend: Arc<dyn RenderBackend>,
    store: Arc<dyn ExecutionStore>,
    events: Arc<EventBus>,
    registry: Mutex<JobRegistry>,
    poll_tx: mpsc::UnboundedSender<JobId>,
    config: PollConfig,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RenderAdapter {
    /// Build the adapter and spawn its poll worker pool.
    ///
    /// Returns a shared handle that is safe to clone into Axum state.
    pub fn start(
        backend: Arc<dyn RenderBackend>,
        store: Arc<dyn ExecutionStore>,
        events: Arc<EventBus>,
        config: PollConfig,
    ) -> Arc<Self> {
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker_count = config.workers;

        let adapter = Arc::new(Self {
            backend,
            store,
            events,
            registry: Mutex::new(JobRegistry::new()),
            poll_tx,
            config,
            cancel: cancel.clone(),
            workers: Mutex::new(Vec::new()),
        });

        let handles = poller::spawn_workers(Arc::downgrade(&adapter), poll_rx, worker_count, cancel);
        *lock(&adapter.workers) = handles;

        tracing::info!(
            backend = adapter.backend.name(),
            workers = worker_count,
            "Render adapter started",
        );
        adapter
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Submit a render and start tracking it at `queued`.
    ///
    /// On failure nothing is tracked and nothing is recorded.
    pub async fn submit(&self, request: &RenderRequest) -> Result<JobId, RenderError> {
        let ack = self
            .backend
            .submit(request)
            .await
            .map_err(RenderError::SubmissionFailed)?;

        tracing::info!(
            job_id = %ack.job_id,
            template_id = %request.template_id,
            backend = self.backend.name(),
            "Render submitted",
        );

        if let Some(campaign_id) = &request.campaign_id {
            let submission = ExecutionSubmission {
                campaign_id: campaign_id.clone(),
                job_id: ack.job_id.clone(),
                template_id: request.template_id.clone(),
                output_format: request.output_format,
            };
            if let Err(e) = self.store.record_submission(&submission).await {
                tracing::warn!(job_id = %ack.job_id, error = %e, "Failed to record execution");
            }
        }

        let job_id = ack.job_id.clone();
        self.track(&request.template_id, ack).await;
        Ok(job_id)
    }

    /// Request a preview render.
    ///
    /// Previews the backend completes synchronously come back already
    /// terminal; anything else is tracked like a normal submission.
    pub async fn preview(&self, request: &RenderRequest) -> Result<RenderSnapshot, RenderError> {
        let ack = self
            .backend
            .preview(request)
            .await
            .map_err(RenderError::SubmissionFailed)?;
        let job_id = ack.job_id.clone();
        self.track(&request.template_id, ack).await;
        self.snapshot(&job_id)
            .ok_or_else(|| RenderError::JobNotFound(job_id))
    }

    /// Fetch the backend status for a tracked job and apply it.
    ///
    /// Consumes one attempt of the job's poll budget whether or not the
    /// fetch succeeds.
    pub async fn poll(&self, job_id: &str) -> Result<TransitionOutcome, RenderError> {
        let attempt = self
            .registry()
            .record_attempt(job_id)
            .ok_or_else(|| RenderError::JobNotFound(job_id.to_string()))?;

        tracing::debug!(job_id, attempt, "Polling render status");
        let report = self.backend.fetch_status(job_id).await?;
        Ok(self.apply_report(report).await)
    }

    /// Current status of any job, tracked or not.
    ///
    /// Finished jobs answer from the last snapshot; everything else asks
    /// the backend, applying the answer when the job is tracked.
    pub async fn status(&self, job_id: &str) -> Result<RenderStatusReport, RenderError> {
        if let Some(snapshot) = self.snapshot(job_id) {
            if snapshot.status.is_terminal() {
                return Ok(report_from_snapshot(&snapshot));
            }
        }

        let report = match self.backend.fetch_status(job_id).await {
            Ok(report) => report,
            Err(BackendError::UnknownJob(id)) => return Err(RenderError::JobNotFound(id)),
            Err(e) => return Err(e.into()),
        };

        match self.apply_report(report.clone()).await {
            TransitionOutcome::Applied(snapshot) => Ok(report_from_snapshot(&snapshot)),
            _ => Ok(self
                .snapshot(job_id)
                .map(|s| report_from_snapshot(&s))
                .unwrap_or(report)),
        }
    }

    /// Apply a status report through the shared transition path.
    pub async fn apply_report(&self, report: RenderStatusReport) -> TransitionOutcome {
        self.apply_inner(report).await.0
    }

    /// Apply a pushed status report.
    ///
    /// Terminal reports for jobs this process never tracked still settle
    /// the execution record.
    pub async fn handle_webhook(&self, report: RenderStatusReport) -> WebhookOutcome {
        let job_id = report.job_id.clone();
        let status = report.status;
        let outcome = ExecutionOutcome {
            job_id: report.job_id.clone(),
            status: report.status,
            result_url: report.url.clone(),
            thumbnail_url: report.thumbnail_url.clone(),
            error: report.error.clone(),
        };

        let (transition, mut record_found) = self.apply_inner(report).await;
        if transition == TransitionOutcome::UnknownJob && status.is_terminal() {
            record_found = self.record_outcome(&outcome).await;
        }

        tracing::info!(
            job_id = %job_id,
            %status,
            ?record_found,
            applied = matches!(transition, TransitionOutcome::Applied(_)),
            "Render webhook received",
        );

        WebhookOutcome {
            transition,
            record_found,
        }
    }

    /// Register a callback for a job's status changes.
    ///
    /// The callback is invoked immediately with the job's current state,
    /// then with every later change until the job is terminal. For a job
    /// that already finished only the final state is delivered.
    ///
    /// Registration holds the job's delivery lane, so no newer change can
    /// reach the callback before its current-state call.
    pub fn on_status_update(
        &self,
        job_id: &str,
        callback: StatusCallback,
    ) -> Result<Subscription, RenderError> {
        let lane = self.registry().lane(job_id);
        let _order = lane.as_ref().map(DeliveryLane::lock);
        let registration = self.registry().subscribe(job_id, Arc::clone(&callback));
        match registration {
            Registration::Active(subscription, snapshot)
            | Registration::Finished(subscription, snapshot) => {
                invoke_callbacks(std::slice::from_ref(&callback), &snapshot);
                Ok(subscription)
            }
            Registration::Unknown => Err(RenderError::JobNotFound(job_id.to_string())),
        }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.registry().unsubscribe(subscription)
    }

    pub fn snapshot(&self, job_id: &str) -> Option<RenderSnapshot> {
        self.registry().snapshot(job_id)
    }

    /// Jobs not yet terminal.
    pub fn active_job_count(&self) -> usize {
        self.registry().active_len()
    }

    /// Callbacks currently registered across all active jobs.
    pub fn registry_len(&self) -> usize {
        self.registry().callback_count()
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.config
    }

    /// Stop the poll workers.
    ///
    /// Cancels the master token, then waits up to 5 seconds per worker
    /// for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down render adapter");
        self.cancel.cancel();

        let handles = std::mem::take(&mut *lock(&self.workers));
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        tracing::info!("Render adapter shut down complete");
    }

    // ---- crate-internal: poll loop ----

    /// One scheduled poll of `job_id`, run on a pool worker.
    pub(crate) async fn poll_tick(&self, job_id: JobId) {
        match self.poll(&job_id).await {
            Ok(_) => {}
            Err(RenderError::JobNotFound(_)) => return,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Render status poll failed");
            }
        }

        let attempts = {
            let registry = self.registry();
            if !registry.is_active(&job_id) {
                return;
            }
            registry.snapshot(&job_id).map(|s| s.attempts).unwrap_or(0)
        };

        if attempts >= self.config.max_attempts {
            self.expire(&job_id, attempts).await;
        } else {
            self.schedule_poll(job_id);
        }
    }

    /// Re-enqueue `job_id` for the worker pool after one poll interval.
    pub(crate) fn schedule_poll(&self, job_id: JobId) {
        let tx = self.poll_tx.clone();
        let cancel = self.cancel.clone();
        let interval = self.config.interval;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(interval) => {
                    let _ = tx.send(job_id);
                }
            }
        });
    }

    /// Fail a job whose poll budget is spent. A job that already reached
    /// a terminal state is left untouched.
    pub(crate) async fn expire(&self, job_id: &str, attempts: u32) {
        tracing::warn!(job_id, attempts, "Render poll budget exhausted");
        self.apply_report(RenderStatusReport {
            job_id: job_id.to_string(),
            status: RenderStatus::Failed,
            progress: None,
            url: None,
            thumbnail_url: None,
            error: Some(format!("Render did not finish after {attempts} status checks")),
        })
        .await;
    }

    // ---- private helpers ----

    fn registry(&self) -> MutexGuard<'_, JobRegistry> {
        lock(&self.registry)
    }

    /// Start tracking an acknowledged job and schedule its first poll.
    async fn track(&self, template_id: &str, ack: SubmitResponse) {
        let snapshot = RenderSnapshot {
            job_id: ack.job_id.clone(),
            template_id: template_id.to_string(),
            status: RenderStatus::Queued,
            progress: 0,
            result_url: None,
            thumbnail_url: None,
            error: None,
            attempts: 0,
            revision: 0,
            updated_at: Utc::now(),
        };
        let Some(lane) = self.registry().insert(snapshot.clone()) else {
            tracing::warn!(job_id = %ack.job_id, "Backend returned an already tracked job id");
            return;
        };
        {
            let delivered = lane.lock();
            if *delivered == 0 {
                self.events
                    .publish(RenderEvent::JobProgress(JobProgress::from(&snapshot)));
            }
        }

        if ack.status != RenderStatus::Queued {
            self.apply_report(ack.as_report()).await;
        }

        if self.registry().is_active(&ack.job_id) {
            self.schedule_poll(ack.job_id);
        }
    }

    async fn apply_inner(&self, report: RenderStatusReport) -> (TransitionOutcome, Option<bool>) {
        let transition = self.registry().apply(&report, Utc::now());

        match transition {
            Transition::Changed {
                snapshot,
                callbacks,
                lane,
                terminal,
            } => {
                tracing::debug!(
                    job_id = %snapshot.job_id,
                    status = %snapshot.status,
                    progress = snapshot.progress,
                    revision = snapshot.revision,
                    "Render status changed",
                );
                self.deliver(&lane, &callbacks, &snapshot);

                let record_found = if terminal {
                    self.record_outcome(&ExecutionOutcome {
                        job_id: snapshot.job_id.clone(),
                        status: snapshot.status,
                        result_url: snapshot.result_url.clone(),
                        thumbnail_url: snapshot.thumbnail_url.clone(),
                        error: snapshot.error.clone(),
                    })
                    .await
                } else {
                    None
                };
                (TransitionOutcome::Applied(snapshot), record_found)
            }
            Transition::Unchanged => (TransitionOutcome::Unchanged, None),
            Transition::Rejected { from, to } => {
                tracing::debug!(job_id = %report.job_id, %from, %to, "Ignoring invalid transition");
                (TransitionOutcome::Ignored, None)
            }
            Transition::AlreadyTerminal(status) => {
                tracing::info!(
                    job_id = %report.job_id,
                    %status,
                    reported = %report.status,
                    "Ignoring status for finished job",
                );
                (TransitionOutcome::Ignored, None)
            }
            Transition::UnknownJob => (TransitionOutcome::UnknownJob, None),
        }
    }

    /// Publish a change and run the job's callbacks in revision order.
    ///
    /// A snapshot older than one the lane already delivered is dropped.
    fn deliver(
        &self,
        lane: &DeliveryLane,
        callbacks: &[StatusCallback],
        snapshot: &RenderSnapshot,
    ) {
        let mut delivered = lane.lock();
        if snapshot.revision <= *delivered {
            tracing::debug!(
                job_id = %snapshot.job_id,
                revision = snapshot.revision,
                delivered = *delivered,
                "Dropping stale status delivery",
            );
            return;
        }
        *delivered = snapshot.revision;
        self.events
            .publish(RenderEvent::JobProgress(JobProgress::from(snapshot)));
        invoke_callbacks(callbacks, snapshot);
    }

    /// Best-effort execution-store write. Failures are logged and
    /// reported as `None`.
    async fn record_outcome(&self, outcome: &ExecutionOutcome) -> Option<bool> {
        match self.store.record_outcome(outcome).await {
            Ok(found) => {
                if !found {
                    tracing::debug!(job_id = %outcome.job_id, "No execution record for job");
                }
                Some(found)
            }
            Err(e) => {
                tracing::error!(
                    job_id = %outcome.job_id,
                    error = %e,
                    "Failed to update execution record",
                );
                None
            }
        }
    }
}

/// Run each callback in order, isolating panics so one faulty callback
/// cannot stop the rest.
fn invoke_callbacks(callbacks: &[StatusCallback], snapshot: &RenderSnapshot) {
    for (index, callback) in callbacks.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
            tracing::warn!(
                job_id = %snapshot.job_id,
                callback = index,
                "Status callback panicked",
            );
        }
    }
}

fn report_from_snapshot(snapshot: &RenderSnapshot) -> RenderStatusReport {
    RenderStatusReport {
        job_id: snapshot.job_id.clone(),
        status: snapshot.status,
        progress: Some(snapshot.progress),
        url: snapshot.result_url.clone(),
        thumbnail_url: snapshot.thumbnail_url.clone(),
        error: snapshot.error.clone(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use renderflow_core::execution::{InMemoryExecutionStore, StoreError};
    use renderflow_core::render::OutputFormat;

    use super::*;
    use crate::backend::OfflineBackend;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Backend that accepts submissions and reports whatever it is told.
    #[derive(Default)]
    struct ScriptedBackend {
        fail_submit: bool,
        fail_fetch: bool,
        fetches: AtomicU32,
        next_id: AtomicU32,
    }

    #[async_trait::async_trait]
    impl RenderBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn submit(&self, _request: &RenderRequest) -> Result<SubmitResponse, BackendError> {
            if self.fail_submit {
                return Err(BackendError::Rejected("quota exceeded".into()));
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(SubmitResponse {
                job_id: format!("job-{n}"),
                status: RenderStatus::Queued,
                url: None,
                thumbnail_url: None,
            })
        }

        async fn preview(&self, request: &RenderRequest) -> Result<SubmitResponse, BackendError> {
            self.submit(request).await
        }

        async fn fetch_status(&self, job_id: &str) -> Result<RenderStatusReport, BackendError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(BackendError::Rejected("timeout".into()));
            }
            Ok(RenderStatusReport {
                job_id: job_id.to_string(),
                status: RenderStatus::Processing,
                progress: Some(10),
                url: None,
                thumbnail_url: None,
                error: None,
            })
        }
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl ExecutionStore for BrokenStore {
        async fn record_submission(&self, _: &ExecutionSubmission) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn record_outcome(&self, _: &ExecutionOutcome) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn request(campaign_id: Option<&str>) -> RenderRequest {
        RenderRequest {
            template_id: "tpl-1".into(),
            modifications: HashMap::from([("headline".into(), "Hello".into())]),
            output_format: OutputFormat::Mp4,
            campaign_id: campaign_id.map(str::to_string),
        }
    }

    /// Polling effectively disabled so tests drive transitions by hand.
    fn manual() -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(3600),
            max_attempts: 60,
            workers: 1,
        }
    }

    fn fast(max_attempts: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(10),
            max_attempts,
            workers: 2,
        }
    }

    fn adapter_with(
        backend: impl RenderBackend + 'static,
        store: Arc<dyn ExecutionStore>,
        config: PollConfig,
    ) -> Arc<RenderAdapter> {
        RenderAdapter::start(Arc::new(backend), store, Arc::new(EventBus::default()), config)
    }

    fn completed(job_id: &str) -> RenderStatusReport {
        RenderStatusReport {
            job_id: job_id.into(),
            status: RenderStatus::Completed,
            progress: None,
            url: Some(format!("https://cdn.local/{job_id}.mp4")),
            thumbnail_url: None,
            error: None,
        }
    }

    fn adapter_snapshot(job_id: &str) -> RenderSnapshot {
        RenderSnapshot {
            job_id: job_id.into(),
            template_id: "tpl-1".into(),
            status: RenderStatus::Queued,
            progress: 0,
            result_url: None,
            thumbnail_url: None,
            error: None,
            attempts: 0,
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    fn recorder() -> (StatusCallback, Arc<Mutex<Vec<RenderSnapshot>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: StatusCallback = Arc::new(move |s: &RenderSnapshot| {
            sink.lock().unwrap().push(s.clone());
        });
        (cb, seen)
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..300 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn submit_tracks_job_at_queued() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let adapter = adapter_with(ScriptedBackend::default(), store.clone(), manual());

        let job_id = adapter.submit(&request(Some("camp-1"))).await.unwrap();

        let snapshot = adapter.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.status, RenderStatus::Queued);
        assert_eq!(snapshot.revision, 0);
        assert_eq!(store.get(&job_id).unwrap().campaign_id, "camp-1");
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn failed_submission_creates_no_record() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let backend = ScriptedBackend {
            fail_submit: true,
            ..Default::default()
        };
        let adapter = adapter_with(backend, store.clone(), manual());

        let err = adapter.submit(&request(Some("camp-1"))).await.unwrap_err();

        assert_matches!(err, RenderError::SubmissionFailed(BackendError::Rejected(_)));
        assert_eq!(adapter.active_job_count(), 0);
        assert!(store.is_empty());
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn unavailable_store_does_not_fail_render() {
        let adapter = adapter_with(ScriptedBackend::default(), Arc::new(BrokenStore), manual());

        let job_id = adapter.submit(&request(Some("camp-1"))).await.unwrap();
        let outcome = adapter.handle_webhook(completed(&job_id)).await;

        assert_matches!(outcome.transition, TransitionOutcome::Applied(ref s) if s.status == RenderStatus::Completed);
        assert_eq!(outcome.record_found, None);
        adapter.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Idempotent transitions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn duplicate_completion_does_not_refire_callbacks() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let job_id = adapter.submit(&request(None)).await.unwrap();
        let (cb, seen) = recorder();
        adapter.on_status_update(&job_id, cb).unwrap();

        adapter.apply_report(completed(&job_id)).await;
        let replay = adapter.apply_report(completed(&job_id)).await;
        let mut late_failure = completed(&job_id);
        late_failure.status = RenderStatus::Failed;
        let regression = adapter.handle_webhook(late_failure).await;

        assert_eq!(replay, TransitionOutcome::Ignored);
        assert_eq!(regression.transition, TransitionOutcome::Ignored);
        let seen = seen.lock().unwrap();
        // Immediate delivery at queued, then the completion.
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].status, RenderStatus::Completed);
        assert_eq!(adapter.snapshot(&job_id).unwrap().status, RenderStatus::Completed);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn webhook_for_untracked_job_still_updates_record() {
        let store = Arc::new(InMemoryExecutionStore::new());
        store
            .record_submission(&ExecutionSubmission {
                campaign_id: "camp-1".into(),
                job_id: "external-1".into(),
                template_id: "tpl-1".into(),
                output_format: OutputFormat::Mp4,
            })
            .await
            .unwrap();
        let adapter = adapter_with(ScriptedBackend::default(), store.clone(), manual());

        let outcome = adapter.handle_webhook(completed("external-1")).await;

        assert_eq!(outcome.transition, TransitionOutcome::UnknownJob);
        assert_eq!(outcome.record_found, Some(true));
        assert_eq!(store.get("external-1").unwrap().status, RenderStatus::Completed);

        let missing = adapter.handle_webhook(completed("nobody")).await;
        assert_eq!(missing.record_found, Some(false));
        adapter.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Callback registry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn late_registration_receives_current_state() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let job_id = adapter.submit(&request(None)).await.unwrap();
        adapter.poll(&job_id).await.unwrap();

        let (cb, seen) = recorder();
        adapter.on_status_update(&job_id, cb).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, RenderStatus::Processing);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn registration_after_terminal_does_not_replay_transitions() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let job_id = adapter.submit(&request(None)).await.unwrap();
        adapter.poll(&job_id).await.unwrap();
        adapter.apply_report(completed(&job_id)).await;

        let (cb, seen) = recorder();
        adapter.on_status_update(&job_id, cb).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, RenderStatus::Completed);
        assert_eq!(adapter.registry_len(), 0);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn registry_is_empty_after_completion() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let mut jobs = Vec::new();
        for _ in 0..3 {
            let job_id = adapter.submit(&request(None)).await.unwrap();
            adapter
                .on_status_update(&job_id, Arc::new(|_: &RenderSnapshot| {}))
                .unwrap();
            jobs.push(job_id);
        }
        assert_eq!(adapter.registry_len(), 3);

        for job_id in &jobs {
            adapter.apply_report(completed(job_id)).await;
        }

        assert_eq!(adapter.registry_len(), 0);
        assert_eq!(adapter.active_job_count(), 0);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_callback_does_not_block_others() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let job_id = adapter.submit(&request(None)).await.unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        adapter
            .on_status_update(
                &job_id,
                Arc::new(|s: &RenderSnapshot| {
                    if s.status.is_terminal() {
                        panic!("faulty subscriber");
                    }
                }),
            )
            .unwrap();
        let counter = Arc::clone(&hits);
        adapter
            .on_status_update(
                &job_id,
                Arc::new(move |_: &RenderSnapshot| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        adapter.apply_report(completed(&job_id)).await;

        // Immediate delivery plus the completion.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.registry_len(), 0);
        adapter.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reports_reach_callbacks_in_order() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let job_id = adapter.submit(&request(None)).await.unwrap();

        // A slow subscriber keeps the processing delivery busy while the
        // completion arrives.
        adapter
            .on_status_update(
                &job_id,
                Arc::new(|s: &RenderSnapshot| {
                    if s.status == RenderStatus::Processing {
                        std::thread::sleep(Duration::from_millis(300));
                    }
                }),
            )
            .unwrap();
        let (cb, seen) = recorder();
        adapter.on_status_update(&job_id, cb).unwrap();

        let processing = RenderStatusReport {
            job_id: job_id.clone(),
            status: RenderStatus::Processing,
            progress: Some(40),
            url: None,
            thumbnail_url: None,
            error: None,
        };
        let first = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.apply_report(processing).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = {
            let adapter = Arc::clone(&adapter);
            let report = completed(&job_id);
            tokio::spawn(async move { adapter.apply_report(report).await })
        };
        first.await.unwrap();
        second.await.unwrap();

        let statuses: Vec<RenderStatus> = seen.lock().unwrap().iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                RenderStatus::Queued,
                RenderStatus::Processing,
                RenderStatus::Completed
            ]
        );
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn stale_revision_is_not_delivered() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let lane = DeliveryLane::default();
        let (cb, seen) = recorder();
        let mut snapshot = adapter_snapshot("job-x");

        snapshot.revision = 2;
        snapshot.status = RenderStatus::Completed;
        adapter.deliver(&lane, std::slice::from_ref(&cb), &snapshot);
        snapshot.revision = 1;
        snapshot.status = RenderStatus::Processing;
        adapter.deliver(&lane, std::slice::from_ref(&cb), &snapshot);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, RenderStatus::Completed);
        assert_eq!(*lane.lock(), 2);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_job_registration_is_an_error() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let result = adapter.on_status_update("missing", Arc::new(|_: &RenderSnapshot| {}));
        assert_matches!(result, Err(RenderError::JobNotFound(id)) if id == "missing");
        adapter.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn poll_error_consumes_an_attempt() {
        let backend = ScriptedBackend {
            fail_fetch: true,
            ..Default::default()
        };
        let adapter = adapter_with(backend, Arc::new(InMemoryExecutionStore::new()), manual());
        let job_id = adapter.submit(&request(None)).await.unwrap();

        let result = adapter.poll(&job_id).await;

        assert_matches!(result, Err(RenderError::Backend(_)));
        let snapshot = adapter.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.attempts, 1);
        assert_eq!(snapshot.status, RenderStatus::Queued);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_budget_fails_the_job() {
        let backend = ScriptedBackend {
            fail_fetch: true,
            ..Default::default()
        };
        let adapter = adapter_with(backend, Arc::new(InMemoryExecutionStore::new()), fast(3));
        let job_id = adapter.submit(&request(None)).await.unwrap();
        let (cb, seen) = recorder();
        adapter.on_status_update(&job_id, cb).unwrap();

        wait_until(|| adapter.active_job_count() == 0).await;

        let snapshot = adapter.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.status, RenderStatus::Failed);
        assert_eq!(snapshot.attempts, 3);
        assert!(snapshot.error.unwrap().contains("3 status checks"));
        assert_eq!(seen.lock().unwrap().last().unwrap().status, RenderStatus::Failed);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn expiry_does_not_overwrite_backend_terminal_status() {
        let adapter = adapter_with(
            ScriptedBackend::default(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let job_id = adapter.submit(&request(None)).await.unwrap();
        adapter.apply_report(completed(&job_id)).await;

        adapter.expire(&job_id, 60).await;

        assert_eq!(adapter.snapshot(&job_id).unwrap().status, RenderStatus::Completed);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn offline_backend_runs_to_completion() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let adapter = adapter_with(OfflineBackend::new(), store.clone(), fast(60));
        let job_id = adapter.submit(&request(Some("camp-9"))).await.unwrap();
        let (cb, seen) = recorder();
        adapter.on_status_update(&job_id, cb).unwrap();

        wait_until(|| adapter.active_job_count() == 0).await;

        let statuses: Vec<RenderStatus> = seen.lock().unwrap().iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                RenderStatus::Queued,
                RenderStatus::Processing,
                RenderStatus::Completed
            ]
        );
        assert_eq!(store.get(&job_id).unwrap().status, RenderStatus::Completed);
        assert_eq!(adapter.registry_len(), 0);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn offline_preview_is_completed_immediately() {
        let adapter = adapter_with(
            OfflineBackend::new(),
            Arc::new(InMemoryExecutionStore::new()),
            manual(),
        );
        let snapshot = adapter.preview(&request(None)).await.unwrap();
        assert_eq!(snapshot.status, RenderStatus::Completed);
        assert!(snapshot.result_url.is_some());
        assert_eq!(adapter.active_job_count(), 0);
        adapter.shutdown().await;
    }
}
