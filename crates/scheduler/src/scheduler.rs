use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError, Weak};
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use renderflow_core::combination::{Combination, CombinationStatus, CombinationUpdate};
use renderflow_core::render::{
    OutputFormat, Priority, RenderJob, RenderRequest, RenderSnapshot, RenderStatus,
};
use renderflow_core::types::CombinationId;
use renderflow_render::{RenderAdapter, StatusCallback, Subscription};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::PendingQueue;
use crate::resolver::AssetResolver;

/// Finished jobs kept for [`RenderScheduler::list_jobs`].
const FINISHED_JOB_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Submissions in flight per wave.
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

/// What a job renders and where its execution is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTarget {
    pub template_id: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

impl From<&str> for JobTarget {
    fn from(template_id: &str) -> Self {
        Self {
            template_id: template_id.to_string(),
            output_format: OutputFormat::default(),
            campaign_id: None,
        }
    }
}

/// Notifications delivered to the scheduler's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A combination changed state because of its job.
    Update {
        update: CombinationUpdate,
        job_id: String,
    },
    /// Every outstanding job has finished.
    AllDone { completed: usize, failed: usize },
}

pub type UpdateCallback = Arc<dyn Fn(&SchedulerEvent) + Send + Sync>;

struct TrackedJob {
    job: RenderJob,
    request: RenderRequest,
    subscription: Option<Subscription>,
    last_revision: Option<u64>,
    last_emitted: Option<(CombinationStatus, u8)>,
}

#[derive(Default)]
struct SchedulerState {
    pending: PendingQueue,
    jobs: IndexMap<String, TrackedJob>,
    /// Current job per combination. Older jobs for the same combination
    /// are superseded and dropped from `jobs`.
    current: HashMap<CombinationId, String>,
    outstanding: usize,
    completed: usize,
    failed: usize,
    cycle_active: bool,
    outbox: Vec<SchedulerEvent>,
}

impl SchedulerState {
    /// Queue a fresh job for `combination`, superseding any earlier one.
    /// Returns the new job id and the superseded job's subscription.
    fn admit(
        &mut self,
        combination: &Combination,
        target: &JobTarget,
        priority: Priority,
        resolver: &dyn AssetResolver,
    ) -> (String, Option<Subscription>) {
        let stale = self.supersede(&combination.id);

        if !self.cycle_active {
            self.cycle_active = true;
            self.completed = 0;
            self.failed = 0;
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let job = RenderJob {
            id: job_id.clone(),
            combination_id: combination.id.clone(),
            template_id: target.template_id.clone(),
            priority,
            status: RenderStatus::Queued,
            progress: 0,
            render_id: None,
            result_url: None,
            thumbnail_url: None,
            error: None,
            attempts: 0,
        };
        let request = RenderRequest {
            template_id: target.template_id.clone(),
            modifications: resolver.modifications(combination),
            output_format: target.output_format,
            campaign_id: target.campaign_id.clone(),
        };

        self.jobs.insert(
            job_id.clone(),
            TrackedJob {
                job,
                request,
                subscription: None,
                last_revision: None,
                last_emitted: None,
            },
        );
        self.current.insert(combination.id.clone(), job_id.clone());
        self.pending.push(job_id.clone(), priority);
        self.outstanding += 1;
        (job_id, stale)
    }

    fn supersede(&mut self, combination_id: &str) -> Option<Subscription> {
        let old_id = self.current.remove(combination_id)?;
        let old = self.jobs.shift_remove(&old_id)?;
        if !old.job.status.is_terminal() {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
        tracing::debug!(job_id = %old_id, combination_id, "Superseded render job");
        old.subscription
    }

    /// Pop up to `width` live jobs and mark their combinations generating.
    fn next_wave(&mut self, width: usize) -> Vec<(String, RenderRequest)> {
        let mut wave = Vec::with_capacity(width);
        while wave.len() < width {
            let Some(job_id) = self.pending.pop() else {
                break;
            };
            // Superseded entries are skipped here rather than removed.
            let Some(tracked) = self.jobs.get(&job_id) else {
                continue;
            };
            let request = tracked.request.clone();
            self.emit_update(&job_id, CombinationStatus::Generating, 0, None, None);
            wave.push((job_id, request));
        }
        wave
    }

    /// Queue an owner update unless it repeats the last one for this job.
    fn emit_update(
        &mut self,
        job_id: &str,
        status: CombinationStatus,
        progress: u8,
        preview_url: Option<String>,
        error: Option<String>,
    ) {
        let Some(tracked) = self.jobs.get_mut(job_id) else {
            return;
        };
        if preview_url.is_none() && tracked.last_emitted == Some((status, progress)) {
            return;
        }
        tracked.last_emitted = Some((status, progress));
        self.outbox.push(SchedulerEvent::Update {
            update: CombinationUpdate {
                combination_id: tracked.job.combination_id.clone(),
                status,
                progress,
                preview_url,
                error,
            },
            job_id: job_id.to_string(),
        });
    }

    /// Count a job's terminal status and close the cycle when nothing is
    /// left outstanding.
    fn finish(&mut self, status: RenderStatus) {
        match status {
            RenderStatus::Completed => self.completed += 1,
            _ => self.failed += 1,
        }
        self.outstanding = self.outstanding.saturating_sub(1);
        self.close_cycle_if_idle();
        self.prune_finished();
    }

    fn close_cycle_if_idle(&mut self) {
        if self.cycle_active && self.outstanding == 0 {
            self.cycle_active = false;
            self.outbox.push(SchedulerEvent::AllDone {
                completed: self.completed,
                failed: self.failed,
            });
        }
    }

    fn prune_finished(&mut self) {
        let finished = self
            .jobs
            .values()
            .filter(|t| t.job.status.is_terminal())
            .count();
        if finished <= FINISHED_JOB_CAPACITY {
            return;
        }
        if let Some(index) = self
            .jobs
            .values()
            .position(|t| t.job.status.is_terminal())
        {
            if let Some((job_id, tracked)) = self.jobs.shift_remove_index(index) {
                if self.current.get(&tracked.job.combination_id) == Some(&job_id) {
                    self.current.remove(&tracked.job.combination_id);
                }
            }
        }
    }
}

/// Priority queue plus wave dispatcher in front of the render adapter.
///
/// Created once at startup via [`RenderScheduler::start`].
pub struct RenderScheduler {
    adapter: Arc<RenderAdapter>,
    resolver: Arc<dyn AssetResolver>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    callback: RwLock<Option<UpdateCallback>>,
    /// Held while owner callbacks run so events leave in queue order.
    emitting: Mutex<()>,
    wake: Notify,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RenderScheduler {
    /// Build the scheduler and spawn its dispatcher task.
    pub fn start(
        adapter: Arc<RenderAdapter>,
        resolver: Arc<dyn AssetResolver>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            adapter,
            resolver,
            config: SchedulerConfig {
                concurrency: config.concurrency.max(1),
            },
            state: Mutex::new(SchedulerState::default()),
            callback: RwLock::new(None),
            emitting: Mutex::new(()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&scheduler).run_dispatcher());
        *lock(&scheduler.dispatcher) = Some(handle);

        tracing::info!(
            concurrency = scheduler.config.concurrency,
            "Render scheduler started"
        );
        scheduler
    }

    /// Set the single owner callback, replacing any previous one.
    pub fn on_update(&self, callback: UpdateCallback) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Queue one combination. Returns the scheduler job id.
    pub fn enqueue(
        &self,
        combination: &Combination,
        target: impl Into<JobTarget>,
        priority: Priority,
    ) -> String {
        let target = target.into();
        let (job_id, stale) = self
            .state()
            .admit(combination, &target, priority, self.resolver.as_ref());
        self.release(stale);
        self.wake.notify_one();
        job_id
    }

    /// Queue many combinations at once, in order.
    pub fn enqueue_many(
        &self,
        combinations: &[Combination],
        target: impl Into<JobTarget>,
        priority: Priority,
    ) -> Vec<String> {
        let target = target.into();
        let mut job_ids = Vec::with_capacity(combinations.len());
        let mut stale = Vec::new();
        {
            let mut state = self.state();
            for combination in combinations {
                let (job_id, old) =
                    state.admit(combination, &target, priority, self.resolver.as_ref());
                job_ids.push(job_id);
                stale.extend(old);
            }
        }
        for subscription in stale {
            self.release(Some(subscription));
        }
        tracing::info!(
            jobs = job_ids.len(),
            template_id = %target.template_id,
            ?priority,
            "Render jobs enqueued",
        );
        self.wake.notify_one();
        job_ids
    }

    /// Render one combination again at high priority, whatever its state.
    pub fn regenerate(&self, combination: &Combination, target: impl Into<JobTarget>) -> String {
        tracing::info!(combination_id = %combination.id, "Regenerating combination");
        self.enqueue(combination, target, Priority::High)
    }

    /// Every tracked job, in enqueue order.
    pub fn list_jobs(&self) -> Vec<RenderJob> {
        self.state().jobs.values().map(|t| t.job.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Jobs queued or in flight in the current cycle.
    pub fn outstanding(&self) -> usize {
        self.state().outstanding
    }

    /// Stop the dispatcher. Jobs already submitted keep being tracked by
    /// the adapter until it shuts down too.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down render scheduler");
        self.cancel.cancel();
        let handle = lock(&self.dispatcher).take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        tracing::info!("Render scheduler shut down complete");
    }

    // ---- dispatcher ----

    async fn run_dispatcher(self: Arc<Self>) {
        loop {
            let wave = self.state().next_wave(self.config.concurrency);
            self.flush();

            if wave.is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.wake.notified() => continue,
                }
            }

            tracing::debug!(size = wave.len(), "Dispatching render wave");
            let submissions = wave
                .into_iter()
                .map(|(job_id, request)| self.dispatch(job_id, request));
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = join_all(submissions) => {}
            }
        }
        tracing::debug!("Render dispatcher stopped");
    }

    async fn dispatch(self: &Arc<Self>, job_id: String, request: RenderRequest) {
        let render_id = match self.adapter.submit(&request).await {
            Ok(render_id) => render_id,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Render submission failed");
                self.fail_submission(&job_id, e.to_string());
                return;
            }
        };

        let live = match self.state().jobs.get_mut(&job_id) {
            Some(tracked) => {
                tracked.job.render_id = Some(render_id.clone());
                true
            }
            None => false,
        };
        if !live {
            tracing::debug!(job_id = %job_id, render_id = %render_id, "Job superseded during submission");
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let scheduler_job = job_id.clone();
        let callback: StatusCallback = Arc::new(move |snapshot: &RenderSnapshot| {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.on_job_status(&scheduler_job, snapshot);
            }
        });

        match self.adapter.on_status_update(&render_id, callback) {
            Ok(subscription) => {
                let orphan = match self.state().jobs.get_mut(&job_id) {
                    Some(tracked) if !tracked.job.status.is_terminal() => {
                        tracked.subscription = Some(subscription);
                        None
                    }
                    _ => Some(subscription),
                };
                self.release(orphan);
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not follow render job");
            }
        }
    }

    fn fail_submission(&self, job_id: &str, error: String) {
        {
            let mut state = self.state();
            let Some(tracked) = state.jobs.get_mut(job_id) else {
                return;
            };
            tracked.job.status = RenderStatus::Failed;
            tracked.job.progress = 0;
            tracked.job.error = Some(error.clone());
            state.emit_update(job_id, CombinationStatus::Failed, 0, None, Some(error));
            state.finish(RenderStatus::Failed);
        }
        self.flush();
    }

    /// Adapter callback for one job. Stale or superseded deliveries are
    /// dropped.
    fn on_job_status(&self, job_id: &str, snapshot: &RenderSnapshot) {
        {
            let mut state = self.state();
            let Some(tracked) = state.jobs.get_mut(job_id) else {
                return;
            };
            if tracked.job.status.is_terminal()
                || tracked.job.render_id.as_deref() != Some(snapshot.job_id.as_str())
                || tracked.last_revision.is_some_and(|r| snapshot.revision <= r)
            {
                return;
            }

            tracked.last_revision = Some(snapshot.revision);
            let job = &mut tracked.job;
            job.status = snapshot.status;
            job.progress = snapshot.progress;
            job.result_url = snapshot.result_url.clone();
            job.thumbnail_url = snapshot.thumbnail_url.clone();
            job.error = snapshot.error.clone();
            job.attempts = snapshot.attempts;
            let terminal = snapshot.status.is_terminal();
            if terminal {
                tracked.subscription = None;
            }

            let preview_url = snapshot
                .result_url
                .clone()
                .or_else(|| snapshot.thumbnail_url.clone());
            state.emit_update(
                job_id,
                snapshot.status.combination_status(),
                snapshot.progress,
                preview_url,
                snapshot.error.clone(),
            );
            if terminal {
                state.finish(snapshot.status);
            }
        }
        self.flush();
    }

    // ---- private helpers ----

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        lock(&self.state)
    }

    fn release(&self, subscription: Option<Subscription>) {
        if let Some(subscription) = subscription {
            self.adapter.unsubscribe(&subscription);
        }
    }

    /// Deliver queued owner events in order, outside the state lock.
    ///
    /// Whoever holds `emitting` drains the outbox; a concurrent caller
    /// leaves its events to that holder.
    fn flush(&self) {
        loop {
            {
                let _guard = match self.emitting.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => return,
                };
                loop {
                    let events = std::mem::take(&mut self.state().outbox);
                    if events.is_empty() {
                        break;
                    }
                    let callback = self
                        .callback
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    if let Some(callback) = callback {
                        for event in &events {
                            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                                tracing::warn!("Scheduler update callback panicked");
                            }
                        }
                    }
                }
            }
            if self.state().outbox.is_empty() {
                return;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
