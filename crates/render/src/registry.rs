//! Active-job map and per-job callback registry.
//!
//! The registry is plain data guarded by the adapter's mutex; it never
//! invokes callbacks itself. Transitions hand the callbacks back to the
//! caller, which runs them through the job's [`DeliveryLane`] after the
//! registry lock is released.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use renderflow_core::render::{state_machine, RenderSnapshot, RenderStatus, RenderStatusReport};
use renderflow_core::types::{JobId, Timestamp};

/// Number of recently finished jobs kept for late registrations.
const FINISHED_CAPACITY: usize = 256;

/// Callback invoked with every applied change to a job.
pub type StatusCallback = Arc<dyn Fn(&RenderSnapshot) + Send + Sync>;

/// Handle for one registered callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    job_id: JobId,
    id: u64,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// Orders callback delivery for one job.
///
/// Holds the highest revision handed to the job's callbacks. The guard is
/// held while callbacks run, so deliveries for a job never interleave and
/// a revision older than one already delivered is dropped.
#[derive(Clone, Default)]
pub(crate) struct DeliveryLane(Arc<Mutex<u64>>);

impl DeliveryLane {
    pub fn lock(&self) -> MutexGuard<'_, u64> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ActiveJob {
    snapshot: RenderSnapshot,
    callbacks: Vec<(u64, StatusCallback)>,
    lane: DeliveryLane,
}

/// Result of applying a status report.
pub(crate) enum Transition {
    Changed {
        snapshot: RenderSnapshot,
        callbacks: Vec<StatusCallback>,
        lane: DeliveryLane,
        terminal: bool,
    },
    Unchanged,
    Rejected {
        from: RenderStatus,
        to: RenderStatus,
    },
    AlreadyTerminal(RenderStatus),
    UnknownJob,
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Changed {
                snapshot,
                callbacks,
                terminal,
                ..
            } => f
                .debug_struct("Changed")
                .field("snapshot", snapshot)
                .field("callbacks", &callbacks.len())
                .field("terminal", terminal)
                .finish(),
            Transition::Unchanged => f.write_str("Unchanged"),
            Transition::Rejected { from, to } => f
                .debug_struct("Rejected")
                .field("from", from)
                .field("to", to)
                .finish(),
            Transition::AlreadyTerminal(status) => {
                f.debug_tuple("AlreadyTerminal").field(status).finish()
            }
            Transition::UnknownJob => f.write_str("UnknownJob"),
        }
    }
}

/// Result of registering a callback.
#[derive(Debug)]
pub(crate) enum Registration {
    /// Appended to a live job's registry.
    Active(Subscription, RenderSnapshot),
    /// The job already finished; the handle is inert.
    Finished(Subscription, RenderSnapshot),
    Unknown,
}

#[derive(Default)]
pub(crate) struct JobRegistry {
    active: HashMap<JobId, ActiveJob>,
    finished: VecDeque<RenderSnapshot>,
    next_subscription: u64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly submitted job. Returns the job's delivery
    /// lane, or `None` if the id is already tracked.
    pub fn insert(&mut self, snapshot: RenderSnapshot) -> Option<DeliveryLane> {
        if self.active.contains_key(&snapshot.job_id) {
            return None;
        }
        let lane = DeliveryLane::default();
        self.active.insert(
            snapshot.job_id.clone(),
            ActiveJob {
                snapshot,
                callbacks: Vec::new(),
                lane: lane.clone(),
            },
        );
        Some(lane)
    }

    /// Delivery lane of an active job.
    pub fn lane(&self, job_id: &str) -> Option<DeliveryLane> {
        self.active.get(job_id).map(|job| job.lane.clone())
    }

    /// Apply a report through the job state machine.
    ///
    /// A terminal transition removes the job and its callbacks in the same
    /// step, keeping only the final snapshot.
    pub fn apply(&mut self, report: &RenderStatusReport, now: Timestamp) -> Transition {
        let Some(job) = self.active.get_mut(&report.job_id) else {
            return match self.finished_snapshot(&report.job_id) {
                Some(done) => Transition::AlreadyTerminal(done.status),
                None => Transition::UnknownJob,
            };
        };

        let current = job.snapshot.status;
        let progress = next_progress(&job.snapshot, report);

        if report.status == current {
            if progress == job.snapshot.progress {
                return Transition::Unchanged;
            }
        } else if !state_machine::can_transition(current, report.status) {
            return Transition::Rejected {
                from: current,
                to: report.status,
            };
        }

        let snapshot = &mut job.snapshot;
        snapshot.status = report.status;
        snapshot.progress = progress;
        if report.url.is_some() {
            snapshot.result_url = report.url.clone();
        }
        if report.thumbnail_url.is_some() {
            snapshot.thumbnail_url = report.thumbnail_url.clone();
        }
        if report.error.is_some() {
            snapshot.error = report.error.clone();
        }
        snapshot.revision += 1;
        snapshot.updated_at = now;

        let terminal = report.status.is_terminal();
        if terminal {
            let Some(job) = self.active.remove(&report.job_id) else {
                return Transition::UnknownJob;
            };
            self.remember_finished(job.snapshot.clone());
            Transition::Changed {
                snapshot: job.snapshot,
                callbacks: job.callbacks.into_iter().map(|(_, cb)| cb).collect(),
                lane: job.lane,
                terminal,
            }
        } else {
            Transition::Changed {
                snapshot: job.snapshot.clone(),
                callbacks: job.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                lane: job.lane.clone(),
                terminal,
            }
        }
    }

    /// Count one poll attempt. Returns the new total, or `None` when the
    /// job is no longer active.
    pub fn record_attempt(&mut self, job_id: &str) -> Option<u32> {
        let job = self.active.get_mut(job_id)?;
        job.snapshot.attempts += 1;
        Some(job.snapshot.attempts)
    }

    pub fn subscribe(&mut self, job_id: &str, callback: StatusCallback) -> Registration {
        let id = self.next_subscription;
        let subscription = Subscription {
            job_id: job_id.to_string(),
            id,
        };

        if let Some(job) = self.active.get_mut(job_id) {
            self.next_subscription += 1;
            job.callbacks.push((id, callback));
            return Registration::Active(subscription, job.snapshot.clone());
        }

        match self.finished_snapshot(job_id) {
            Some(done) => {
                let done = done.clone();
                self.next_subscription += 1;
                Registration::Finished(subscription, done)
            }
            None => Registration::Unknown,
        }
    }

    pub fn unsubscribe(&mut self, subscription: &Subscription) -> bool {
        let Some(job) = self.active.get_mut(&subscription.job_id) else {
            return false;
        };
        let before = job.callbacks.len();
        job.callbacks.retain(|(id, _)| *id != subscription.id);
        job.callbacks.len() != before
    }

    pub fn snapshot(&self, job_id: &str) -> Option<RenderSnapshot> {
        self.active
            .get(job_id)
            .map(|job| job.snapshot.clone())
            .or_else(|| self.finished_snapshot(job_id).cloned())
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.active.contains_key(job_id)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Total registered callbacks across all active jobs.
    pub fn callback_count(&self) -> usize {
        self.active.values().map(|job| job.callbacks.len()).sum()
    }

    // ---- private helpers ----

    fn finished_snapshot(&self, job_id: &str) -> Option<&RenderSnapshot> {
        self.finished.iter().find(|s| s.job_id == job_id)
    }

    fn remember_finished(&mut self, snapshot: RenderSnapshot) {
        if self.finished.len() == FINISHED_CAPACITY {
            self.finished.pop_front();
        }
        self.finished.push_back(snapshot);
    }
}

/// Progress never moves backwards while processing.
fn next_progress(current: &RenderSnapshot, report: &RenderStatusReport) -> u8 {
    match report.status {
        RenderStatus::Processing => {
            let reported = report
                .progress
                .map(|p| p.min(100))
                .unwrap_or_else(|| RenderStatus::Processing.default_progress());
            current.progress.max(reported)
        }
        other => other.default_progress(),
    }
}
