//! In-process job queue and job handles.
//!
//! The queue is the only writer of job state. Callers hold [`Job`] handles
//! which can read state, subscribe to transitions, query queue position and
//! request cancellation. Each job publishes its [`JobStatus`] on a
//! `tokio::sync::watch` channel; there is no listener bookkeeping.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use coursework_state::{JobId, JobRecord, Principal};
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tracing::debug;

use super::log::{JobLog, LogStream};
use super::state::{CancelReason, JobState, JobStatus};
use crate::error::{CoreError, CoreResult};
use crate::metrics::METRICS;
use crate::obs;

/// Timer settings for queued jobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often a waiter is told its position while pending.
    pub position_interval: Duration,
    /// Jobs not terminal by this long after enqueue are cancelled.
    pub deadline: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            position_interval: Duration::from_secs(3),
            deadline: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct JobInner {
    id: JobId,
    kind: String,
    submitter: Principal,
    payload: Value,
    created_at: DateTime<Utc>,
    status: watch::Sender<JobStatus>,
    log: JobLog,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<JobId>,
    jobs: HashMap<JobId, Arc<JobInner>>,
}

#[derive(Debug)]
struct Shared {
    config: QueueConfig,
    state: Mutex<QueueState>,
    available: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drop_pending(&self, id: &JobId) {
        self.lock().pending.retain(|p| p != id);
    }

    fn position(&self, id: &JobId) -> Option<(usize, usize)> {
        let state = self.lock();
        let rank = state.pending.iter().position(|p| p == id)?;
        Some((rank + 1, state.pending.len()))
    }
}

/// Handle to a queued job.
#[derive(Debug, Clone)]
pub struct Job {
    inner: Arc<JobInner>,
    queue: Arc<Shared>,
}

impl Job {
    pub fn id(&self) -> &JobId {
        &self.inner.id
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn submitter(&self) -> &Principal {
        &self.inner.submitter
    }

    pub fn payload(&self) -> &Value {
        &self.inner.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn status(&self) -> JobStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> JobState {
        self.inner.status.borrow().state
    }

    pub fn log(&self) -> &JobLog {
        &self.inner.log
    }

    /// Receiver that observes every state transition of this job.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.inner.status.subscribe()
    }

    /// `(rank, total)` among pending jobs, 1-based. `None` once the job has
    /// left `pending`.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.queue.position(&self.inner.id)
    }

    /// Request cancellation. No-op on a terminal job.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::Requested)
    }

    /// Move to `cancel` from `pending` or `active`. Returns `false` and
    /// publishes nothing when the job is already terminal.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        let mut from = None;
        self.inner.status.send_if_modified(|status| {
            if status.state.is_terminal() {
                return false;
            }
            from = Some(status.state);
            status.state = JobState::Cancel;
            status.cancel_reason = Some(reason);
            status.updated_at = Utc::now();
            true
        });
        let Some(from) = from else {
            return false;
        };

        self.queue.drop_pending(&self.inner.id);
        self.inner.log.seal();
        METRICS.inc_jobs_cancelled();
        obs::emit_job_state_changed(self.inner.id.as_str(), from, JobState::Cancel);
        obs::emit_job_cancelled(self.inner.id.as_str(), reason);
        true
    }

    /// Resolves once the job is in `cancel`. Never resolves for a job that
    /// ends in `complete` or `error`.
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| s.state == JobState::Cancel).await;
    }

    /// Resolves with the terminal status.
    pub async fn wait_terminal(&self) -> JobStatus {
        let mut rx = self.subscribe();
        let status = match rx.wait_for(|s| s.state.is_terminal()).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        status
    }

    /// Persistable snapshot of the job.
    pub fn to_record(&self) -> JobRecord {
        let status = self.status();
        JobRecord {
            job_id: self.inner.id.clone(),
            kind: self.inner.kind.clone(),
            submitter: self.inner.submitter.clone(),
            payload: self.inner.payload.clone(),
            state: status.state.to_string(),
            result: status.result,
            created_at: self.inner.created_at,
            updated_at: status.updated_at,
        }
    }

    fn transition(&self, to: JobState, result: Option<Value>) -> CoreResult<JobState> {
        let mut outcome = Err(JobState::Pending);
        self.inner.status.send_if_modified(|status| {
            if !status.state.can_transition_to(to) {
                outcome = Err(status.state);
                return false;
            }
            outcome = Ok(status.state);
            status.state = to;
            status.result = result;
            status.updated_at = Utc::now();
            true
        });
        let from = outcome.map_err(|from| CoreError::InvalidTransition {
            job_id: self.inner.id.clone(),
            from: from.to_string(),
            to: to.to_string(),
        })?;

        if to.is_terminal() {
            self.inner.log.seal();
        }
        obs::emit_job_state_changed(self.inner.id.as_str(), from, to);
        Ok(from)
    }
}

/// Owner of job state and queue-position accounting.
#[derive(Debug, Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(QueueState::default()),
                available: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Create a pending job and start its deadline timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, kind: impl Into<String>, submitter: Principal, payload: Value) -> Job {
        self.enqueue_with_deadline(kind, submitter, payload, self.shared.config.deadline)
    }

    /// Like [`enqueue`](Self::enqueue) with a per-job deadline.
    pub fn enqueue_with_deadline(
        &self,
        kind: impl Into<String>,
        submitter: Principal,
        payload: Value,
        deadline_after: Duration,
    ) -> Job {
        let id = JobId::new();
        let (status, _) = watch::channel(JobStatus::pending());
        let job = Job {
            inner: Arc::new(JobInner {
                log: JobLog::new(id.clone()),
                id: id.clone(),
                kind: kind.into(),
                submitter,
                payload,
                created_at: Utc::now(),
                status,
            }),
            queue: Arc::clone(&self.shared),
        };

        {
            let mut state = self.shared.lock();
            state.pending.push_back(id.clone());
            state.jobs.insert(id.clone(), Arc::clone(&job.inner));
        }
        if let Err(err) = job.log().append(LogStream::System, format!("job {id} queued")) {
            debug!(job_id = %id, error = %err, "queued line not logged");
        }
        METRICS.inc_jobs_enqueued();
        obs::emit_job_enqueued(id.as_str(), job.kind(), job.submitter().as_str());

        tokio::spawn(deadline(job.clone(), deadline_after));
        self.shared.available.notify_one();
        job
    }

    /// Handle for a tracked job.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        let inner = self.shared.lock().jobs.get(id).cloned()?;
        Some(Job {
            inner,
            queue: Arc::clone(&self.shared),
        })
    }

    /// Claim the oldest pending job, moving it to `active`.
    pub fn try_claim(&self) -> Option<Job> {
        loop {
            let inner = {
                let mut state = self.shared.lock();
                let id = state.pending.pop_front()?;
                state.jobs.get(&id).cloned()
            };
            let Some(inner) = inner else { continue };
            let job = Job {
                inner,
                queue: Arc::clone(&self.shared),
            };
            // A cancel may land between the pop and the transition.
            if job.transition(JobState::Active, None).is_ok() {
                return Some(job);
            }
        }
    }

    /// Wait until a pending job is available and claim it.
    pub async fn claim(&self) -> Job {
        loop {
            let notified = self.shared.available.notified();
            if let Some(job) = self.try_claim() {
                return job;
            }
            notified.await;
        }
    }

    /// Mark an active job complete with `result`.
    pub fn complete(&self, id: &JobId, result: Value) -> CoreResult<()> {
        let job = self.require(id)?;
        job.transition(JobState::Complete, Some(result))?;
        METRICS.inc_jobs_completed();
        Ok(())
    }

    /// Mark an active job failed. `result` may be absent.
    pub fn fail(&self, id: &JobId, result: Option<Value>) -> CoreResult<()> {
        let job = self.require(id)?;
        job.transition(JobState::Error, result)?;
        METRICS.inc_jobs_failed();
        Ok(())
    }

    /// Stop tracking a job whose terminal state has been consumed.
    pub fn release(&self, id: &JobId) -> bool {
        let mut state = self.shared.lock();
        state.pending.retain(|p| p != id);
        let released = state.jobs.remove(id).is_some();
        if released {
            debug!(job_id = %id, "job released");
        }
        released
    }

    pub fn position(&self, id: &JobId) -> Option<(usize, usize)> {
        self.shared.position(id)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    fn require(&self, id: &JobId) -> CoreResult<Job> {
        self.get(id).ok_or_else(|| CoreError::not_found("job", id))
    }
}

async fn deadline(job: Job, after: Duration) {
    let mut rx = job.subscribe();
    tokio::select! {
        _ = tokio::time::sleep(after) => {
            if job.cancel_with(CancelReason::Timeout) {
                obs::emit_job_timeout(job.id().as_str(), after.as_secs());
            }
        }
        _ = rx.wait_for(|s| s.state.is_terminal()) => {}
    }
}
