//! Single-consumer waiting on a job.
//!
//! The watcher reports queue position on a fixed interval while the job is
//! pending, stops reporting as soon as it leaves `pending`, and resolves
//! with the job outcome once a terminal state is published. It closes the
//! job log on the way out.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, instrument};

use super::queue::Job;
use super::state::{CancelReason, JobState, JobStatus};
use crate::error::{CoreError, CoreResult};
use crate::obs;

/// Receives queue position updates for a waiting job.
pub trait PositionSink: Send + Sync {
    fn report(&self, job: &Job, rank: usize, total: usize);
}

/// Discards position reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl PositionSink for NoopSink {
    fn report(&self, _job: &Job, _rank: usize, _total: usize) {}
}

/// Keeps every report; handy for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(usize, usize)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(usize, usize)> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl PositionSink for RecordingSink {
    fn report(&self, _job: &Job, rank: usize, total: usize) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((rank, total));
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobWatcher {
    interval: Duration,
}

impl JobWatcher {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Wait for `job` to finish and map its terminal status to a result.
    #[instrument(skip_all, fields(job_id = %job.id()))]
    pub async fn wait(&self, job: &Job, sink: &dyn PositionSink) -> CoreResult<Value> {
        let mut rx = job.subscribe();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let state = rx.borrow_and_update().state;
            if state.is_terminal() {
                break;
            }
            if state == JobState::Pending {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some((rank, total)) = job.position() {
                            obs::emit_job_position(job.id().as_str(), rank, total);
                            sink.report(job, rank, total);
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            } else if rx.changed().await.is_err() {
                break;
            }
        }

        let status = job.status();
        if job.log().close() {
            debug!("job log closed");
        }
        outcome(job, status)
    }
}

fn outcome(job: &Job, status: JobStatus) -> CoreResult<Value> {
    let job_id = job.id().clone();
    match status.state {
        JobState::Complete => Ok(status.result.unwrap_or(Value::Null)),
        JobState::Error => match status.result {
            Some(result) => Err(CoreError::JobFailed { job_id, result }),
            None => Err(CoreError::UnknownJobError { job_id }),
        },
        JobState::Cancel => match status.cancel_reason {
            Some(CancelReason::Timeout) => Err(CoreError::JobTimeout { job_id }),
            _ => Err(CoreError::JobCancelled { job_id }),
        },
        state => Err(CoreError::InvalidTransition {
            job_id,
            from: state.to_string(),
            to: "terminal".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobQueue, QueueConfig};
    use coursework_state::Principal;
    use serde_json::json;
    use std::sync::Arc;

    fn queue(deadline_secs: u64) -> JobQueue {
        JobQueue::new(QueueConfig {
            position_interval: Duration::from_secs(3),
            deadline: Duration::from_secs(deadline_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn reports_position_while_pending_then_stops() {
        let queue = queue(600);
        let job = queue.enqueue("evaluate", Principal::from("cas:mis2"), json!({ "info": "x" }));
        let sink = Arc::new(RecordingSink::new());

        let waiter = {
            let job = job.clone();
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                JobWatcher::new(Duration::from_secs(3))
                    .wait(&job, sink.as_ref())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(sink.reports(), vec![(1, 1)]);

        queue.try_claim().unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(sink.reports().len(), 1);

        queue.complete(job.id(), json!({ "score": 1 })).unwrap();
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result, json!({ "score": 1 }));
        assert_eq!(job.log().close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_as_job_timeout_and_ticker_stops() {
        let queue = queue(10);
        let job = queue.enqueue("evaluate", Principal::from("cas:mis2"), json!({}));
        let sink = RecordingSink::new();

        let err = JobWatcher::new(Duration::from_secs(3))
            .wait(&job, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::JobTimeout { .. }));
        assert_eq!(job.state(), JobState::Cancel);
        let reports = sink.reports().len();
        assert_eq!(reports, 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.reports().len(), reports);
    }

    #[tokio::test]
    async fn error_without_result_is_unknown_job_error() {
        let queue = queue(600);
        let job = queue.enqueue("evaluate", Principal::from("cas:mis2"), json!({}));
        queue.try_claim().unwrap();
        queue.fail(job.id(), None).unwrap();

        let err = JobWatcher::new(Duration::from_secs(3))
            .wait(&job, &NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownJobError { .. }));
    }

    #[tokio::test]
    async fn error_with_result_is_job_failed() {
        let queue = queue(600);
        let job = queue.enqueue("evaluate", Principal::from("cas:mis2"), json!({}));
        queue.try_claim().unwrap();
        queue.fail(job.id(), Some(json!({ "exit_code": 2 }))).unwrap();

        let err = JobWatcher::new(Duration::from_secs(3))
            .wait(&job, &NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::JobFailed { ref result, .. } if result["exit_code"] == 2));
    }

    #[tokio::test]
    async fn explicit_cancel_is_job_cancelled() {
        let queue = queue(600);
        let job = queue.enqueue("evaluate", Principal::from("cas:mis2"), json!({}));
        job.cancel_with(CancelReason::Interrupted);

        let err = JobWatcher::new(Duration::from_secs(3))
            .wait(&job, &NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::JobCancelled { .. }));
        assert!(job.log().is_closed());
    }
}
