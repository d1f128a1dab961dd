//! Job queue lifecycle: positions, polling, cancellation and timeouts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coursework_core::jobs::LogStream;
use coursework_core::{
    CancelReason, CoreError, CoreResult, ExecutionOutcome, Job, JobExecutor, JobQueue, JobState,
    JobWatcher, QueueConfig, RecordingSink, Worker,
};
use coursework_state::Principal;
use serde_json::json;
use tokio::sync::watch;

fn queue(deadline: Duration) -> JobQueue {
    JobQueue::new(QueueConfig {
        position_interval: Duration::from_secs(3),
        deadline,
    })
}

fn submitter() -> Principal {
    Principal::from("cas:mis2")
}

/// Writes a line, then waits for cancellation or a short delay.
struct PoliteExecutor {
    work: Duration,
}

#[async_trait]
impl JobExecutor for PoliteExecutor {
    async fn execute(&self, job: &Job) -> CoreResult<ExecutionOutcome> {
        job.log().append(LogStream::Stdout, "working")?;
        tokio::select! {
            _ = job.cancelled() => Err(CoreError::JobCancelled { job_id: job.id().clone() }),
            _ = tokio::time::sleep(self.work) => {
                Ok(ExecutionOutcome::Completed(json!({ "score": 1 })))
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn single_job_reports_one_of_one() {
    let queue = queue(Duration::from_secs(600));
    let job = queue.enqueue("evaluate", submitter(), json!({ "info": "x" }));
    assert_eq!(job.state(), JobState::Pending);
    assert_eq!(job.position(), Some((1, 1)));

    let sink = Arc::new(RecordingSink::new());
    let waiter = {
        let (job, sink) = (job.clone(), Arc::clone(&sink));
        tokio::spawn(async move {
            JobWatcher::new(Duration::from_secs(3))
                .wait(&job, sink.as_ref())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(6_500)).await;
    assert_eq!(sink.reports(), vec![(1, 1), (1, 1)]);

    job.cancel();
    assert!(matches!(
        waiter.await.unwrap(),
        Err(CoreError::JobCancelled { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn second_job_sees_rank_two_until_first_is_claimed() {
    let queue = queue(Duration::from_secs(600));
    let _first = queue.enqueue("evaluate", submitter(), json!(1));
    let second = queue.enqueue("evaluate", submitter(), json!(2));

    let sink = Arc::new(RecordingSink::new());
    let waiter = {
        let (job, sink) = (second.clone(), Arc::clone(&sink));
        tokio::spawn(async move {
            JobWatcher::new(Duration::from_secs(3))
                .wait(&job, sink.as_ref())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(3_100)).await;
    queue.try_claim().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    queue.try_claim().unwrap();
    tokio::time::sleep(Duration::from_secs(9)).await;

    assert_eq!(sink.reports(), vec![(2, 2), (1, 1)]);
    queue.complete(second.id(), json!({ "score": 0 })).unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), json!({ "score": 0 }));
}

#[tokio::test]
async fn cancel_on_complete_job_changes_nothing() {
    let queue = queue(Duration::from_secs(600));
    let job = queue.enqueue("evaluate", submitter(), json!({}));
    queue.try_claim().unwrap();
    queue.complete(job.id(), json!({ "score": 1 })).unwrap();

    let before = job.status();
    let mut rx = job.subscribe();
    rx.borrow_and_update();

    assert!(!job.cancel());
    assert!(!job.cancel_with(CancelReason::Timeout));

    assert_eq!(job.status(), before);
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn timeout_cancels_exactly_once_and_stops_ticker() {
    let queue = queue(Duration::from_secs(10));
    let job = queue.enqueue("evaluate", submitter(), json!({}));

    let mut rx = job.subscribe();
    let transitions = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            seen.push(rx.borrow_and_update().state);
        }
        seen
    });

    let sink = RecordingSink::new();
    let err = JobWatcher::new(Duration::from_secs(3))
        .wait(&job, &sink)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::JobTimeout { .. }));
    assert_eq!(err.exit_code(), 4);

    let reports_at_timeout = sink.reports().len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sink.reports().len(), reports_at_timeout);

    assert!(queue.release(job.id()));
    drop(job);
    let seen = transitions.await.unwrap();
    assert_eq!(seen, vec![JobState::Cancel]);
}

#[tokio::test(start_paused = true)]
async fn deadline_cancels_active_job_and_executor_stops() {
    let queue = queue(Duration::from_secs(5));
    let job = queue.enqueue("evaluate", submitter(), json!({}));
    let (stop, shutdown) = watch::channel(false);
    let mut pool = Worker::spawn_pool(
        1,
        &queue,
        Arc::new(PoliteExecutor {
            work: Duration::from_secs(60),
        }),
        shutdown,
    );

    let status = job.wait_terminal().await;
    assert_eq!(status.state, JobState::Cancel);
    assert_eq!(status.cancel_reason, Some(CancelReason::Timeout));
    assert!(status.result.is_none());
    assert_eq!(job.log().entries().iter().filter(|e| e.line == "working").count(), 1);

    stop.send(true).unwrap();
    while pool.join_next().await.is_some() {}
    assert_eq!(job.state(), JobState::Cancel);
}

#[tokio::test(start_paused = true)]
async fn worker_completes_job_before_deadline() {
    let queue = queue(Duration::from_secs(600));
    let (stop, shutdown) = watch::channel(false);
    let mut pool = Worker::spawn_pool(
        2,
        &queue,
        Arc::new(PoliteExecutor {
            work: Duration::from_secs(1),
        }),
        shutdown,
    );

    let job = queue.enqueue("evaluate", submitter(), json!({ "info": "x" }));
    let result = JobWatcher::new(Duration::from_secs(3))
        .wait(&job, &RecordingSink::new())
        .await
        .unwrap();
    assert_eq!(result, json!({ "score": 1 }));
    assert!(job.log().is_closed());

    let err = job.log().append(LogStream::Stdout, "late").unwrap_err();
    assert!(matches!(err, CoreError::LogSealed { .. }));

    stop.send(true).unwrap();
    while pool.join_next().await.is_some() {}
}
