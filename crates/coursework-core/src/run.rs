//! Evaluation runs: persist job, persist run, wait, evaluate.
//!
//! Each step runs only if the previous one succeeded. A failure surfaces
//! as-is; records written by earlier steps are left in place. When a
//! persist step fails before the wait, the job is cancelled, its log
//! closed and the queue stops tracking it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use coursework_state::{EvaluationRunRecord, JobId, Store, SubmissionId};
use serde_json::{json, Value};
use tracing::{warn, Instrument};

use crate::error::{CoreError, CoreResult};
use crate::jobs::{Job, JobQueue, JobWatcher, LogEntry, PositionSink};
use crate::obs;

/// What the evaluation procedure gets to look at.
#[derive(Debug, Clone)]
pub struct EvaluationInput<'a> {
    pub job_id: &'a JobId,
    pub result: &'a Value,
    pub log: &'a [LogEntry],
}

/// Turns a finished job into an evaluation result.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, input: EvaluationInput<'_>) -> CoreResult<Value>;
}

/// Uses the job result as the evaluation result.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobResultEvaluator;

#[async_trait]
impl Evaluator for JobResultEvaluator {
    async fn evaluate(&self, input: EvaluationInput<'_>) -> CoreResult<Value> {
        Ok(input.result.clone())
    }
}

pub struct RunCoordinator {
    store: Arc<dyn Store>,
    queue: JobQueue,
    watcher: JobWatcher,
    evaluator: Arc<dyn Evaluator>,
}

impl RunCoordinator {
    pub fn new(store: Arc<dyn Store>, queue: JobQueue, evaluator: Arc<dyn Evaluator>) -> Self {
        let watcher = JobWatcher::new(queue.config().position_interval);
        Self {
            store,
            queue,
            watcher,
            evaluator,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Enqueue an evaluation job for `submission_id` and run it through
    /// the pipeline.
    pub async fn evaluate_submission(
        &self,
        submission_id: &SubmissionId,
        sink: &dyn PositionSink,
    ) -> CoreResult<EvaluationRunRecord> {
        let job = self.enqueue_evaluation(submission_id).await?;
        self.run(submission_id, &job, sink).await
    }

    /// Look up the submission and its evaluation settings and enqueue the job.
    pub async fn enqueue_evaluation(&self, submission_id: &SubmissionId) -> CoreResult<Job> {
        let submission = self.store.get_submission(submission_id).await?;
        let settings = self
            .store
            .evaluation_settings(&submission.assignment_id)
            .await?
            .ok_or_else(|| CoreError::NotEvaluatable {
                assignment: submission.assignment_id.to_string(),
            })?;

        let payload = json!({
            "submission_id": submission.submission_id,
            "assignment_id": submission.assignment_id,
            "repository_id": submission.repository_id,
            "command": settings.command,
            "options": settings.options,
        });
        let job = match settings.timeout_secs {
            Some(secs) => self.queue.enqueue_with_deadline(
                settings.kind.clone(),
                submission.owner.clone(),
                payload,
                Duration::from_secs(secs),
            ),
            None => self
                .queue
                .enqueue(settings.kind.clone(), submission.owner.clone(), payload),
        };
        Ok(job)
    }

    /// Drive an already enqueued `job` for `submission`.
    pub async fn run(
        &self,
        submission: &SubmissionId,
        job: &Job,
        sink: &dyn PositionSink,
    ) -> CoreResult<EvaluationRunRecord> {
        let run = EvaluationRunRecord::new(submission.clone(), job.id().clone());
        let span = obs::run_span(run.run_id.as_str());
        let started = Instant::now();

        let outcome = self.pipeline(run.clone(), job, sink).instrument(span).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_run_finished(run.run_id.as_str(), duration_ms, outcome.is_ok());
        outcome
    }

    async fn pipeline(
        &self,
        run: EvaluationRunRecord,
        job: &Job,
        sink: &dyn PositionSink,
    ) -> CoreResult<EvaluationRunRecord> {
        let run_id = run.run_id.to_string();

        if let Err(err) = self.store.save_job(&job.to_record()).await {
            self.abandon(job);
            return Err(failed(&run_id, "save_job", err.into()));
        }
        if let Err(err) = self.store.save_run(&run).await {
            self.abandon(job);
            return Err(failed(&run_id, "save_run", err.into()));
        }
        obs::emit_run_started(&run_id, run.submission_id.as_str(), job.id().as_str());

        let waited = self.watcher.wait(job, sink).await;
        if let Err(err) = self.store.save_job(&job.to_record()).await {
            warn!(error = %err, "terminal job snapshot not saved");
        }
        self.queue.release(job.id());
        let result = waited.map_err(|e| failed(&run_id, "wait", e))?;

        let log = job.log().entries();
        let evaluation = self
            .evaluator
            .evaluate(EvaluationInput {
                job_id: job.id(),
                result: &result,
                log: &log,
            })
            .await
            .map_err(|e| failed(&run_id, "evaluate", e))?;

        let evaluated = run.evaluated(evaluation);
        self.store
            .save_run(&evaluated)
            .await
            .map_err(|e| failed(&run_id, "save_result", e.into()))?;
        Ok(evaluated)
    }

    /// Withdraw a job nobody will wait for. Rows already written stay.
    fn abandon(&self, job: &Job) {
        job.cancel();
        job.log().close();
        self.queue.release(job.id());
    }
}

fn failed(run_id: &str, step: &str, err: CoreError) -> CoreError {
    obs::emit_run_failed(run_id, step, &err);
    err
}
