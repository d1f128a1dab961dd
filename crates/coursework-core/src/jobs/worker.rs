//! Workers that claim jobs and run them through an executor.
//!
//! Cancellation is cooperative: executors observe `Job::cancelled()` and
//! stop on their own. A result reported after the job was cancelled is
//! dropped by the queue's transition check.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::log::{JobLog, LogStream};
use super::queue::{Job, JobQueue};
use crate::error::{CoreError, CoreResult};

/// How an executor finished a job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Value),
    Failed(Option<Value>),
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> CoreResult<ExecutionOutcome>;
}

/// Claims jobs from a queue and records executor outcomes.
pub struct Worker {
    name: String,
    queue: JobQueue,
    executor: Arc<dyn JobExecutor>,
}

impl Worker {
    pub fn new(name: impl Into<String>, queue: JobQueue, executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            name: name.into(),
            queue,
            executor,
        }
    }

    /// Spawn `count` workers sharing one executor. They stop when
    /// `shutdown` flips to `true`.
    pub fn spawn_pool(
        count: usize,
        queue: &JobQueue,
        executor: Arc<dyn JobExecutor>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for n in 0..count.max(1) {
            let worker = Worker::new(format!("worker-{n}"), queue.clone(), Arc::clone(&executor));
            set.spawn(worker.run(shutdown.clone()));
        }
        set
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.name, "worker started");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                job = self.queue.claim() => self.process(job).await,
            }
        }
        info!(worker = %self.name, "worker stopped");
    }

    #[instrument(skip_all, fields(worker = %self.name, job_id = %job.id(), kind = %job.kind()))]
    pub async fn process(&self, job: Job) {
        let outcome = self.executor.execute(&job).await;
        let recorded = match outcome {
            Ok(ExecutionOutcome::Completed(result)) => self.queue.complete(job.id(), result),
            Ok(ExecutionOutcome::Failed(result)) => self.queue.fail(job.id(), result),
            Err(err) => {
                warn!(error = %err, "executor error");
                self.queue.fail(job.id(), None)
            }
        };
        if let Err(err) = recorded {
            debug!(error = %err, state = %job.state(), "outcome not recorded");
        }
    }
}

/// Payload understood by [`CommandExecutor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    /// Executable followed by its arguments
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Runs the payload command as a child process.
///
/// stdout and stderr lines are streamed into the job log. The child is
/// killed when the job is cancelled. The result is `{exit_code, success}`
/// for both completion and failure.
#[derive(Debug, Default, Clone)]
pub struct CommandExecutor;

#[async_trait]
impl JobExecutor for CommandExecutor {
    async fn execute(&self, job: &Job) -> CoreResult<ExecutionOutcome> {
        let payload: CommandPayload = serde_json::from_value(job.payload().clone())?;
        let Some((exe, args)) = payload.command.split_first() else {
            return Err(CoreError::Executor(format!("job {} has an empty command", job.id())));
        };

        let mut command = Command::new(exe);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &payload.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| CoreError::Executor(format!("failed to spawn {exe}: {e}")))?;
        let line = format!("$ {}", payload.command.join(" "));
        if let Err(err) = job.log().append(LogStream::System, line) {
            debug!(error = %err, "command line not logged");
        }

        let mut pumps = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.spawn(pump(stdout, job.log().clone(), LogStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.spawn(pump(stderr, job.log().clone(), LogStream::Stderr));
        }

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| CoreError::Executor(format!("failed to wait for {exe}: {e}")))?,
            _ = job.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill cancelled job");
                }
                pumps.abort_all();
                return Err(CoreError::JobCancelled { job_id: job.id().clone() });
            }
        };
        while pumps.join_next().await.is_some() {}

        let exit_code = status.code().unwrap_or(-1);
        let result = json!({ "exit_code": exit_code, "success": status.success() });
        if status.success() {
            Ok(ExecutionOutcome::Completed(result))
        } else {
            Ok(ExecutionOutcome::Failed(Some(result)))
        }
    }
}

async fn pump<R>(reader: R, log: JobLog, stream: LogStream)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if log.append(stream, line).is_err() {
            break;
        }
    }
}
