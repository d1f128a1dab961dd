//! Append-only job log.
//!
//! The queue seals the log when the job reaches a terminal state; appends
//! after that fail with `LogSealed`. Closing is the consumer's job and
//! happens once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use coursework_state::JobId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub stream: LogStream,
    pub line: String,
}

#[derive(Debug, Default)]
struct LogInner {
    entries: Vec<LogEntry>,
    sealed: bool,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    job_id: JobId,
    inner: Mutex<LogInner>,
    closes: AtomicUsize,
    // Bumped on every append, seal and close so followers can wake.
    version: watch::Sender<u64>,
}

/// Cheaply cloneable handle to one job's log.
#[derive(Debug, Clone)]
pub struct JobLog {
    shared: Arc<Shared>,
}

impl JobLog {
    pub fn new(job_id: JobId) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                job_id,
                inner: Mutex::new(LogInner::default()),
                closes: AtomicUsize::new(0),
                version,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.shared.version.send_modify(|v| *v += 1);
    }

    pub fn append(&self, stream: LogStream, line: impl Into<String>) -> CoreResult<()> {
        {
            let mut inner = self.lock();
            if inner.sealed || inner.closed {
                return Err(CoreError::LogSealed {
                    job_id: self.shared.job_id.clone(),
                });
            }
            inner.entries.push(LogEntry {
                at: Utc::now(),
                stream,
                line: line.into(),
            });
        }
        self.bump();
        Ok(())
    }

    /// Snapshot of everything appended so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting writes. Called by the queue on terminal transitions.
    pub(crate) fn seal(&self) {
        let changed = {
            let mut inner = self.lock();
            !std::mem::replace(&mut inner.sealed, true)
        };
        if changed {
            self.bump();
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Close the stream. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let first = {
            let mut inner = self.lock();
            inner.sealed = true;
            !std::mem::replace(&mut inner.closed, true)
        };
        if first {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
            self.bump();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of times the stream was actually closed (0 or 1).
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Follow the log from the beginning until it is sealed and drained.
    pub fn follow(&self) -> LogFollower {
        LogFollower {
            log: self.clone(),
            next: 0,
            changes: self.shared.version.subscribe(),
        }
    }
}

/// Streams log entries as they are appended.
pub struct LogFollower {
    log: JobLog,
    next: usize,
    changes: watch::Receiver<u64>,
}

impl LogFollower {
    /// Next entry, or `None` once the log is sealed and fully read.
    pub async fn next(&mut self) -> Option<LogEntry> {
        loop {
            self.changes.borrow_and_update();
            {
                let inner = self.log.lock();
                if let Some(entry) = inner.entries.get(self.next) {
                    self.next += 1;
                    return Some(entry.clone());
                }
                if inner.sealed {
                    return None;
                }
            }
            if self.changes.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> JobLog {
        JobLog::new(JobId::from("job-1"))
    }

    #[test]
    fn append_then_seal_rejects_writes() {
        let log = log();
        log.append(LogStream::Stdout, "compiling").unwrap();
        log.seal();

        let err = log.append(LogStream::Stdout, "late").unwrap_err();
        assert!(matches!(err, CoreError::LogSealed { .. }));
        assert_eq!(log.len(), 1);
        assert!(!log.is_closed());
    }

    #[test]
    fn close_happens_once() {
        let log = log();
        assert!(log.close());
        assert!(!log.close());
        assert!(log.is_closed());
        assert!(log.is_sealed());
        assert_eq!(log.close_count(), 1);
    }

    #[tokio::test]
    async fn follower_sees_live_appends_and_ends_on_seal() {
        let log = log();
        log.append(LogStream::System, "queued").unwrap();
        let mut follower = log.follow();

        let writer = log.clone();
        let handle = tokio::spawn(async move {
            writer.append(LogStream::Stdout, "running").unwrap();
            writer.seal();
        });

        let mut lines = Vec::new();
        while let Some(entry) = follower.next().await {
            lines.push(entry.line);
        }
        handle.await.unwrap();

        assert_eq!(lines, vec!["queued", "running"]);
    }
}
