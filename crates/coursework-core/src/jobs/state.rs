//! Job states and the transitions between them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// `pending -> active -> {complete | error}`, with `cancel` reachable from
/// `pending` or `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Active,
    Cancel,
    Error,
    Complete,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Cancel => "cancel",
            JobState::Error => "error",
            JobState::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Cancel | JobState::Error | JobState::Complete)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Active)
                | (JobState::Pending, JobState::Cancel)
                | (JobState::Active, JobState::Cancel)
                | (JobState::Active, JobState::Error)
                | (JobState::Active, JobState::Complete)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "active" => Ok(JobState::Active),
            "cancel" => Ok(JobState::Cancel),
            "error" => Ok(JobState::Error),
            "complete" => Ok(JobState::Complete),
            other => Err(CoreError::Config(format!("unknown job state: {other}"))),
        }
    }
}

/// Why a job ended up in `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Explicit `cancel()` call
    Requested,
    /// Deadline elapsed before a terminal state
    Timeout,
    /// External interrupt such as Ctrl-C
    Interrupted,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CancelReason::Requested => "requested",
            CancelReason::Timeout => "timeout",
            CancelReason::Interrupted => "interrupted",
        })
    }
}

/// Observable job status, published on the job's watch channel.
///
/// `result` is only ever set in `error` or `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub result: Option<Value>,
    pub cancel_reason: Option<CancelReason>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub(crate) fn pending() -> Self {
        Self {
            state: JobState::Pending,
            result: None,
            cancel_reason: None,
            updated_at: Utc::now(),
        }
    }
}
