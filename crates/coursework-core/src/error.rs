//! Error taxonomy for the coursework core.

use coursework_state::{JobId, StorageError};

/// Errors produced by loaders, the resolver, provisioning, jobs and runs.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("loader dependency cycle among: {keys:?}")]
    CyclicDependency { keys: Vec<String> },

    #[error("loader {loader} depends on unknown key {dependency}")]
    UnknownDependency { loader: String, dependency: String },

    #[error("loader key registered twice: {key}")]
    DuplicateLoader { key: String },

    #[error("unknown submission mode: {mode}")]
    UnknownSubmissionMode { mode: String },

    #[error("assignment {assignment} has no evaluation settings")]
    NotEvaluatable { assignment: String },

    #[error("store failure: {0}")]
    StoreFailure(StorageError),

    #[error("job {job_id} failed without a result")]
    UnknownJobError { job_id: JobId },

    #[error("job {job_id} failed: {result}")]
    JobFailed {
        job_id: JobId,
        result: serde_json::Value,
    },

    #[error("job {job_id} timed out")]
    JobTimeout { job_id: JobId },

    #[error("job {job_id} was cancelled")]
    JobCancelled { job_id: JobId },

    #[error("log for job {job_id} is sealed")]
    LogSealed { job_id: JobId },

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: String,
        to: String,
    },

    #[error("executor error: {0}")]
    Executor(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => CoreError::NotFound {
                kind: kind.to_string(),
                id,
            },
            other => CoreError::StoreFailure(other),
        }
    }
}

impl CoreError {
    pub fn not_found(kind: impl Into<String>, id: impl std::fmt::Display) -> Self {
        CoreError::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Loader configuration errors are fatal at startup, not per request.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::CyclicDependency { .. }
                | CoreError::UnknownDependency { .. }
                | CoreError::DuplicateLoader { .. }
                | CoreError::Config(_)
        )
    }

    /// Process exit status for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::NotFound { .. } | CoreError::NotEvaluatable { .. } => 2,
            e if e.is_configuration() => 3,
            CoreError::UnknownSubmissionMode { .. } => 3,
            CoreError::JobTimeout { .. } | CoreError::JobCancelled { .. } => 4,
            CoreError::JobFailed { .. } | CoreError::UnknownJobError { .. } => 5,
            _ => 1,
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
