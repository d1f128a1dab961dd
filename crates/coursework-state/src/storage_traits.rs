//! Storage trait definitions for coursework
//!
//! These traits define what the core requires from a data store:
//! - `AssignmentStore`: assignment tree and per-assignment settings (read mostly)
//! - `RepositoryStore`: repositories, submission links and access keys
//! - `RunStore`: job snapshots and evaluation runs
//!
//! All traits are async and backend-agnostic. None of them offer
//! transactions. In-memory fakes are provided via the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::*;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// AssignmentStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Point lookup. Returns `StorageError::NotFound` if absent.
    async fn get_assignment(&self, id: &AssignmentId) -> StorageResult<AssignmentRecord>;

    /// Find a root assignment (no parent) by its key.
    async fn find_root_assignment(&self, key: &str) -> StorageResult<Option<AssignmentRecord>>;

    /// All root assignments sorted by `start` ascending (unscheduled first).
    async fn list_root_assignments(&self) -> StorageResult<Vec<AssignmentRecord>>;

    /// Children of `parent` in the order of `parent.children`.
    ///
    /// A dangling child reference is `StorageError::NotFound`.
    async fn children_of(&self, parent: &AssignmentRecord) -> StorageResult<Vec<AssignmentRecord>>;

    async fn submission_settings(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Option<SubmissionSettings>>;

    async fn evaluation_settings(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Option<EvaluationSettings>>;

    async fn boilerplate(&self, assignment: &AssignmentId)
        -> StorageResult<Option<BoilerplateRecord>>;

    /// Most recent submissions by `owner`, newest first, at most `limit`.
    async fn recent_submissions(
        &self,
        assignment: &AssignmentId,
        owner: &Principal,
        limit: usize,
    ) -> StorageResult<Vec<SubmissionRecord>>;

    async fn get_submission(&self, id: &SubmissionId) -> StorageResult<SubmissionRecord>;

    // -- update-or-insert ----------------------------------------------------

    async fn put_assignment(&self, record: &AssignmentRecord) -> StorageResult<()>;

    async fn put_submission_settings(&self, record: &SubmissionSettings) -> StorageResult<()>;

    async fn put_evaluation_settings(&self, record: &EvaluationSettings) -> StorageResult<()>;

    async fn put_boilerplate(&self, record: &BoilerplateRecord) -> StorageResult<()>;

    async fn put_submission(&self, record: &SubmissionRecord) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// RepositoryStore
// ---------------------------------------------------------------------------

/// Repositories and the linked resources provisioned on first access.
///
/// Guarantees:
/// - `create_submission_link` fails with `StorageError::Conflict` when a
///   link for the same `(assignment_id, target)` already exists.
/// - `create_access_key` fails with `StorageError::Conflict` when a key for
///   the same `(principal, context)` already exists.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn get_repository(&self, id: &RepositoryId) -> StorageResult<RepositoryRecord>;

    async fn create_repository(&self, record: &RepositoryRecord) -> StorageResult<()>;

    async fn find_submission_link(
        &self,
        assignment: &AssignmentId,
        target: &Principal,
    ) -> StorageResult<Option<SubmissionRepositoryLink>>;

    async fn create_submission_link(&self, link: &SubmissionRepositoryLink) -> StorageResult<()>;

    /// All links for an assignment (any target).
    async fn list_submission_links(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Vec<SubmissionRepositoryLink>>;

    /// All repositories owned by `owner`.
    async fn list_repositories(&self, owner: &Principal) -> StorageResult<Vec<RepositoryRecord>>;

    async fn find_access_key(
        &self,
        principal: &Principal,
        context: &str,
    ) -> StorageResult<Option<AccessKeyRecord>>;

    async fn create_access_key(&self, record: &AccessKeyRecord) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace the snapshot for `record.job_id`.
    async fn save_job(&self, record: &JobRecord) -> StorageResult<()>;

    async fn get_job(&self, id: &JobId) -> StorageResult<JobRecord>;

    /// Insert or replace the run for `record.run_id`.
    async fn save_run(&self, record: &EvaluationRunRecord) -> StorageResult<()>;

    async fn get_run(&self, id: &EvaluationRunId) -> StorageResult<EvaluationRunRecord>;

    /// Runs for a submission, oldest first.
    async fn runs_for_submission(
        &self,
        submission: &SubmissionId,
    ) -> StorageResult<Vec<EvaluationRunRecord>>;
}

/// Everything the core needs from one backend.
pub trait Store: AssignmentStore + RepositoryStore + RunStore {}

impl<T> Store for T where T: AssignmentStore + RepositoryStore + RunStore {}
