//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryStore`, which satisfies every trait contract without any
//! external dependencies. Two knobs make concurrency behaviour observable:
//! `with_latency` suspends before every operation so concurrent callers
//! interleave, and `fail_next` makes the next call of one operation fail.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::*;
use crate::storage_traits::*;

/// Operations that can be made to fail once via [`MemoryStore::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateRepository,
    CreateSubmissionLink,
    CreateAccessKey,
    SaveJob,
    SaveRun,
    FindSubmissionLink,
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreOp::CreateRepository => "create_repository",
            StoreOp::CreateSubmissionLink => "create_submission_link",
            StoreOp::CreateAccessKey => "create_access_key",
            StoreOp::SaveJob => "save_job",
            StoreOp::SaveRun => "save_run",
            StoreOp::FindSubmissionLink => "find_submission_link",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct Tables {
    assignments: HashMap<AssignmentId, AssignmentRecord>,
    repositories: HashMap<RepositoryId, RepositoryRecord>,
    links: Vec<SubmissionRepositoryLink>,
    access_keys: Vec<AccessKeyRecord>,
    submission_settings: HashMap<AssignmentId, SubmissionSettings>,
    evaluation_settings: HashMap<AssignmentId, EvaluationSettings>,
    boilerplates: HashMap<AssignmentId, BoilerplateRecord>,
    submissions: HashMap<SubmissionId, SubmissionRecord>,
    jobs: HashMap<JobId, JobRecord>,
    runs: Vec<EvaluationRunRecord>,
}

/// In-memory store backed by plain collections behind one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    faults: Mutex<HashSet<StoreOp>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` before every operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next call of `op` fail with `StorageError::Injected`.
    pub fn fail_next(&self, op: StoreOp) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(op);
        }
    }

    /// Number of stored repositories (any owner).
    pub fn repository_count(&self) -> usize {
        self.tables.lock().map(|t| t.repositories.len()).unwrap_or(0)
    }

    /// Number of stored access keys.
    pub fn access_key_count(&self) -> usize {
        self.tables.lock().map(|t| t.access_keys.len()).unwrap_or(0)
    }

    fn tables(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }

    fn check_fault(&self, op: StoreOp) -> StorageResult<()> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))?;
        if faults.remove(&op) {
            return Err(StorageError::Injected { op: op.to_string() });
        }
        Ok(())
    }

    async fn pause(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn get_assignment(&self, id: &AssignmentId) -> StorageResult<AssignmentRecord> {
        self.pause().await;
        self.tables()?
            .assignments
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("assignment", id))
    }

    async fn find_root_assignment(&self, key: &str) -> StorageResult<Option<AssignmentRecord>> {
        self.pause().await;
        Ok(self
            .tables()?
            .assignments
            .values()
            .find(|a| a.is_root() && a.key == key)
            .cloned())
    }

    async fn list_root_assignments(&self) -> StorageResult<Vec<AssignmentRecord>> {
        self.pause().await;
        let mut roots: Vec<AssignmentRecord> = self
            .tables()?
            .assignments
            .values()
            .filter(|a| a.is_root())
            .cloned()
            .collect();
        roots.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.key.cmp(&b.key)));
        Ok(roots)
    }

    async fn children_of(&self, parent: &AssignmentRecord) -> StorageResult<Vec<AssignmentRecord>> {
        self.pause().await;
        let tables = self.tables()?;
        parent
            .children
            .iter()
            .map(|id| {
                tables
                    .assignments
                    .get(id)
                    .cloned()
                    .ok_or_else(|| StorageError::not_found("assignment", id))
            })
            .collect()
    }

    async fn submission_settings(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Option<SubmissionSettings>> {
        self.pause().await;
        Ok(self.tables()?.submission_settings.get(assignment).cloned())
    }

    async fn evaluation_settings(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Option<EvaluationSettings>> {
        self.pause().await;
        Ok(self.tables()?.evaluation_settings.get(assignment).cloned())
    }

    async fn boilerplate(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Option<BoilerplateRecord>> {
        self.pause().await;
        Ok(self.tables()?.boilerplates.get(assignment).cloned())
    }

    async fn recent_submissions(
        &self,
        assignment: &AssignmentId,
        owner: &Principal,
        limit: usize,
    ) -> StorageResult<Vec<SubmissionRecord>> {
        self.pause().await;
        let mut found: Vec<SubmissionRecord> = self
            .tables()?
            .submissions
            .values()
            .filter(|s| &s.assignment_id == assignment && &s.owner == owner)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.at.cmp(&a.at));
        found.truncate(limit);
        Ok(found)
    }

    async fn get_submission(&self, id: &SubmissionId) -> StorageResult<SubmissionRecord> {
        self.pause().await;
        self.tables()?
            .submissions
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("submission", id))
    }

    async fn put_assignment(&self, record: &AssignmentRecord) -> StorageResult<()> {
        self.pause().await;
        self.tables()?
            .assignments
            .insert(record.assignment_id.clone(), record.clone());
        Ok(())
    }

    async fn put_submission_settings(&self, record: &SubmissionSettings) -> StorageResult<()> {
        self.pause().await;
        self.tables()?
            .submission_settings
            .insert(record.assignment_id.clone(), record.clone());
        Ok(())
    }

    async fn put_evaluation_settings(&self, record: &EvaluationSettings) -> StorageResult<()> {
        self.pause().await;
        self.tables()?
            .evaluation_settings
            .insert(record.assignment_id.clone(), record.clone());
        Ok(())
    }

    async fn put_boilerplate(&self, record: &BoilerplateRecord) -> StorageResult<()> {
        self.pause().await;
        self.tables()?
            .boilerplates
            .insert(record.assignment_id.clone(), record.clone());
        Ok(())
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> StorageResult<()> {
        self.pause().await;
        self.tables()?
            .submissions
            .insert(record.submission_id.clone(), record.clone());
        Ok(())
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn get_repository(&self, id: &RepositoryId) -> StorageResult<RepositoryRecord> {
        self.pause().await;
        self.tables()?
            .repositories
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("repository", id))
    }

    async fn create_repository(&self, record: &RepositoryRecord) -> StorageResult<()> {
        self.pause().await;
        self.check_fault(StoreOp::CreateRepository)?;
        let mut tables = self.tables()?;
        if tables.repositories.contains_key(&record.repository_id) {
            return Err(StorageError::Conflict {
                kind: "repository",
                key: record.repository_id.to_string(),
            });
        }
        tables
            .repositories
            .insert(record.repository_id.clone(), record.clone());
        Ok(())
    }

    async fn find_submission_link(
        &self,
        assignment: &AssignmentId,
        target: &Principal,
    ) -> StorageResult<Option<SubmissionRepositoryLink>> {
        self.pause().await;
        self.check_fault(StoreOp::FindSubmissionLink)?;
        Ok(self
            .tables()?
            .links
            .iter()
            .find(|l| &l.assignment_id == assignment && &l.target == target)
            .cloned())
    }

    async fn create_submission_link(&self, link: &SubmissionRepositoryLink) -> StorageResult<()> {
        self.pause().await;
        self.check_fault(StoreOp::CreateSubmissionLink)?;
        let mut tables = self.tables()?;
        let exists = tables
            .links
            .iter()
            .any(|l| l.assignment_id == link.assignment_id && l.target == link.target);
        if exists {
            return Err(StorageError::Conflict {
                kind: "submission link",
                key: link.unique_key(),
            });
        }
        tables.links.push(link.clone());
        Ok(())
    }

    async fn list_submission_links(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Vec<SubmissionRepositoryLink>> {
        self.pause().await;
        Ok(self
            .tables()?
            .links
            .iter()
            .filter(|l| &l.assignment_id == assignment)
            .cloned()
            .collect())
    }

    async fn list_repositories(&self, owner: &Principal) -> StorageResult<Vec<RepositoryRecord>> {
        self.pause().await;
        let mut repos: Vec<RepositoryRecord> = self
            .tables()?
            .repositories
            .values()
            .filter(|r| &r.owner == owner)
            .cloned()
            .collect();
        repos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(repos)
    }

    async fn find_access_key(
        &self,
        principal: &Principal,
        context: &str,
    ) -> StorageResult<Option<AccessKeyRecord>> {
        self.pause().await;
        Ok(self
            .tables()?
            .access_keys
            .iter()
            .find(|k| &k.principal == principal && k.context == context)
            .cloned())
    }

    async fn create_access_key(&self, record: &AccessKeyRecord) -> StorageResult<()> {
        self.pause().await;
        self.check_fault(StoreOp::CreateAccessKey)?;
        let mut tables = self.tables()?;
        let exists = tables
            .access_keys
            .iter()
            .any(|k| k.principal == record.principal && k.context == record.context);
        if exists {
            return Err(StorageError::Conflict {
                kind: "access key",
                key: record.unique_key(),
            });
        }
        tables.access_keys.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_job(&self, record: &JobRecord) -> StorageResult<()> {
        self.pause().await;
        self.check_fault(StoreOp::SaveJob)?;
        self.tables()?
            .jobs
            .insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> StorageResult<JobRecord> {
        self.pause().await;
        self.tables()?
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("job", id))
    }

    async fn save_run(&self, record: &EvaluationRunRecord) -> StorageResult<()> {
        self.pause().await;
        self.check_fault(StoreOp::SaveRun)?;
        let mut tables = self.tables()?;
        match tables.runs.iter_mut().find(|r| r.run_id == record.run_id) {
            Some(existing) => *existing = record.clone(),
            None => tables.runs.push(record.clone()),
        }
        Ok(())
    }

    async fn get_run(&self, id: &EvaluationRunId) -> StorageResult<EvaluationRunRecord> {
        self.pause().await;
        self.tables()?
            .runs
            .iter()
            .find(|r| &r.run_id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("evaluation run", id))
    }

    async fn runs_for_submission(
        &self,
        submission: &SubmissionId,
    ) -> StorageResult<Vec<EvaluationRunRecord>> {
        self.pause().await;
        Ok(self
            .tables()?
            .runs
            .iter()
            .filter(|r| &r.submission_id == submission)
            .cloned()
            .collect())
    }
}
