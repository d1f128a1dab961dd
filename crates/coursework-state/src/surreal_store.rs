//! SurrealDB-backed implementation of the coursework store traits
//!
//! Records are stored as-is (schemaless tables, one per record type) and
//! looked up by their own id fields rather than SurrealDB record ids.
//! Uniqueness of submission links and access keys comes from the unique
//! indexes defined in `migrations`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::*;
use crate::storage_traits::*;

/// Connection settings for [`SurrealStore::connect`]
#[derive(Debug, Clone)]
pub struct SurrealConfig {
    /// Endpoint URL: `mem://`, `surrealkv://path` or `ws(s)://host`
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl Default for SurrealConfig {
    fn default() -> Self {
        Self {
            url: "surrealkv://.coursework/db".to_string(),
            namespace: "coursework".to_string(),
            database: "main".to_string(),
        }
    }
}

/// SurrealDB-backed [`Store`].
#[derive(Clone)]
pub struct SurrealStore {
    db: Surreal<Any>,
}

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Map a create failure, recognising unique index violations.
fn create_error(err: surrealdb::Error, kind: &'static str, key: String) -> StorageError {
    let message = err.to_string();
    if message.contains("already contains") || message.contains("already exists") {
        StorageError::Conflict { kind, key }
    } else {
        StorageError::Backend(message)
    }
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&SurrealConfig {
            url: "mem://".to_string(),
            ..SurrealConfig::default()
        })
        .await
    }

    /// Connect, select namespace/database and run the schema migrations.
    pub async fn connect(config: &SurrealConfig) -> crate::Result<Self> {
        if let Some(path) = config.url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.url, e))
            })?;

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(url = %config.url, "SurrealStore connected");
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn select<T: DeserializeOwned>(
        &self,
        sql: &str,
        binds: Vec<(&'static str, String)>,
    ) -> StorageResult<Vec<T>> {
        let mut query = self.db.query(sql.to_string());
        for bind in binds {
            query = query.bind(bind);
        }
        let mut res = query.await.map_err(backend)?;
        res.take(0).map_err(backend)
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        sql: &str,
        binds: Vec<(&'static str, String)>,
    ) -> StorageResult<Option<T>> {
        Ok(self.select(sql, binds).await?.into_iter().next())
    }

    async fn insert<T: Serialize + DeserializeOwned + 'static>(
        &self,
        table: &'static str,
        row: T,
        kind: &'static str,
        key: String,
    ) -> StorageResult<()> {
        let _created: Option<T> = self
            .db
            .create(table)
            .content(row)
            .await
            .map_err(|e| create_error(e, kind, key))?;
        Ok(())
    }

    /// Replace the row whose `id_field` equals `id`, inserting it if absent.
    ///
    /// Two statements, not atomic: this is update-or-insert, not a
    /// transaction.
    async fn upsert<T: Serialize + DeserializeOwned + Clone + 'static>(
        &self,
        table: &'static str,
        id_field: &'static str,
        id: String,
        row: T,
        kind: &'static str,
    ) -> StorageResult<()> {
        let sql = format!(
            "UPDATE {table} CONTENT $row WHERE {id_field} = $id RETURN VALUE {id_field}"
        );
        let mut res = self
            .db
            .query(sql)
            .bind(("row", row.clone()))
            .bind(("id", id.clone()))
            .await
            .map_err(backend)?;
        let updated: Vec<String> = res.take(0).map_err(backend)?;
        if !updated.is_empty() {
            return Ok(());
        }
        self.insert(table, row, kind, id).await
    }
}

#[async_trait]
impl AssignmentStore for SurrealStore {
    #[instrument(skip(self))]
    async fn get_assignment(&self, id: &AssignmentId) -> StorageResult<AssignmentRecord> {
        self.select_one(
            "SELECT * FROM assignments WHERE assignment_id = $id",
            vec![("id", id.to_string())],
        )
        .await?
        .ok_or_else(|| StorageError::not_found("assignment", id))
    }

    async fn find_root_assignment(&self, key: &str) -> StorageResult<Option<AssignmentRecord>> {
        self.select_one(
            "SELECT * FROM assignments WHERE key = $key AND (parent = NONE OR parent = NULL)",
            vec![("key", key.to_string())],
        )
        .await
    }

    async fn list_root_assignments(&self) -> StorageResult<Vec<AssignmentRecord>> {
        let mut roots: Vec<AssignmentRecord> = self
            .select(
                "SELECT * FROM assignments WHERE parent = NONE OR parent = NULL",
                vec![],
            )
            .await?;
        roots.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.key.cmp(&b.key)));
        Ok(roots)
    }

    async fn children_of(&self, parent: &AssignmentRecord) -> StorageResult<Vec<AssignmentRecord>> {
        let mut children = Vec::with_capacity(parent.children.len());
        for id in &parent.children {
            children.push(self.get_assignment(id).await?);
        }
        Ok(children)
    }

    async fn submission_settings(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Option<SubmissionSettings>> {
        self.select_one(
            "SELECT * FROM submission_settings WHERE assignment_id = $id",
            vec![("id", assignment.to_string())],
        )
        .await
    }

    async fn evaluation_settings(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Option<EvaluationSettings>> {
        self.select_one(
            "SELECT * FROM evaluation_settings WHERE assignment_id = $id",
            vec![("id", assignment.to_string())],
        )
        .await
    }

    async fn boilerplate(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Option<BoilerplateRecord>> {
        self.select_one(
            "SELECT * FROM boilerplates WHERE assignment_id = $id",
            vec![("id", assignment.to_string())],
        )
        .await
    }

    async fn recent_submissions(
        &self,
        assignment: &AssignmentId,
        owner: &Principal,
        limit: usize,
    ) -> StorageResult<Vec<SubmissionRecord>> {
        let mut found: Vec<SubmissionRecord> = self
            .select(
                "SELECT * FROM submissions WHERE assignment_id = $id AND owner = $owner",
                vec![("id", assignment.to_string()), ("owner", owner.to_string())],
            )
            .await?;
        found.sort_by(|a, b| b.at.cmp(&a.at));
        found.truncate(limit);
        Ok(found)
    }

    async fn get_submission(&self, id: &SubmissionId) -> StorageResult<SubmissionRecord> {
        self.select_one(
            "SELECT * FROM submissions WHERE submission_id = $id",
            vec![("id", id.to_string())],
        )
        .await?
        .ok_or_else(|| StorageError::not_found("submission", id))
    }

    async fn put_assignment(&self, record: &AssignmentRecord) -> StorageResult<()> {
        self.upsert(
            "assignments",
            "assignment_id",
            record.assignment_id.to_string(),
            record.clone(),
            "assignment",
        )
        .await
    }

    async fn put_submission_settings(&self, record: &SubmissionSettings) -> StorageResult<()> {
        self.upsert(
            "submission_settings",
            "assignment_id",
            record.assignment_id.to_string(),
            record.clone(),
            "submission settings",
        )
        .await
    }

    async fn put_evaluation_settings(&self, record: &EvaluationSettings) -> StorageResult<()> {
        self.upsert(
            "evaluation_settings",
            "assignment_id",
            record.assignment_id.to_string(),
            record.clone(),
            "evaluation settings",
        )
        .await
    }

    async fn put_boilerplate(&self, record: &BoilerplateRecord) -> StorageResult<()> {
        self.upsert(
            "boilerplates",
            "assignment_id",
            record.assignment_id.to_string(),
            record.clone(),
            "boilerplate",
        )
        .await
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> StorageResult<()> {
        self.upsert(
            "submissions",
            "submission_id",
            record.submission_id.to_string(),
            record.clone(),
            "submission",
        )
        .await
    }
}

#[async_trait]
impl RepositoryStore for SurrealStore {
    async fn get_repository(&self, id: &RepositoryId) -> StorageResult<RepositoryRecord> {
        self.select_one(
            "SELECT * FROM repositories WHERE repository_id = $id",
            vec![("id", id.to_string())],
        )
        .await?
        .ok_or_else(|| StorageError::not_found("repository", id))
    }

    #[instrument(skip(self, record), fields(repository_id = %record.repository_id))]
    async fn create_repository(&self, record: &RepositoryRecord) -> StorageResult<()> {
        debug!("creating repository");
        self.insert(
            "repositories",
            record.clone(),
            "repository",
            record.repository_id.to_string(),
        )
        .await
    }

    async fn find_submission_link(
        &self,
        assignment: &AssignmentId,
        target: &Principal,
    ) -> StorageResult<Option<SubmissionRepositoryLink>> {
        self.select_one(
            "SELECT * FROM submission_links WHERE assignment_id = $id AND target = $target",
            vec![("id", assignment.to_string()), ("target", target.to_string())],
        )
        .await
    }

    #[instrument(skip(self, link), fields(key = %link.unique_key()))]
    async fn create_submission_link(&self, link: &SubmissionRepositoryLink) -> StorageResult<()> {
        debug!("creating submission link");
        self.insert(
            "submission_links",
            link.clone(),
            "submission link",
            link.unique_key(),
        )
        .await
    }

    async fn list_submission_links(
        &self,
        assignment: &AssignmentId,
    ) -> StorageResult<Vec<SubmissionRepositoryLink>> {
        self.select(
            "SELECT * FROM submission_links WHERE assignment_id = $id",
            vec![("id", assignment.to_string())],
        )
        .await
    }

    async fn list_repositories(&self, owner: &Principal) -> StorageResult<Vec<RepositoryRecord>> {
        let mut repos: Vec<RepositoryRecord> = self
            .select(
                "SELECT * FROM repositories WHERE owner = $owner",
                vec![("owner", owner.to_string())],
            )
            .await?;
        repos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(repos)
    }

    async fn find_access_key(
        &self,
        principal: &Principal,
        context: &str,
    ) -> StorageResult<Option<AccessKeyRecord>> {
        self.select_one(
            "SELECT * FROM access_keys WHERE principal = $principal AND context = $context",
            vec![
                ("principal", principal.to_string()),
                ("context", context.to_string()),
            ],
        )
        .await
    }

    async fn create_access_key(&self, record: &AccessKeyRecord) -> StorageResult<()> {
        self.insert(
            "access_keys",
            record.clone(),
            "access key",
            record.unique_key(),
        )
        .await
    }
}

#[async_trait]
impl RunStore for SurrealStore {
    async fn save_job(&self, record: &JobRecord) -> StorageResult<()> {
        self.upsert(
            "jobs",
            "job_id",
            record.job_id.to_string(),
            record.clone(),
            "job",
        )
        .await
    }

    async fn get_job(&self, id: &JobId) -> StorageResult<JobRecord> {
        self.select_one(
            "SELECT * FROM jobs WHERE job_id = $id",
            vec![("id", id.to_string())],
        )
        .await?
        .ok_or_else(|| StorageError::not_found("job", id))
    }

    async fn save_run(&self, record: &EvaluationRunRecord) -> StorageResult<()> {
        self.upsert(
            "evaluation_runs",
            "run_id",
            record.run_id.to_string(),
            record.clone(),
            "evaluation run",
        )
        .await
    }

    async fn get_run(&self, id: &EvaluationRunId) -> StorageResult<EvaluationRunRecord> {
        self.select_one(
            "SELECT * FROM evaluation_runs WHERE run_id = $id",
            vec![("id", id.to_string())],
        )
        .await?
        .ok_or_else(|| StorageError::not_found("evaluation run", id))
    }

    async fn runs_for_submission(
        &self,
        submission: &SubmissionId,
    ) -> StorageResult<Vec<EvaluationRunRecord>> {
        let mut runs: Vec<EvaluationRunRecord> = self
            .select(
                "SELECT * FROM evaluation_runs WHERE submission_id = $id",
                vec![("id", submission.to_string())],
            )
            .await?;
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }
}
