//! Record definitions for coursework tables
//!
//! Tables:
//! - assignments: hierarchical assignment nodes (parent ref + ordered children)
//! - repositories: per-owner code repositories
//! - submission_links: (assignment, principal) -> repository
//! - access_keys: per-(principal, context) secrets
//! - submission_settings / evaluation_settings / boilerplates: per-assignment config
//! - submissions: submitted work, newest first
//! - jobs / evaluation_runs: queued evaluation work and its persisted run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random id
            pub fn new() -> Self {
                $name(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

record_id!(
    /// Unique identifier for an assignment node
    AssignmentId
);
record_id!(
    /// Unique identifier for a repository
    RepositoryId
);
record_id!(
    /// Unique identifier for a submission
    SubmissionId
);
record_id!(
    /// Unique identifier for a queued job
    JobId
);
record_id!(
    /// Unique identifier for an evaluation run
    EvaluationRunId
);

/// The acting user, e.g. `cas:mis2`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Principal(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Principal(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Assignments
// ---------------------------------------------------------------------------

/// Assignment node
///
/// `parent` is a back-reference, not ownership. `children` is the ordered
/// list of child ids and is the authority for traversal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub assignment_id: AssignmentId,
    /// Human-facing key, unique among root assignments
    pub key: String,
    pub title: String,
    pub parent: Option<AssignmentId>,
    #[serde(default)]
    pub children: Vec<AssignmentId>,
    pub start: Option<DateTime<Utc>>,
    /// Free-form properties; the value `"inherit"` defers to the parent
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl AssignmentRecord {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            assignment_id: AssignmentId::new(),
            key: key.into(),
            title: title.into(),
            parent: None,
            children: Vec::new(),
            start: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Link `child` under `self`, appending it to the child order.
    pub fn adopt(&mut self, child: &mut AssignmentRecord) {
        child.parent = Some(self.assignment_id.clone());
        if !self.children.contains(&child.assignment_id) {
            self.children.push(child.assignment_id.clone());
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

// ---------------------------------------------------------------------------
// Repositories, links and access keys
// ---------------------------------------------------------------------------

/// Code repository owned by a principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub repository_id: RepositoryId,
    pub owner: Principal,
    pub created_at: DateTime<Utc>,
}

impl RepositoryRecord {
    pub fn new(owner: Principal) -> Self {
        Self {
            repository_id: RepositoryId::new(),
            owner,
            created_at: Utc::now(),
        }
    }
}

/// Links an assignment and a target principal to the repository they submit to.
///
/// At most one link exists per `(assignment_id, target)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRepositoryLink {
    pub link_id: String,
    pub assignment_id: AssignmentId,
    pub target: Principal,
    pub repository_id: RepositoryId,
    pub created_at: DateTime<Utc>,
}

impl SubmissionRepositoryLink {
    pub fn new(
        assignment_id: AssignmentId,
        target: Principal,
        repository_id: RepositoryId,
    ) -> Self {
        Self {
            link_id: Uuid::new_v4().to_string(),
            assignment_id,
            target,
            repository_id,
            created_at: Utc::now(),
        }
    }

    /// Uniqueness key used by stores
    pub fn unique_key(&self) -> String {
        format!("{}/{}", self.assignment_id, self.target)
    }
}

/// Secret key for a principal in a given context (e.g. `git`).
///
/// At most one key exists per `(principal, context)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessKeyRecord {
    pub key_id: String,
    pub principal: Principal,
    pub context: String,
    pub secret: String,
    /// SHA-256 hex of `secret`
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl AccessKeyRecord {
    /// Generate a fresh random key for `(principal, context)`.
    pub fn generate(principal: Principal, context: impl Into<String>) -> Self {
        let secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let fingerprint = Self::fingerprint_of(&secret);
        Self {
            key_id: Uuid::new_v4().to_string(),
            principal,
            context: context.into(),
            secret,
            fingerprint,
            created_at: Utc::now(),
        }
    }

    pub fn fingerprint_of(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Uniqueness key used by stores
    pub fn unique_key(&self) -> String {
        format!("{}/{}", self.principal, self.context)
    }
}

// ---------------------------------------------------------------------------
// Per-assignment settings
// ---------------------------------------------------------------------------

/// How an assignment accepts submissions. `mode` is free text from the
/// record; the core decides which modes it understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionSettings {
    pub assignment_id: AssignmentId,
    pub mode: String,
}

/// How submissions to an assignment are evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub assignment_id: AssignmentId,
    /// Job type enqueued for evaluation
    pub kind: String,
    /// Command run by the evaluation worker (first element is the executable)
    #[serde(default)]
    pub command: Vec<String>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Starter code for an assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoilerplateRecord {
    pub assignment_id: AssignmentId,
    pub repository_id: Option<RepositoryId>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A piece of submitted work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: SubmissionId,
    pub assignment_id: AssignmentId,
    pub owner: Principal,
    pub repository_id: Option<RepositoryId>,
    pub at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn new(assignment_id: AssignmentId, owner: Principal) -> Self {
        Self {
            submission_id: SubmissionId::new(),
            assignment_id,
            owner,
            repository_id: None,
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs and evaluation runs
// ---------------------------------------------------------------------------

/// Persisted snapshot of a queued job. `state` is one of
/// `pending | active | cancel | error | complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub kind: String,
    pub submitter: Principal,
    pub payload: serde_json::Value,
    pub state: String,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Links a submission to the job that evaluates it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRunRecord {
    pub run_id: EvaluationRunId,
    pub submission_id: SubmissionId,
    pub job_id: JobId,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl EvaluationRunRecord {
    pub fn new(submission_id: SubmissionId, job_id: JobId) -> Self {
        Self {
            run_id: EvaluationRunId::new(),
            submission_id,
            job_id,
            result: None,
            created_at: Utc::now(),
            evaluated_at: None,
        }
    }

    /// Record the evaluation result.
    pub fn evaluated(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self.evaluated_at = Some(Utc::now());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adopt_sets_parent_and_preserves_order() {
        let mut parent = AssignmentRecord::new("a1", "Assignment 1");
        let mut first = AssignmentRecord::new("a1.1", "Part 1");
        let mut second = AssignmentRecord::new("a1.2", "Part 2");

        parent.adopt(&mut first);
        parent.adopt(&mut second);
        parent.adopt(&mut first);

        assert_eq!(
            parent.children,
            vec![first.assignment_id.clone(), second.assignment_id.clone()]
        );
        assert_eq!(first.parent, Some(parent.assignment_id.clone()));
        assert!(parent.is_root());
        assert!(!second.is_root());
    }

    #[test]
    fn test_access_key_fingerprint_matches_secret() {
        let key = AccessKeyRecord::generate(Principal::from("cas:mis2"), "git");
        assert_eq!(key.fingerprint, AccessKeyRecord::fingerprint_of(&key.secret));
        assert_eq!(key.fingerprint.len(), 64);
        assert_eq!(key.unique_key(), "cas:mis2/git");
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = AccessKeyRecord::generate(Principal::from("p"), "git");
        let b = AccessKeyRecord::generate(Principal::from("p"), "git");
        assert_ne!(a.secret, b.secret);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = AssignmentId::from("a-1");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("a-1"));
    }

    #[test]
    fn test_evaluated_run_records_result() {
        let run = EvaluationRunRecord::new(SubmissionId::new(), JobId::new())
            .evaluated(serde_json::json!({ "score": 1 }));
        assert_eq!(run.result, Some(serde_json::json!({ "score": 1 })));
        assert!(run.evaluated_at.is_some());
    }
}
