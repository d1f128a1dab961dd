//! Find-or-create of per-(assignment, principal) submission resources.
//!
//! The store guarantees at most one submission link per
//! `(assignment, target)` and one access key per `(principal, context)`.
//! When a concurrent first access wins that race, the loser re-reads the
//! winner's row and returns it. The loser's repository stays behind as an
//! orphan; nothing is rolled back.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use coursework_state::{
    AccessKeyRecord, AssignmentId, Principal, RepositoryRecord, Store, StorageError,
    SubmissionRepositoryLink, SubmissionSettings,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{CoreError, CoreResult};
use crate::metrics::METRICS;
use crate::obs;

/// Submission modes the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    Git,
    Disabled,
}

impl FromStr for SubmissionMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(SubmissionMode::Git),
            "disabled" => Ok(SubmissionMode::Disabled),
            other => Err(CoreError::UnknownSubmissionMode {
                mode: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmissionMode::Git => "git",
            SubmissionMode::Disabled => "disabled",
        })
    }
}

/// Where a principal submits work for an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionConfiguration {
    pub mode: SubmissionMode,
    pub repository: RepositoryRecord,
}

#[derive(Clone)]
pub struct ResourceProvisioner {
    store: Arc<dyn Store>,
}

impl fmt::Debug for ResourceProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceProvisioner").finish_non_exhaustive()
    }
}

impl ResourceProvisioner {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve the submission configuration for `(assignment, principal)`.
    ///
    /// Absent settings or an anonymous principal yield `None`, as does mode
    /// `disabled`. Mode `git` finds or creates the linked repository.
    #[instrument(skip_all, fields(assignment_id = %assignment))]
    pub async fn configure(
        &self,
        assignment: &AssignmentId,
        principal: Option<&Principal>,
        settings: Option<&SubmissionSettings>,
    ) -> CoreResult<Option<SubmissionConfiguration>> {
        let (Some(settings), Some(principal)) = (settings, principal) else {
            return Ok(None);
        };

        match settings.mode.parse::<SubmissionMode>()? {
            SubmissionMode::Disabled => Ok(None),
            SubmissionMode::Git => {
                let repository = self.submission_repository(assignment, principal).await?;
                Ok(Some(SubmissionConfiguration {
                    mode: SubmissionMode::Git,
                    repository,
                }))
            }
        }
    }

    /// Get-or-create the repository linked to `(assignment, principal)`.
    pub async fn submission_repository(
        &self,
        assignment: &AssignmentId,
        principal: &Principal,
    ) -> CoreResult<RepositoryRecord> {
        if let Some(link) = self.store.find_submission_link(assignment, principal).await? {
            debug!(repository_id = %link.repository_id, "existing submission link");
            return Ok(self.store.get_repository(&link.repository_id).await?);
        }

        let repository = RepositoryRecord::new(principal.clone());
        self.store.create_repository(&repository).await?;
        obs::emit_provision_created(
            "repository",
            principal.as_str(),
            repository.repository_id.as_str(),
        );

        let link = SubmissionRepositoryLink::new(
            assignment.clone(),
            principal.clone(),
            repository.repository_id.clone(),
        );
        match self.store.create_submission_link(&link).await {
            Ok(()) => {
                METRICS.inc_resources_provisioned();
                obs::emit_provision_created("submission_link", principal.as_str(), &link.link_id);
                Ok(repository)
            }
            Err(err) if err.is_conflict() => {
                METRICS.inc_provision_races_lost();
                obs::emit_provision_race_lost(
                    "submission_link",
                    principal.as_str(),
                    &link.unique_key(),
                );
                let winner = self
                    .store
                    .find_submission_link(assignment, principal)
                    .await?
                    .ok_or_else(|| vanished("submission_link", &link.unique_key()))?;
                Ok(self.store.get_repository(&winner.repository_id).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Get-or-create the access key for `(principal, context)`.
    #[instrument(skip_all, fields(principal = %principal, context = %context))]
    pub async fn access_key(
        &self,
        principal: &Principal,
        context: &str,
    ) -> CoreResult<AccessKeyRecord> {
        if let Some(key) = self.store.find_access_key(principal, context).await? {
            return Ok(key);
        }

        let key = AccessKeyRecord::generate(principal.clone(), context);
        match self.store.create_access_key(&key).await {
            Ok(()) => {
                METRICS.inc_resources_provisioned();
                obs::emit_provision_created("access_key", principal.as_str(), &key.fingerprint);
                Ok(key)
            }
            Err(err) if err.is_conflict() => {
                METRICS.inc_provision_races_lost();
                obs::emit_provision_race_lost("access_key", principal.as_str(), &key.unique_key());
                self.store
                    .find_access_key(principal, context)
                    .await?
                    .ok_or_else(|| vanished("access_key", &key.unique_key()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

// A conflicting row that cannot be re-read means the store broke its own
// uniqueness contract.
fn vanished(kind: &str, key: &str) -> CoreError {
    CoreError::StoreFailure(StorageError::Backend(format!(
        "{kind} {key} conflicted but could not be read back"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursework_state::{MemoryStore, RepositoryStore};

    fn settings(mode: &str) -> SubmissionSettings {
        SubmissionSettings {
            assignment_id: AssignmentId::from("a1"),
            mode: mode.to_string(),
        }
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("git".parse::<SubmissionMode>().unwrap(), SubmissionMode::Git);
        assert_eq!("disabled".parse::<SubmissionMode>().unwrap(), SubmissionMode::Disabled);
        assert!(matches!(
            "svn".parse::<SubmissionMode>(),
            Err(CoreError::UnknownSubmissionMode { mode }) if mode == "svn"
        ));
    }

    #[tokio::test]
    async fn missing_settings_or_principal_is_none() {
        let store = Arc::new(MemoryStore::new());
        let provisioner = ResourceProvisioner::new(store.clone());
        let assignment = AssignmentId::from("a1");
        let principal = Principal::from("cas:mis2");

        assert!(provisioner
            .configure(&assignment, Some(&principal), None)
            .await
            .unwrap()
            .is_none());
        assert!(provisioner
            .configure(&assignment, None, Some(&settings("git")))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.repository_count(), 0);
    }

    #[tokio::test]
    async fn disabled_mode_creates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let provisioner = ResourceProvisioner::new(store.clone());

        let config = provisioner
            .configure(
                &AssignmentId::from("a1"),
                Some(&Principal::from("cas:mis2")),
                Some(&settings("disabled")),
            )
            .await
            .unwrap();
        assert!(config.is_none());
        assert_eq!(store.repository_count(), 0);
    }

    #[tokio::test]
    async fn unknown_mode_is_an_error() {
        let provisioner = ResourceProvisioner::new(Arc::new(MemoryStore::new()));
        let err = provisioner
            .configure(
                &AssignmentId::from("a1"),
                Some(&Principal::from("cas:mis2")),
                Some(&settings("ftp")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownSubmissionMode { .. }));
    }

    #[tokio::test]
    async fn existing_link_is_reused() {
        let store = Arc::new(MemoryStore::new());
        let principal = Principal::from("cas:mis2");
        let assignment = AssignmentId::from("a1");
        let repo = RepositoryRecord::new(principal.clone());
        store.create_repository(&repo).await.unwrap();
        store
            .create_submission_link(&SubmissionRepositoryLink::new(
                assignment.clone(),
                principal.clone(),
                repo.repository_id.clone(),
            ))
            .await
            .unwrap();

        let provisioner = ResourceProvisioner::new(store.clone());
        let found = provisioner
            .submission_repository(&assignment, &principal)
            .await
            .unwrap();
        assert_eq!(found, repo);
        assert_eq!(store.repository_count(), 1);
    }

    #[tokio::test]
    async fn access_key_get_or_create() {
        let store = Arc::new(MemoryStore::new());
        let provisioner = ResourceProvisioner::new(store.clone());
        let principal = Principal::from("cas:mis2");

        let first = provisioner.access_key(&principal, "git").await.unwrap();
        let second = provisioner.access_key(&principal, "git").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.access_key_count(), 1);
    }
}
