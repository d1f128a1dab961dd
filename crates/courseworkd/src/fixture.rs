//! JSON fixtures for seeding a store.
//!
//! ```json
//! {
//!   "assignments": [ ... ],
//!   "repositories": [ ... ],
//!   "submission_settings": [ ... ],
//!   "evaluation_settings": [ ... ],
//!   "boilerplates": [ ... ],
//!   "submissions": [ ... ]
//! }
//! ```
//!
//! Every section is optional. Records use the store's own field names.

use std::path::Path;

use anyhow::{Context, Result};
use coursework_state::{
    AssignmentRecord, BoilerplateRecord, EvaluationSettings, RepositoryRecord, Store,
    SubmissionRecord, SubmissionSettings,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub assignments: Vec<AssignmentRecord>,
    pub repositories: Vec<RepositoryRecord>,
    pub submission_settings: Vec<SubmissionSettings>,
    pub evaluation_settings: Vec<EvaluationSettings>,
    pub boilerplates: Vec<BoilerplateRecord>,
    pub submissions: Vec<SubmissionRecord>,
}

impl Fixture {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid fixture {}", path.display()))
    }

    pub fn record_count(&self) -> usize {
        self.assignments.len()
            + self.repositories.len()
            + self.submission_settings.len()
            + self.evaluation_settings.len()
            + self.boilerplates.len()
            + self.submissions.len()
    }

    /// Write every record. Repositories go first so boilerplate references resolve.
    pub async fn apply(&self, store: &dyn Store) -> Result<usize> {
        for repository in &self.repositories {
            store
                .create_repository(repository)
                .await
                .with_context(|| format!("repository {}", repository.repository_id))?;
        }
        for assignment in &self.assignments {
            store
                .put_assignment(assignment)
                .await
                .with_context(|| format!("assignment {}", assignment.key))?;
        }
        for settings in &self.submission_settings {
            store.put_submission_settings(settings).await?;
        }
        for settings in &self.evaluation_settings {
            store.put_evaluation_settings(settings).await?;
        }
        for boilerplate in &self.boilerplates {
            store.put_boilerplate(boilerplate).await?;
        }
        for submission in &self.submissions {
            store.put_submission(submission).await?;
        }
        Ok(self.record_count())
    }
}
