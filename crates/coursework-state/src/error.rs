//! Error types for coursework-state

use thiserror::Error;

/// Errors raised while connecting to a backend or preparing its schema
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::SchemaSetup(err.to_string())
    }
}

/// Errors returned by store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Point lookup found nothing
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A uniqueness constraint rejected a create
    #[error("{kind} already exists for {key}")]
    Conflict { kind: &'static str, key: String },

    /// Opaque backend failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Record could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failure injected by a test fake
    #[error("injected failure in {op}")]
    Injected { op: String },
}

impl StorageError {
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        StorageError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
