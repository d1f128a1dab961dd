//! Coursework-State: persistence layer for coursework
//!
//! This crate owns every record the core reads or writes and the async
//! store traits the core is written against. The core never talks to a
//! database directly; it receives an `Arc<dyn Store>` from the process
//! entry point.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: point lookups, filtered lists, create and update-or-insert.
//! No transactions are offered. Uniqueness of submission repository links
//! and access keys is enforced by the store itself.
//!
//! ## Key Components
//!
//! - `AssignmentStore`, `RepositoryStore`, `RunStore`: storage traits
//! - `MemoryStore`: in-memory fake with latency and fault injection
//! - `SurrealStore`: SurrealDB-backed implementation

mod error;
pub mod fakes;
mod migrations;
pub mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fakes::{MemoryStore, StoreOp};
pub use schema::{
    AccessKeyRecord, AssignmentId, AssignmentRecord, BoilerplateRecord, EvaluationRunId,
    EvaluationRunRecord, EvaluationSettings, JobId, JobRecord, Principal, RepositoryId,
    RepositoryRecord, SubmissionId, SubmissionRecord, SubmissionRepositoryLink,
    SubmissionSettings,
};
pub use storage_traits::{AssignmentStore, RepositoryStore, RunStore, Store, StorageResult};
pub use surreal_store::{SurrealConfig, SurrealStore};

/// Result type for connection and schema setup
pub type Result<T> = std::result::Result<T, StateError>;
