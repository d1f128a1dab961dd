//! Coursework Core Library
//!
//! Assembles assignment contexts from dependency-ordered loaders and runs
//! evaluation jobs through a queue with position reporting, deadlines and
//! cooperative cancellation.
//!
//! Components, leaves first:
//! - `loader`: `LoaderSpec`, `LoaderRegistry` and the `DependencyResolver`
//! - `context`: recursive `ContextBuilder` over the assignment tree
//! - `loaders`: the standard loader set
//! - `provision`: idempotent repository and access key provisioning
//! - `jobs`: `JobQueue`, `Job` handles, `JobWatcher`, workers
//! - `run`: the `RunCoordinator` evaluation pipeline

pub mod config;
pub mod context;
pub mod error;
pub mod inherit;
pub mod jobs;
pub mod loader;
pub mod loaders;
pub mod metrics;
pub mod obs;
pub mod provision;
pub mod run;
pub mod telemetry;

pub use config::{CourseworkConfig, LoaderConfig, StoreBackend, StoreConfig};
pub use context::{Context, ContextBuilder, LoadInput};
pub use error::{CoreError, CoreResult};
pub use jobs::{
    CancelReason, CommandExecutor, ExecutionOutcome, Job, JobExecutor, JobLog, JobQueue,
    JobState, JobStatus, JobWatcher, NoopSink, PositionSink, QueueConfig, RecordingSink, Worker,
};
pub use loader::{DependencyResolver, LoaderRegistry, LoaderSpec, Resolved};
pub use loaders::standard_registry;
pub use provision::{ResourceProvisioner, SubmissionConfiguration, SubmissionMode};
pub use run::{EvaluationInput, Evaluator, JobResultEvaluator, RunCoordinator};
