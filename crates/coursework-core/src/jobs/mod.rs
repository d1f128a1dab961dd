//! Job lifecycle: queue, state machine, log streaming, waiting and workers.

pub mod log;
pub mod queue;
pub mod state;
pub mod watcher;
pub mod worker;

pub use log::{JobLog, LogEntry, LogFollower, LogStream};
pub use queue::{Job, JobQueue, QueueConfig};
pub use state::{CancelReason, JobState, JobStatus};
pub use watcher::{JobWatcher, NoopSink, PositionSink, RecordingSink};
pub use worker::{CommandExecutor, CommandPayload, ExecutionOutcome, JobExecutor, Worker};
