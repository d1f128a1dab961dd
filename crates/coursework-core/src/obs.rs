//! Structured observability hooks for context assembly and job lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via `run_span`
//! - Emission functions for job, run, provisioning and context events
//!
//! Events are emitted at `info!` level unless noted (filter with
//! `COURSEWORK_LOG`).

use tracing::{info, warn};

use crate::jobs::{CancelReason, JobState};

/// Run-scoped span. Attach with `.instrument(run_span(id))` so every
/// event inside the pipeline carries `run_id`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("coursework.run", run_id = %run_id)
}

/// Emit event: job placed on the queue.
pub fn emit_job_enqueued(job_id: &str, kind: &str, submitter: &str) {
    info!(event = "job.enqueued", job_id = %job_id, kind = %kind, submitter = %submitter);
}

/// Emit event: job moved between states.
pub fn emit_job_state_changed(job_id: &str, from: JobState, to: JobState) {
    info!(event = "job.state_changed", job_id = %job_id, from = %from, to = %to);
}

/// Emit event: queue position reported to a waiter (debug level).
pub fn emit_job_position(job_id: &str, rank: usize, total: usize) {
    tracing::debug!(event = "job.position", job_id = %job_id, rank = rank, total = total);
}

/// Emit event: job cancelled, with the reason.
pub fn emit_job_cancelled(job_id: &str, reason: CancelReason) {
    info!(event = "job.cancelled", job_id = %job_id, reason = %reason);
}

/// Emit event: job deadline elapsed before a terminal state (warning level).
pub fn emit_job_timeout(job_id: &str, deadline_secs: u64) {
    warn!(event = "job.timeout", job_id = %job_id, deadline_secs = deadline_secs);
}

/// Emit event: evaluation run started for a submission.
pub fn emit_run_started(run_id: &str, submission_id: &str, job_id: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        submission_id = %submission_id,
        job_id = %job_id,
    );
}

/// Emit event: evaluation run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: run pipeline step failed (warning level).
pub fn emit_run_failed(run_id: &str, step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, step = %step, error = %error);
}

/// Emit event: a linked resource was created on first access.
pub fn emit_provision_created(resource: &str, owner: &str, id: &str) {
    info!(event = "provision.created", resource = %resource, owner = %owner, id = %id);
}

/// Emit event: a concurrent first access created the resource first (warning level).
pub fn emit_provision_race_lost(resource: &str, owner: &str, key: &str) {
    warn!(event = "provision.race_lost", resource = %resource, owner = %owner, key = %key);
}

/// Emit event: a node's context finished resolving.
pub fn emit_context_built(assignment_id: &str, keys: usize, children: usize) {
    info!(
        event = "context.built",
        assignment_id = %assignment_id,
        keys = keys,
        children = children,
    );
}
