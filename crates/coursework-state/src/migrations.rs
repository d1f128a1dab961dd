//! SurrealDB schema migrations and initialization
//!
//! Every statement uses `IF NOT EXISTS`, so running the migrations on each
//! connect is idempotent.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all coursework tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing coursework SurrealDB schema");

    init_assignment_tables(db).await?;
    init_repository_tables(db).await?;
    init_run_tables(db).await?;

    info!("coursework schema initialization complete");
    Ok(())
}

async fn apply(db: &Surreal<Any>, sql: &str) -> Result<()> {
    db.query(sql)
        .await?
        .check()
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Assignment tree and per-assignment settings
///
/// Schema:
/// ```text
/// TABLE assignments         { assignment_id (unique), key, parent?, children[], start?, properties }
/// TABLE submission_settings { assignment_id (unique), mode }
/// TABLE evaluation_settings { assignment_id (unique), kind, command[], timeout_secs?, options }
/// TABLE boilerplates        { assignment_id (unique), repository_id?, description? }
/// TABLE submissions         { submission_id (unique), assignment_id, owner, at }
/// ```
async fn init_assignment_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing assignment tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS assignments SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_assignment_id ON TABLE assignments COLUMNS assignment_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_assignment_parent_key ON TABLE assignments COLUMNS parent, key;

        DEFINE TABLE IF NOT EXISTS submission_settings SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_submission_settings ON TABLE submission_settings COLUMNS assignment_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS evaluation_settings SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_evaluation_settings ON TABLE evaluation_settings COLUMNS assignment_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS boilerplates SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_boilerplates ON TABLE boilerplates COLUMNS assignment_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS submissions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_submission_id ON TABLE submissions COLUMNS submission_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_submission_owner ON TABLE submissions COLUMNS assignment_id, owner, at;
    "#;

    apply(db, sql).await?;
    info!("✓ assignment tables initialized");
    Ok(())
}

/// Repositories and first-access resources
///
/// Constraints:
/// - `(assignment_id, target)` is unique in `submission_links`
/// - `(principal, context)` is unique in `access_keys`
///
/// These two indexes are what make concurrent first access converge on a
/// single link and a single key.
async fn init_repository_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing repository tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS repositories SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_repository_id ON TABLE repositories COLUMNS repository_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_repository_owner ON TABLE repositories COLUMNS owner;

        DEFINE TABLE IF NOT EXISTS submission_links SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_submission_link ON TABLE submission_links COLUMNS assignment_id, target UNIQUE;

        DEFINE TABLE IF NOT EXISTS access_keys SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_access_key ON TABLE access_keys COLUMNS principal, context UNIQUE;
    "#;

    apply(db, sql).await?;
    info!("✓ repository tables initialized");
    Ok(())
}

/// Job snapshots and evaluation runs
async fn init_run_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing run tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS jobs SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_job_id ON TABLE jobs COLUMNS job_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS evaluation_runs SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_evaluation_run_id ON TABLE evaluation_runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_evaluation_run_submission ON TABLE evaluation_runs COLUMNS submission_id;
    "#;

    apply(db, sql).await?;
    info!("✓ run tables initialized");
    Ok(())
}
