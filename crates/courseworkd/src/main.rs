//! Coursework command line
//!
//! Owns the store handle, the job queue and its workers, and hands them to
//! the core components explicitly.
//!
//! ## Commands
//!
//! - `assignments`: list root assignments
//! - `context`: build and print the context of a root assignment
//! - `evaluate`: evaluate a submission with in-process workers
//! - `seed`: import a JSON fixture into the configured store

mod fixture;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use coursework_core::config::{CourseworkConfig, StoreBackend, StoreConfig};
use coursework_core::jobs::{CancelReason, CommandExecutor, Job, JobQueue, PositionSink, Worker};
use coursework_core::metrics::METRICS;
use coursework_core::telemetry::{init_tracing, parse_level};
use coursework_core::{ContextBuilder, CoreError, JobResultEvaluator, RunCoordinator};
use coursework_state::{MemoryStore, Principal, Store, SubmissionId, SurrealConfig, SurrealStore};
use tokio::sync::watch;
use tracing::{info, warn, Level};

use crate::fixture::Fixture;

#[derive(Parser)]
#[command(name = "courseworkd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Assignment contexts and evaluation jobs", long_about = None)]
struct Cli {
    /// Configuration file (default: config/coursework.toml if present)
    #[arg(short, long, global = true, env = "COURSEWORK_CONFIG")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List root assignments, earliest start first
    Assignments,

    /// Build the context of a root assignment and print it as JSON
    Context {
        /// Root assignment key
        key: String,

        /// Acting principal (anonymous if omitted)
        #[arg(short, long)]
        principal: Option<String>,
    },

    /// Evaluate a submission and print the evaluation run
    Evaluate {
        /// Submission id
        submission: String,
    },

    /// Import records from a JSON fixture
    Seed {
        /// Fixture file
        file: PathBuf,
    },
}

/// Prints queue position to stderr while a job waits.
struct StderrSink;

impl PositionSink for StderrSink {
    fn report(&self, job: &Job, rank: usize, total: usize) {
        eprintln!("Still waiting for job {} (position {rank}/{total})...", job.id());
    }
}

#[tokio::main]
async fn main() {
    let code = match run(Cli::parse()).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_code(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CoreError>())
        .map(CoreError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    let config =
        CourseworkConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        parse_level(&config.logging.level)
    };
    init_tracing(cli.json || config.logging.json, level);

    if cli.show_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let store = open_store(&config.store).await?;
    let result = match command {
        Commands::Assignments => cmd_assignments(&store).await,
        Commands::Context { key, principal } => {
            cmd_context(&store, &config, &key, principal.map(Principal::new)).await
        }
        Commands::Evaluate { submission } => {
            cmd_evaluate(&store, &config, SubmissionId(submission)).await
        }
        Commands::Seed { file } => cmd_seed(&store, &file).await,
    };
    METRICS.flush();
    result
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("using the in-memory store; nothing will be persisted");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Surreal => {
            let store = SurrealStore::connect(&SurrealConfig {
                url: config.url.clone(),
                namespace: config.namespace.clone(),
                database: config.database.clone(),
            })
            .await
            .with_context(|| format!("Failed to connect to {}", config.url))?;
            Ok(Arc::new(store))
        }
    }
}

async fn cmd_assignments(store: &Arc<dyn Store>) -> Result<()> {
    let roots = store.list_root_assignments().await.map_err(CoreError::from)?;
    if roots.is_empty() {
        println!("No assignments.");
    }
    for root in roots {
        let start = root
            .start
            .map(|s| s.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<20} {:<17} {}", root.key, start, root.title);
    }
    Ok(())
}

async fn cmd_context(
    store: &Arc<dyn Store>,
    config: &CourseworkConfig,
    key: &str,
    principal: Option<Principal>,
) -> Result<()> {
    let builder = ContextBuilder::standard(Arc::clone(store), &config.loaders)
        .context("Invalid loader configuration")?;
    let context = builder.build_for_key(key, principal).await?;
    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}

async fn cmd_evaluate(
    store: &Arc<dyn Store>,
    config: &CourseworkConfig,
    submission: SubmissionId,
) -> Result<()> {
    let queue = JobQueue::new(config.queue.queue_config());
    let (stop, shutdown) = watch::channel(false);
    let mut workers = Worker::spawn_pool(
        config.queue.workers,
        &queue,
        Arc::new(CommandExecutor),
        shutdown,
    );
    let coordinator =
        RunCoordinator::new(Arc::clone(store), queue.clone(), Arc::new(JobResultEvaluator));

    let job = coordinator.enqueue_evaluation(&submission).await?;
    info!(job_id = %job.id(), "evaluation queued");

    let interrupt = {
        let job = job.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, cancelling job {}", job.id());
                job.cancel_with(CancelReason::Interrupted);
            }
        })
    };

    let outcome = coordinator.run(&submission, &job, &StderrSink).await;
    interrupt.abort();

    let _ = stop.send(true);
    while workers.join_next().await.is_some() {}

    let run = outcome?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

async fn cmd_seed(store: &Arc<dyn Store>, file: &Path) -> Result<()> {
    let fixture = Fixture::from_file(file)?;
    let count = fixture.apply(store.as_ref()).await?;
    println!("Imported {count} records from {}", file.display());
    Ok(())
}
