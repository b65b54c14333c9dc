//! CLI command definitions for taskpool.
//!
//! The `demo` command drives a pool with synthetic payloads so scheduling,
//! retries, cancellation and shutdown can be watched in the logs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    payload_fn, Payload, PoolStats, Task, TaskId, TaskResult, WorkerPool, WorkerStatus,
};

/// In-process worker pool with priority scheduling and retries.
#[derive(Parser)]
#[command(name = "taskpool")]
#[command(about = "Run tasks on a self-scaling pool of isolated workers")]
#[command(version)]
#[command(
    long_about = "taskpool runs payloads on a pool of workers with priority dispatch, retries and cancellation.\n\nPool defaults can be set with TASKPOOL_* environment variables.\n\nExample usage:\n  taskpool demo --tasks 40 --workers 2 --max-workers 6 --fail-every 7"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run synthetic tasks through a pool and print the final statistics.
    Demo(DemoArgs),
}

/// Arguments for `taskpool demo`.
#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Number of tasks to submit.
    #[arg(short = 'n', long, default_value = "20")]
    pub tasks: usize,

    /// Simulated work per attempt in milliseconds.
    #[arg(long, default_value = "100")]
    pub work_ms: u64,

    /// Number of distinct priorities; task i gets priority i % N.
    #[arg(long, default_value = "3")]
    pub priorities: u32,

    /// Every Nth task fails its first attempts (0 disables failures).
    #[arg(long, default_value = "5")]
    pub fail_every: usize,

    /// How many attempts a failing task fails before succeeding.
    #[arg(long, default_value = "1")]
    pub fail_attempts: u32,

    /// Cancel the first N submitted tasks.
    #[arg(long, default_value = "0")]
    pub cancel: usize,

    /// Retry budget per task (defaults to the pool setting).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Initial worker count.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum worker count.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Status stream interval in milliseconds.
    #[arg(long)]
    pub status_interval_ms: Option<u64>,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Demo(args) => run_demo_command(args).await?,
    }
    Ok(())
}

// ============================================================================
// Demo Command Implementation
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct DemoOutput {
    status: String,
    tasks: usize,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
    stats: PoolStats,
}

/// Builds the pool configuration from the environment plus CLI overrides.
fn demo_config(args: &DemoArgs) -> anyhow::Result<PoolConfig> {
    let mut config = PoolConfig::from_env()?;

    if let Some(workers) = args.workers {
        config = config.with_initial_workers(workers);
    }
    if let Some(max_workers) = args.max_workers {
        config = config.with_max_workers(max_workers);
    }
    if let Some(retries) = args.max_retries {
        config = config.with_default_max_retries(retries);
    }
    if let Some(millis) = args.status_interval_ms {
        config = config.with_status_interval(Duration::from_millis(millis));
    }

    config.validate()?;
    Ok(config)
}

/// A payload that sleeps for `work` and fails its first `fail_attempts`
/// invocations.
fn synthetic_payload(index: usize, work: Duration, fail_attempts: u32) -> Arc<dyn Payload> {
    let invocations = Arc::new(AtomicU32::new(0));

    payload_fn(format!("synthetic-{}", index), move |args: Vec<Value>| {
        let invocations = Arc::clone(&invocations);
        async move {
            tokio::time::sleep(work).await;
            let attempt = invocations.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= fail_attempts {
                anyhow::bail!("synthetic failure on attempt {}", attempt);
            }
            Ok(json!({ "task": index, "attempt": attempt, "args": args }))
        }
    })
}

async fn log_status(stream: impl Stream<Item = Vec<WorkerStatus>>) {
    futures::pin_mut!(stream);
    while let Some(snapshot) = stream.next().await {
        let busy = snapshot.iter().filter(|status| !status.is_idle).count();
        info!(workers = snapshot.len(), busy, "Pool status");
    }
    debug!("Status stream ended");
}

async fn run_demo_command(args: DemoArgs) -> anyhow::Result<()> {
    if args.metrics {
        init_metrics()?;
    }

    let config = demo_config(&args)?;
    info!(
        tasks = args.tasks,
        initial_workers = config.initial_worker_count,
        max_workers = config.max_worker_count,
        "Starting demo"
    );

    let pool = WorkerPool::new(config)?;
    let monitor = tokio::spawn(log_status(pool.status_stream()));

    let work = Duration::from_millis(args.work_ms);
    let priorities = args.priorities.max(1);
    let mut submitted = Vec::with_capacity(args.tasks);

    for index in 0..args.tasks {
        let failing = args.fail_every > 0 && (index + 1) % args.fail_every == 0;
        let fail_attempts = if failing { args.fail_attempts } else { 0 };
        let priority = (index as u32 % priorities) as i32;

        let task = Task::new(
            synthetic_payload(index, work, fail_attempts),
            vec![json!(index)],
        )
        .with_priority(priority)
        .with_max_retries(pool.config().default_max_retries);

        let results = pool.results_of(&task.id);
        let task_id = pool.submit_task(task)?;
        submitted.push((task_id, results));
    }

    for (task_id, _) in submitted.iter().take(args.cancel) {
        let cancelled = pool.cancel(task_id).await;
        info!(task_id = %task_id, cancelled, "Cancel requested");
    }

    let outcomes: Vec<(TaskId, Vec<TaskResult>)> =
        futures::future::join_all(submitted.into_iter().map(|(task_id, results)| async move {
            (task_id, results.collect::<Vec<_>>().await)
        }))
        .await;

    let mut succeeded = 0;
    let mut failed = 0;
    let mut cancelled = 0;
    for (task_id, results) in &outcomes {
        match results.last() {
            Some(last) if last.is_success() => {
                succeeded += 1;
                debug!(task_id = %task_id, attempts = results.len(), "Task succeeded");
            }
            Some(last) => {
                failed += 1;
                warn!(task_id = %task_id, attempts = results.len(), error = ?last.error, "Task failed");
            }
            None => cancelled += 1,
        }
    }

    pool.shutdown();
    pool.wait_stopped().await;
    monitor.await?;

    let output = DemoOutput {
        status: "completed".to_string(),
        tasks: outcomes.len(),
        succeeded,
        failed,
        cancelled,
        stats: pool.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}
