//! CLI command definitions for archforge.
//!
//! Every boundary operation has a command: the HTTP server, a pipeline run,
//! enqueue, a single dispatch cycle, a long-running worker pool and status
//! lookups.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::api::{self, ApiState};
use crate::config::AppConfig;
use crate::llm::{ModelId, ProviderGateway, StoreCallLog};
use crate::metrics::init_metrics;
use crate::pipeline::LaneRunner;
use crate::scheduler::{Dispatcher, JobExecutor, JobQueue, NewJob, WorkerPool, WorkerPoolConfig};
use crate::storage::{Database, NewRun, NoteStore};

/// Architecture lane pipeline and model job queue.
#[derive(Parser)]
#[command(name = "archforge")]
#[command(about = "Fan a product vision out into architecture artifacts and run model jobs")]
#[command(version)]
#[command(
    long_about = "archforge turns a free-text vision into spec, schema, UI, test and CI/CD artifacts, one model call per lane, and runs a durable queue of ad-hoc model jobs.\n\nExample usage:\n  archforge run --vision \"Build a todo app\"\n  archforge serve --workers 2"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// SQLite database URL (overrides DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Serve the HTTP API.
    Serve(ServeArgs),

    /// Run the lane pipeline for one vision and print the result.
    Run(RunArgs),

    /// Enqueue a model job.
    Enqueue(EnqueueArgs),

    /// Run one heal / claim / execute cycle.
    Dispatch,

    /// Run a worker pool until Ctrl-C.
    Worker(WorkerArgs),

    /// Show a run, a job, or queue counts.
    Status(StatusArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind (overrides ARCHFORGE_BIND).
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Workers to run next to the server; 0 leaves dispatch to the trigger.
    #[arg(short, long, default_value = "0")]
    pub workers: usize,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Product vision.
    #[arg(short, long)]
    pub vision: String,

    /// Model applied to every lane.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Project name stored with the run.
    #[arg(short, long)]
    pub project: Option<String>,
}

#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Tool name (gemini-query, gpt-query, claude-query, multi-model-query).
    #[arg(short, long)]
    pub tool: String,

    /// Tool parameters as a JSON object.
    #[arg(short, long)]
    pub params: String,

    /// Priority in [-100, 100]; larger runs first.
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i64>,

    /// Model override.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Owner recorded on the job.
    #[arg(long, default_value = "cli")]
    pub owner: String,
}

#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of concurrent workers.
    #[arg(short = 'n', long, default_value = "4")]
    pub workers: usize,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Show this job.
    #[arg(long, conflicts_with = "run")]
    pub job: Option<Uuid>,

    /// Show this run.
    #[arg(long)]
    pub run: Option<Uuid>,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and runs the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = cli.database_url {
        config = config.with_database_url(url);
    }

    match cli.command {
        Commands::Serve(args) => run_serve_command(config, args).await,
        Commands::Run(args) => run_pipeline_command(config, args).await,
        Commands::Enqueue(args) => run_enqueue_command(config, args).await,
        Commands::Dispatch => run_dispatch_command(config).await,
        Commands::Worker(args) => run_worker_command(config, args).await,
        Commands::Status(args) => run_status_command(config, args).await,
    }
}

/// Opens the database and builds the gateway from validated config.
async fn bootstrap(config: &AppConfig, worker: &str) -> anyhow::Result<(Database, ProviderGateway)> {
    config.validate().context("Invalid configuration")?;
    init_metrics().context("Failed to register metrics")?;

    let db = Database::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open {}", config.database_url))?;
    db.run_migrations().await.context("Failed to migrate database")?;

    let gateway = ProviderGateway::from_config(config)?
        .with_call_log(Arc::new(StoreCallLog::new(NoteStore::new(&db))))
        .with_worker_name(worker);
    Ok((db, gateway))
}

fn dispatcher(config: &AppConfig, db: &Database, gateway: ProviderGateway) -> Dispatcher {
    let queue = JobQueue::new(db, config);
    Dispatcher::new(JobExecutor::new(queue, gateway, config.tools.clone()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_serve_command(mut config: AppConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    let (db, gateway) = bootstrap(&config, "archforge-api").await?;

    let mut pool = (args.workers > 0).then(|| {
        WorkerPool::new(
            WorkerPoolConfig::new(args.workers).with_poll_interval(config.poll_interval),
            dispatcher(&config, &db, gateway.clone()),
        )
    });
    if let Some(pool) = pool.as_mut() {
        pool.start()?;
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    api::serve(listener, ApiState::new(&config, &db, gateway)).await?;

    if let Some(mut pool) = pool {
        pool.shutdown().await?;
    }
    Ok(())
}

async fn run_pipeline_command(config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let (db, gateway) = bootstrap(&config, "archforge-cli").await?;
    let runner = LaneRunner::from_database(&db, gateway);

    let mut new_run = NewRun::new(args.vision);
    if let Some(model) = args.model.as_deref() {
        new_run = new_run.with_default_model(ModelId::parse(model)?);
    }
    if let Some(project) = args.project {
        new_run = new_run.with_project_name(project);
    }

    let report = runner.start_run(new_run).await?;
    info!(run_id = %report.run_id, status = %report.status, "Run finished");
    print_json(&runner.get_run(report.run_id).await?)
}

async fn run_enqueue_command(config: AppConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    let params: Value = serde_json::from_str(&args.params).context("--params must be JSON")?;
    let mut new_job = NewJob::new(args.tool, params).with_owner(args.owner);
    if let Some(priority) = args.priority {
        new_job = new_job.with_priority(priority);
    }
    if let Some(model) = args.model {
        new_job = new_job.with_model(model);
    }

    let job = JobQueue::new(&db, &config).enqueue(new_job).await?;
    print_json(&job.view())
}

async fn run_dispatch_command(config: AppConfig) -> anyhow::Result<()> {
    let (db, gateway) = bootstrap(&config, "archforge-dispatch").await?;
    let report = dispatcher(&config, &db, gateway).dispatch_once().await?;
    print_json(&report)
}

async fn run_worker_command(config: AppConfig, args: WorkerArgs) -> anyhow::Result<()> {
    let (db, gateway) = bootstrap(&config, "archforge-worker").await?;
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(args.workers).with_poll_interval(config.poll_interval),
        dispatcher(&config, &db, gateway),
    );
    pool.start()?;

    tokio::signal::ctrl_c().await?;
    pool.shutdown().await?;

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        requeued = stats.jobs_requeued,
        failed = stats.jobs_failed,
        healed = stats.jobs_healed,
        avg_ms = stats.average_job_duration.as_millis() as u64,
        "Worker pool stopped"
    );
    Ok(())
}

async fn run_status_command(config: AppConfig, args: StatusArgs) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    if let Some(run_id) = args.run {
        let runner = LaneRunner::from_database(&db, ProviderGateway::new());
        return print_json(&runner.get_run(run_id).await?);
    }

    let queue = JobQueue::new(&db, &config);
    match args.job {
        Some(job_id) => {
            let job = queue
                .get(job_id)
                .await?
                .with_context(|| format!("Job {job_id} not found"))?;
            print_json(&job.view())
        }
        None => print_json(&queue.stats().await?),
    }
}
