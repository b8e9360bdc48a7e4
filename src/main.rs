use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use heavy_worker::config::{StoreConfig, WorkerConfig};
use heavy_worker::node::WorkerNode;
use heavy_worker::shutdown::install_shutdown_handler;
use heavy_worker::store::{self, JobRecord, JobState};

#[derive(Parser, Debug)]
#[command(name = "heavy-worker")]
#[command(version)]
#[command(about = "Polling worker that claims jobs from a shared store and runs them on a bounded pool")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a worker instance
    Run(RunArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        store: StoreArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct StoreArgs {
    /// Job store URL (redis://host:port/db, or memory:// for a local store)
    #[arg(long, env = "HEAVY_WORKER_STORE_URL", default_value = "")]
    store_url: String,

    /// Key namespace inside the store
    #[arg(long, env = "HEAVY_WORKER_KEY_PREFIX", default_value = "heavy_worker")]
    key_prefix: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

impl StoreArgs {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.store_url.clone(),
            key_prefix: self.key_prefix.clone(),
        }
    }
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Job store URL (redis://host:port/db, or memory:// for a local store)
    #[arg(long, env = "HEAVY_WORKER_STORE_URL", default_value = "")]
    store_url: String,

    /// Key namespace inside the store
    #[arg(long, env = "HEAVY_WORKER_KEY_PREFIX", default_value = "heavy_worker")]
    key_prefix: String,

    /// Concurrent execution slots in this instance
    #[arg(long, env = "HEAVY_WORKER_SLOTS", default_value = "1")]
    slots: usize,

    /// Sleep after finding no work (ms)
    #[arg(long, env = "HEAVY_WORKER_IDLE_INTERVAL_MS", default_value = "5000")]
    idle_interval_ms: u64,

    /// Sleep while every slot is busy (ms)
    #[arg(long, env = "HEAVY_WORKER_BUSY_POLL_INTERVAL_MS", default_value = "250")]
    busy_poll_interval_ms: u64,

    /// Sleep after a failed cycle (ms)
    #[arg(long, env = "HEAVY_WORKER_ERROR_INTERVAL_MS", default_value = "5000")]
    error_interval_ms: u64,

    /// Largest accepted payload
    #[arg(long, env = "HEAVY_WORKER_MAX_PAYLOAD", default_value = "45")]
    max_payload: i64,

    /// Payload used for jobs that carry none
    #[arg(long, env = "HEAVY_WORKER_DEFAULT_PAYLOAD", default_value = "40")]
    default_payload: i64,

    /// Override the <hostname>-<pid> instance identity
    #[arg(long, env = "HEAVY_WORKER_INSTANCE_ID")]
    instance_id: Option<String>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Enqueue a new job
    Submit {
        /// Task input; omit to let the worker use its default
        payload: Option<i64>,
    },
    /// Show one job
    Status {
        /// The job ID (UUID)
        job_id: String,
    },
    /// List all jobs
    List,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobOutput {
    job_id: String,
    state: String,
    payload: Option<i64>,
    claimed_by: Option<String>,
    claimed_at: Option<String>,
    result: Option<u64>,
    error: Option<String>,
    duration_ms: Option<u64>,
    completed_at: Option<String>,
    created_at: String,
}

impl From<&JobRecord> for JobOutput {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.to_string(),
            state: job.state().to_string(),
            payload: job.payload,
            claimed_by: job.claimed_by.clone(),
            claimed_at: job.claimed_at.map(|t| t.to_rfc3339()),
            result: job.result,
            error: job.error.clone(),
            duration_ms: job.duration.map(|d| d.as_millis() as u64),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct JobListOutput {
    jobs: Vec<JobOutput>,
    pending: usize,
    claimed: usize,
    completed: usize,
    failed: usize,
}

// =============================================================================
// Commands
// =============================================================================

async fn run_worker(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkerConfig {
        store: StoreConfig {
            url: args.store_url,
            key_prefix: args.key_prefix,
        },
        slots: args.slots,
        idle_interval_ms: args.idle_interval_ms,
        busy_poll_interval_ms: args.busy_poll_interval_ms,
        error_interval_ms: args.error_interval_ms,
        max_payload: args.max_payload,
        default_payload: args.default_payload,
        instance_id: args.instance_id,
    };

    let node = WorkerNode::connect(config).await?;
    let shutdown = install_shutdown_handler();
    let stats = node.run(shutdown).await;

    tracing::info!(
        cycles = stats.cycles,
        claimed = stats.claimed,
        reported = stats.reported,
        failed_jobs = stats.failed_jobs,
        report_errors = stats.report_errors,
        cycle_errors = stats.cycle_errors,
        "Worker exited"
    );
    Ok(())
}

fn print_job(job: &JobRecord) {
    println!("Job ID:       {}", job.id);
    println!("State:        {}", job.state());
    println!(
        "Payload:      {}",
        job.payload
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    if let Some(ref by) = job.claimed_by {
        println!("Claimed by:   {}", by);
    }
    if let Some(at) = job.claimed_at {
        println!("Claimed at:   {}", at.to_rfc3339());
    }
    if let Some(result) = job.result {
        println!("Result:       {}", result);
    }
    if let Some(ref error) = job.error {
        println!("Error:        {}", error);
    }
    if let Some(duration) = job.duration {
        println!("Duration:     {:.3}s", duration.as_secs_f64());
    }
    if let Some(at) = job.completed_at {
        println!("Completed at: {}", at.to_rfc3339());
    }
}

async fn run_job_command(
    args: StoreArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = store::connect(&args.store_config()).await?;

    match command {
        JobCommands::Submit { payload } => {
            let job = store.enqueue(payload).await?;
            match args.output {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&JobOutput::from(&job))?)
                }
                OutputFormat::Table => println!("Job submitted: {}", job.id),
            }
        }
        JobCommands::Status { job_id } => {
            let id = Uuid::parse_str(&job_id)?;
            let job = store
                .get(id)
                .await?
                .ok_or_else(|| format!("Job not found: {}", id))?;
            match args.output {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&JobOutput::from(&job))?)
                }
                OutputFormat::Table => print_job(&job),
            }
        }
        JobCommands::List => {
            let jobs = store.list().await?;
            let count = |state: JobState| jobs.iter().filter(|j| j.state() == state).count();
            let output = JobListOutput {
                pending: count(JobState::Pending),
                claimed: count(JobState::Claimed),
                completed: count(JobState::Completed),
                failed: count(JobState::Failed),
                jobs: jobs.iter().map(JobOutput::from).collect(),
            };
            match args.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Table => {
                    println!(
                        "{:<38} {:<10} {:>8} {:<28} {:>12}",
                        "JOB ID", "STATE", "PAYLOAD", "CLAIMED BY", "RESULT"
                    );
                    for job in &jobs {
                        println!(
                            "{:<38} {:<10} {:>8} {:<28} {:>12}",
                            job.id,
                            job.state(),
                            job.payload.map(|p| p.to_string()).unwrap_or_default(),
                            job.claimed_by.as_deref().unwrap_or("-"),
                            job.result.map(|r| r.to_string()).unwrap_or_default(),
                        );
                    }
                    println!(
                        "\n{} pending, {} claimed, {} completed, {} failed",
                        output.pending, output.claimed, output.completed, output.failed
                    );
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run_worker(run_args).await?,
        Commands::Job { store, command } => run_job_command(store, command).await?,
    }

    Ok(())
}
