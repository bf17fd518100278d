use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use eventmill::app::{self, AppConfig, EngineConfig};
use eventmill::compute::{run_worker, WorkerRequest};
use eventmill::EngineError;
use eventmill::jobs::{Job, JobService, JobStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Aggregate sensor event datasets in parallel
#[derive(Parser)]
#[command(name = "eventmill", version)]
#[command(about = "Chunked, parallel aggregation of sensor event datasets", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv adds threads and lines)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the engine configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate an events CSV file and print the result as JSON
    Process {
        /// Input CSV file
        input: PathBuf,

        /// Number of workers (default from configuration)
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Execution method: in_process or out_of_process
        #[arg(short = 'm', long)]
        method: Option<String>,

        /// Give up after this long (e.g. "30s", "5m")
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Write the result to this file instead of stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Process a single chunk (started by the out_of_process method)
    #[command(hide = true)]
    Worker(WorkerRequest),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = AppConfig::new(cli.verbose).with_config_path(cli.config.clone());
    app::init_logging(&config);

    let result = match cli.command {
        Commands::Process {
            input,
            workers,
            method,
            timeout,
            output,
        } => run_process(&config, input, workers, method, timeout, output).await,
        Commands::Worker(request) => run_worker_command(request).await,
    };

    if let Err(e) = result {
        app::handle_fatal_error(e, cli.verbose);
    }
}

async fn run_worker_command(request: WorkerRequest) -> anyhow::Result<()> {
    let worker_id = request.worker_id;
    tokio::task::spawn_blocking(move || run_worker(&request))
        .await
        .context("Worker task panicked")?
        .with_context(|| format!("Worker {worker_id} failed"))?;
    Ok(())
}

async fn run_process(
    config: &AppConfig,
    input: PathBuf,
    workers: Option<usize>,
    method: Option<String>,
    timeout: Option<Duration>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut engine_config =
        EngineConfig::load(config.config_path.as_deref()).context("Failed to load configuration")?;
    if timeout.is_some() {
        engine_config.job_timeout = timeout;
    }

    let workers = workers.unwrap_or(engine_config.default_workers);
    let method = method.unwrap_or_else(|| engine_config.default_method.to_string());
    debug!("Engine configuration: {:?}", engine_config);

    // A missing input is the caller's mistake, not a job failure
    if !input.exists() {
        return Err(EngineError::SourceNotFound(input).into());
    }

    let service = JobService::from_config(engine_config);
    let job_id = service
        .submit(&input, workers, &method)
        .with_context(|| format!("Failed to submit {}", input.display()))?;
    info!("Job {} submitted", job_id);

    let job = follow_job(&service, &job_id).await?;

    match job.status {
        JobStatus::Completed => {
            let results = job
                .results
                .ok_or_else(|| anyhow!("Job {} completed without results", job_id))?;
            let json = serde_json::to_string_pretty(&results)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json + "\n")
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Results written to {}", path.display());
                }
                None => println!("{json}"),
            }
            Ok(())
        }
        JobStatus::Failed => bail!(
            "Job {} failed: {}",
            job_id,
            job.error.unwrap_or_else(|| "unknown error".to_string())
        ),
        status => bail!("Job {} ended {}", job_id, status),
    }
}

/// Poll the job until it is terminal, mirroring its progress on a bar.
///
/// Ctrl-C cancels the job instead of killing the process, then waits for
/// the job to stop its workers and remove its artifacts.
async fn follow_job(service: &JobService, job_id: &str) -> anyhow::Result<Job> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}% {msg}")?
            .progress_chars("##-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let job = loop {
        let job = service.status(job_id)?;
        bar.set_position((job.progress * 100.0).round() as u64);
        bar.set_message(job.status.to_string());
        if job.status.is_terminal() {
            break job;
        }

        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("Interrupted, cancelling job {}", job_id);
                if let Err(e) = service.cancel(job_id) {
                    debug!("Cancel of job {} had no effect: {}", job_id, e);
                }
                bar.set_message("stopping");
                let job = service.wait_settled(job_id, POLL_INTERVAL).await?;
                break job;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    };

    bar.finish_and_clear();
    Ok(job)
}
