//! One worker process per chunk
//!
//! Each worker is an invocation of the `worker` subcommand. Workers write
//! their partial result to a per-run artifact directory and the coordinator
//! reads every artifact back once all workers have exited. A run with any
//! missing artifact fails as a whole.

use super::{ExecutionMethod, ExecutionStrategy, RunContext};
use crate::compute::aggregator::PartialResult;
use crate::compute::planner::ChunkDescriptor;
use crate::compute::worker::{artifact_path, read_artifact, WorkerRequest};
use crate::error::{EngineError, Result};
use crate::subprocess::{
    ExitStatus, ProcessCommand, ProcessCommandBuilder, ProcessOutput, ProcessRunner,
};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How to start a worker process
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerLauncher {
    /// Launch `program worker ...`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::with_args(program, vec!["worker".to_string()])
    }

    /// Launch `program` with custom leading arguments before the worker flags
    pub fn with_args(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-invoke the running executable as a worker
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, request: &WorkerRequest, timeout: Option<Duration>) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.program.to_string_lossy())
            .args(&self.args)
            .args(request.to_args())
            .maybe_timeout(timeout)
            .build()
    }
}

/// Runs chunks as separate worker processes, at most `num_workers` at a time
pub struct OutOfProcessWorkers {
    runner: Arc<dyn ProcessRunner>,
    launcher: WorkerLauncher,
    artifact_root: PathBuf,
    keep_artifacts: bool,
    worker_timeout: Option<Duration>,
}

impl OutOfProcessWorkers {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        launcher: WorkerLauncher,
        artifact_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            launcher,
            artifact_root: artifact_root.into(),
            keep_artifacts: false,
            worker_timeout: None,
        }
    }

    /// Leave the run directory in place after the run
    pub fn with_keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Start every worker and wait for all of them.
    ///
    /// Returns the failure descriptions of workers that did not exit
    /// cleanly. Cancellation drops the in-flight futures, which kills the
    /// child processes.
    async fn launch_all(
        &self,
        run_dir: &Path,
        ctx: &RunContext,
        chunks: &[ChunkDescriptor],
    ) -> Result<Vec<String>> {
        let semaphore = Semaphore::new(ctx.num_workers.max(1));
        let semaphore = &semaphore;

        let mut pending: FuturesUnordered<_> = chunks
            .iter()
            .map(|chunk| {
                let output = artifact_path(run_dir, chunk.chunk_id);
                let request =
                    WorkerRequest::new(&ctx.input, chunk, &output, ctx.energy_threshold);
                let command = self.launcher.command(&request, self.worker_timeout);
                let chunk_id = chunk.chunk_id;
                async move {
                    let outcome = self.launch_one(semaphore, ctx, chunk_id, command).await;
                    (chunk_id, outcome)
                }
            })
            .collect();

        let mut failures = Vec::new();
        let cancelled = loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break true,
                next = pending.next() => {
                    let Some((chunk_id, outcome)) = next else {
                        break false;
                    };
                    match outcome {
                        Ok(output) if output.status.success() => {
                            debug!(
                                "Worker {} finished in {:.2}s",
                                chunk_id,
                                output.duration.as_secs_f64()
                            );
                            ctx.progress.chunk_completed();
                        }
                        Ok(output) => {
                            let failure = describe_exit(chunk_id, &output);
                            warn!("{}", failure);
                            failures.push(failure);
                        }
                        // Picked up by the cancellation branch
                        Err(EngineError::Cancelled) => {}
                        Err(e) => {
                            warn!("Worker {} could not run: {}", chunk_id, e);
                            failures.push(format!("worker {chunk_id}: {e}"));
                        }
                    }
                }
            }
        };

        if cancelled {
            warn!(
                "Cancellation requested, stopping {} outstanding workers",
                pending.len()
            );
            drop(pending);
            return Err(EngineError::Cancelled);
        }

        Ok(failures)
    }

    async fn launch_one(
        &self,
        semaphore: &Semaphore,
        ctx: &RunContext,
        chunk_id: usize,
        command: ProcessCommand,
    ) -> Result<ProcessOutput> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| EngineError::Worker(format!("worker slots closed: {e}")))?;

        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        debug!("Starting worker {}", chunk_id);
        Ok(self.runner.run(command).await?)
    }

}

/// Artifact directory of one run.
///
/// Removed when dropped unless artifacts are kept, so a run abandoned
/// mid-flight (timeout, cancellation, dropped future) cleans up too.
#[derive(Debug)]
struct RunDir {
    path: PathBuf,
    keep: bool,
}

impl RunDir {
    async fn create(root: &Path, keep: bool) -> Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path, keep })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunDir {
    fn drop(&mut self) {
        if self.keep {
            info!("Keeping worker artifacts in {}", self.path.display());
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed artifact directory {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove artifact directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn describe_exit(chunk_id: usize, output: &ProcessOutput) -> String {
    let summary = match &output.status {
        ExitStatus::Timeout => {
            format!("worker {chunk_id} timed out after {:?}", output.duration)
        }
        status => format!("worker {chunk_id} exited with {status}"),
    };
    match output.stderr_tail() {
        Some(tail) => format!("{summary}: {tail}"),
        None => summary,
    }
}

/// Read one artifact per chunk from `run_dir`.
///
/// Any chunk whose artifact is missing, unreadable, or does not describe
/// that chunk makes the whole set incomplete. `failures` carries what is
/// already known about failed workers and ends up in the error.
pub fn collect_artifacts(
    run_dir: &Path,
    chunks: &[ChunkDescriptor],
    mut failures: Vec<String>,
) -> Result<Vec<PartialResult>> {
    let mut partials = Vec::with_capacity(chunks.len());
    let mut missing = Vec::new();

    for chunk in chunks {
        let path = artifact_path(run_dir, chunk.chunk_id);
        match read_artifact(&path) {
            Ok(artifact)
                if artifact.worker_id == chunk.chunk_id
                    && artifact.partial.chunk_id == chunk.chunk_id
                    && artifact.partial.total == chunk.row_count =>
            {
                partials.push(artifact.partial);
            }
            Ok(artifact) => {
                missing.push(chunk.chunk_id);
                failures.push(format!(
                    "artifact {} describes chunk {} with {} rows, expected chunk {} with {} rows",
                    path.display(),
                    artifact.partial.chunk_id,
                    artifact.partial.total,
                    chunk.chunk_id,
                    chunk.row_count
                ));
            }
            Err(EngineError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                missing.push(chunk.chunk_id);
            }
            Err(e) => {
                missing.push(chunk.chunk_id);
                failures.push(format!("unreadable artifact {}: {e}", path.display()));
            }
        }
    }

    if !missing.is_empty() {
        return Err(EngineError::IncompleteWorkerSet {
            expected: chunks.len(),
            missing,
            failures,
        });
    }
    Ok(partials)
}

#[async_trait]
impl ExecutionStrategy for OutOfProcessWorkers {
    fn method(&self) -> ExecutionMethod {
        ExecutionMethod::OutOfProcess
    }

    async fn run(
        &self,
        ctx: &RunContext,
        chunks: &[ChunkDescriptor],
    ) -> Result<Vec<PartialResult>> {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let run_dir = RunDir::create(&self.artifact_root, self.keep_artifacts).await?;
        info!(
            "Launching {} workers ({} at a time), artifacts in {}",
            chunks.len(),
            ctx.num_workers,
            run_dir.path().display()
        );

        let failures = self.launch_all(run_dir.path(), ctx, chunks).await?;
        collect_artifacts(run_dir.path(), chunks, failures)
    }
}
