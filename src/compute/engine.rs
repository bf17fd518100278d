//! Compute engine
//!
//! Orchestrates one aggregation run: count rows, plan chunks, execute them
//! with the requested strategy and merge the partial results.

use super::merge::{merge, AggregateResult};
use super::planner::plan;
use super::progress::{ChunkProgress, ProgressSink};
use super::rows::count_rows;
use super::strategy::{
    ExecutionMethod, ExecutionStrategy, InProcessPool, OutOfProcessWorkers, RunContext,
};
use crate::app::EngineConfig;
use crate::error::{EngineError, Result};
use crate::subprocess::{ProcessRunner, TokioProcessRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What to compute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub input: PathBuf,
    pub num_workers: usize,
    pub method: ExecutionMethod,
}

impl JobRequest {
    pub fn new(input: impl Into<PathBuf>, num_workers: usize, method: ExecutionMethod) -> Self {
        Self {
            input: input.into(),
            num_workers,
            method,
        }
    }
}

/// Runs a [`JobRequest`] to completion.
///
/// Implementations must stop promptly once `cancel` fires and return
/// [`EngineError::Cancelled`].
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &JobRequest,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<AggregateResult>;
}

pub struct ComputeEngine {
    config: EngineConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl ComputeEngine {
    pub fn new(config: EngineConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    /// Engine that starts real worker processes
    pub fn production(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(TokioProcessRunner))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn strategy(&self, method: ExecutionMethod) -> Result<Box<dyn ExecutionStrategy>> {
        Ok(match method {
            ExecutionMethod::InProcess => Box::new(InProcessPool::new()),
            ExecutionMethod::OutOfProcess => Box::new(
                OutOfProcessWorkers::new(
                    Arc::clone(&self.runner),
                    self.config.worker_launcher()?,
                    &self.config.artifact_dir,
                )
                .with_keep_artifacts(self.config.keep_artifacts)
                .with_worker_timeout(self.config.worker_timeout),
            ),
        })
    }

    /// Run one aggregation end to end.
    ///
    /// Progress goes to `progress` as a non-decreasing fraction: 0 before
    /// any chunk is dispatched, `completed / total` after every chunk, and 1
    /// once the merged result is ready. If `cancel` fires, completed chunks
    /// are discarded and the run fails with `Cancelled`.
    pub async fn process(
        &self,
        request: &JobRequest,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<AggregateResult> {
        if request.num_workers == 0 {
            return Err(EngineError::InvalidWorkerCount(request.num_workers));
        }

        let started = Instant::now();
        let strategy = self.strategy(request.method)?;

        let input = request.input.clone();
        let total_rows = tokio::task::spawn_blocking(move || count_rows(&input))
            .await
            .map_err(|e| EngineError::Worker(format!("row count task failed: {e}")))??;

        let chunks = plan(total_rows, request.num_workers);
        info!(
            "Processing {} rows from {} in {} chunks ({})",
            total_rows,
            request.input.display(),
            chunks.len(),
            request.method
        );
        for chunk in &chunks {
            debug!(
                "Chunk {}: rows {}..{}",
                chunk.chunk_id,
                chunk.start_row,
                chunk.end_row()
            );
        }

        let tracker = Arc::new(ChunkProgress::new(progress, chunks.len()));
        tracker.report(0.0);

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let ctx = RunContext {
            input: request.input.clone(),
            num_workers: request.num_workers,
            energy_threshold: self.config.energy_threshold,
            cancel: cancel.clone(),
            progress: Arc::clone(&tracker),
        };
        let partials = strategy.run(&ctx, &chunks).await?;

        if cancel.is_cancelled() {
            debug!("Discarding {} completed chunks after cancellation", partials.len());
            return Err(EngineError::Cancelled);
        }

        let mut result = merge(partials, request.method, request.num_workers)?;
        result.elapsed_secs = started.elapsed().as_secs_f64();
        tracker.report(1.0);

        info!(
            "Aggregated {} events in {:.2}s ({} high-energy)",
            result.total, result.elapsed_secs, result.high_energy_count
        );
        Ok(result)
    }
}

#[async_trait]
impl JobExecutor for ComputeEngine {
    async fn execute(
        &self,
        request: &JobRequest,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<AggregateResult> {
        self.process(request, progress, cancel).await
    }
}
