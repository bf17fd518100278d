//! Thread pool execution inside the current process

use super::{ExecutionMethod, ExecutionStrategy, RunContext};
use crate::compute::aggregator::{aggregate_chunk, PartialResult};
use crate::compute::planner::ChunkDescriptor;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Runs chunks on a fixed-size rayon pool of `num_workers` threads.
///
/// Each chunk gets its own aggregator, so threads share no mutable state.
/// The pool runs on a blocking thread to keep the async runtime free. The
/// first failing chunk cancels the remaining ones and fails the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessPool;

impl InProcessPool {
    pub fn new() -> Self {
        Self
    }

    fn run_blocking(ctx: RunContext, chunks: Vec<ChunkDescriptor>) -> Result<Vec<PartialResult>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ctx.num_workers.max(1))
            .thread_name(|index| format!("eventmill-chunk-{index}"))
            .build()
            .map_err(|e| EngineError::Worker(format!("failed to build thread pool: {e}")))?;

        // Sibling chunks stop early once any chunk fails.
        let run_cancel = ctx.cancel.child_token();

        let outcomes: Vec<Result<PartialResult>> = pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| {
                    if run_cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }

                    let outcome =
                        aggregate_chunk(&ctx.input, chunk, ctx.energy_threshold, &run_cancel);
                    match &outcome {
                        Ok(partial) => {
                            debug!("Chunk {} finished: {} rows", chunk.chunk_id, partial.total);
                            ctx.progress.chunk_completed();
                        }
                        Err(EngineError::Cancelled) => {}
                        Err(e) => {
                            warn!("Chunk {} failed: {}", chunk.chunk_id, e);
                            run_cancel.cancel();
                        }
                    }
                    outcome
                })
                .collect()
        });

        select_outcome(outcomes)
    }
}

/// Keep every partial if all chunks succeeded, else the most telling error.
///
/// A real failure wins over the `Cancelled` it caused in sibling chunks.
fn select_outcome(outcomes: Vec<Result<PartialResult>>) -> Result<Vec<PartialResult>> {
    let mut partials = Vec::with_capacity(outcomes.len());
    let mut cancelled = false;

    for outcome in outcomes {
        match outcome {
            Ok(partial) => partials.push(partial),
            Err(EngineError::Cancelled) => cancelled = true,
            Err(e) => return Err(e),
        }
    }

    if cancelled {
        return Err(EngineError::Cancelled);
    }
    Ok(partials)
}

#[async_trait]
impl ExecutionStrategy for InProcessPool {
    fn method(&self) -> ExecutionMethod {
        ExecutionMethod::InProcess
    }

    async fn run(
        &self,
        ctx: &RunContext,
        chunks: &[ChunkDescriptor],
    ) -> Result<Vec<PartialResult>> {
        info!(
            "Running {} chunks on an in-process pool of {} threads",
            chunks.len(),
            ctx.num_workers
        );

        let ctx = ctx.clone();
        let chunks = chunks.to_vec();

        tokio::task::spawn_blocking(move || Self::run_blocking(ctx, chunks))
            .await
            .map_err(|e| EngineError::Worker(format!("in-process pool task failed: {e}")))?
    }
}
