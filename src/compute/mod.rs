//! Chunked aggregation of event datasets
//!
//! The pipeline is `count_rows` → `plan` → an [`ExecutionStrategy`] running
//! one [`EventAggregator`] per chunk → `merge`. [`ComputeEngine`] wires the
//! stages together and reports progress.

pub mod aggregator;
pub mod engine;
pub mod merge;
pub mod planner;
pub mod progress;
pub mod rows;
pub mod strategy;
pub mod worker;

pub use aggregator::{
    aggregate_chunk, EventAggregator, EventRecord, PartialResult, DEFAULT_ENERGY_THRESHOLD,
};
pub use engine::{ComputeEngine, JobExecutor, JobRequest};
pub use merge::{merge, AggregateResult};
pub use planner::{effective_chunk_count, plan, ChunkDescriptor};
pub use progress::{ChunkProgress, NoopProgress, ProgressSink};
pub use rows::count_rows;
pub use strategy::{
    ExecutionMethod, ExecutionStrategy, InProcessPool, OutOfProcessWorkers, RunContext,
    WorkerLauncher,
};
pub use worker::{run_worker, WorkerArtifact, WorkerRequest};
