//! Out-of-process worker
//!
//! A worker aggregates one chunk and writes its [`WorkerArtifact`] as JSON.
//! The artifact is written to a temporary file and renamed into place, so a
//! reader sees either a complete artifact or none at all.

use super::aggregator::{aggregate_chunk, PartialResult, DEFAULT_ENERGY_THRESHOLD};
use super::planner::ChunkDescriptor;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Arguments of one worker invocation
#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct WorkerRequest {
    /// Input CSV file
    #[arg(long)]
    pub input: PathBuf,

    /// First data row of the chunk (0-based, header excluded)
    #[arg(long)]
    pub start_row: u64,

    /// Number of data rows in the chunk
    #[arg(long)]
    pub row_count: u64,

    /// Worker (and chunk) identifier
    #[arg(long)]
    pub worker_id: usize,

    /// Where to write the JSON artifact
    #[arg(long)]
    pub output: PathBuf,

    /// Energy above which an event counts as high-energy
    #[arg(long, default_value_t = DEFAULT_ENERGY_THRESHOLD)]
    pub energy_threshold: f64,
}

impl WorkerRequest {
    pub fn new(input: &Path, chunk: &ChunkDescriptor, output: &Path, energy_threshold: f64) -> Self {
        Self {
            input: input.to_path_buf(),
            start_row: chunk.start_row,
            row_count: chunk.row_count,
            worker_id: chunk.chunk_id,
            output: output.to_path_buf(),
            energy_threshold,
        }
    }

    pub fn chunk(&self) -> ChunkDescriptor {
        ChunkDescriptor {
            chunk_id: self.worker_id,
            start_row: self.start_row,
            row_count: self.row_count,
        }
    }

    /// Command-line form understood by the `worker` subcommand
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--input".to_string(),
            self.input.display().to_string(),
            "--start-row".to_string(),
            self.start_row.to_string(),
            "--row-count".to_string(),
            self.row_count.to_string(),
            "--worker-id".to_string(),
            self.worker_id.to_string(),
            "--output".to_string(),
            self.output.display().to_string(),
            "--energy-threshold".to_string(),
            self.energy_threshold.to_string(),
        ]
    }
}

/// What a worker leaves behind for the coordinating process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerArtifact {
    #[serde(flatten)]
    pub partial: PartialResult,
    pub worker_id: usize,
    /// Seconds spent aggregating the chunk
    pub processing_time: f64,
}

/// Path of the artifact for `chunk_id` inside a run directory
pub fn artifact_path(dir: &Path, chunk_id: usize) -> PathBuf {
    dir.join(format!("chunk_{chunk_id}.json"))
}

pub fn write_artifact(path: &Path, artifact: &WorkerArtifact) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(artifact)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_artifact(path: &Path) -> Result<WorkerArtifact> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

/// Aggregate the requested chunk and write its artifact
pub fn run_worker(request: &WorkerRequest) -> Result<WorkerArtifact> {
    let chunk = request.chunk();
    info!(
        "[Worker {}] Starting: rows {}..{}",
        request.worker_id,
        chunk.start_row,
        chunk.end_row()
    );
    let started = Instant::now();

    let partial = aggregate_chunk(
        &request.input,
        &chunk,
        request.energy_threshold,
        &CancellationToken::new(),
    )?;

    let artifact = WorkerArtifact {
        partial,
        worker_id: request.worker_id,
        processing_time: started.elapsed().as_secs_f64(),
    };
    write_artifact(&request.output, &artifact)?;

    info!(
        "[Worker {}] Completed: {} events in {:.2}s, saved to {}",
        request.worker_id,
        artifact.partial.total,
        artifact.processing_time,
        request.output.display()
    );
    Ok(artifact)
}
