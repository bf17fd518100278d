//! Execution strategies
//!
//! A strategy runs one aggregator per chunk concurrently and returns the
//! partial results in no particular order. Both strategies process every
//! chunk exactly once and either return a complete set or fail the run.

pub mod in_process;
pub mod out_of_process;

pub use in_process::InProcessPool;
pub use out_of_process::{OutOfProcessWorkers, WorkerLauncher};

use super::aggregator::PartialResult;
use super::planner::ChunkDescriptor;
use super::progress::ChunkProgress;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How chunks are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMethod {
    /// Thread pool inside this process
    InProcess,
    /// One worker process per chunk, results exchanged through files
    OutOfProcess,
}

impl ExecutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMethod::InProcess => "in_process",
            ExecutionMethod::OutOfProcess => "out_of_process",
        }
    }
}

impl fmt::Display for ExecutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "in_process" | "multiprocessing" => Ok(ExecutionMethod::InProcess),
            "out_of_process" | "subprocess" => Ok(ExecutionMethod::OutOfProcess),
            _ => Err(EngineError::UnknownMethod(s.to_string())),
        }
    }
}

/// Everything a strategy needs besides the chunk list
#[derive(Clone)]
pub struct RunContext {
    pub input: PathBuf,
    pub num_workers: usize,
    pub energy_threshold: f64,
    pub cancel: CancellationToken,
    pub progress: Arc<ChunkProgress>,
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn method(&self) -> ExecutionMethod;

    async fn run(
        &self,
        ctx: &RunContext,
        chunks: &[ChunkDescriptor],
    ) -> Result<Vec<PartialResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_methods() {
        assert_eq!(
            "in_process".parse::<ExecutionMethod>().unwrap(),
            ExecutionMethod::InProcess
        );
        assert_eq!(
            "Out-Of-Process".parse::<ExecutionMethod>().unwrap(),
            ExecutionMethod::OutOfProcess
        );
        assert_eq!(
            "multiprocessing".parse::<ExecutionMethod>().unwrap(),
            ExecutionMethod::InProcess
        );
        assert_eq!(
            "subprocess".parse::<ExecutionMethod>().unwrap(),
            ExecutionMethod::OutOfProcess
        );
    }

    #[test]
    fn test_unknown_method() {
        let err = "mpi".parse::<ExecutionMethod>().unwrap_err();
        assert!(matches!(err, EngineError::UnknownMethod(ref m) if m == "mpi"));
    }

    #[test]
    fn test_method_serde_matches_display() {
        for method in [ExecutionMethod::InProcess, ExecutionMethod::OutOfProcess] {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method));
        }
    }
}
