use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::jobs::JobStatus;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Input file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Malformed record at data row {row}: {reason}")]
    MalformedRecord { row: u64, reason: String },

    #[error("Unknown method: {0} (expected 'in_process' or 'out_of_process')")]
    UnknownMethod(String),

    #[error("Invalid worker count {0}: at least one worker is required")]
    InvalidWorkerCount(usize),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Job {job_id} is still {status}")]
    JobNotReady { job_id: String, status: JobStatus },

    #[error("{} of {expected} workers produced no result (chunks {missing:?}){}", .missing.len(), format_failures(.failures))]
    IncompleteWorkerSet {
        expected: usize,
        missing: Vec<usize>,
        failures: Vec<String>,
    },

    #[error("No partial results to merge")]
    EmptyResultSet,

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job timed out after {}", format_timeout(.0))]
    Timeout(Duration),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Process error: {0}")]
    Process(#[from] crate::subprocess::ProcessError),
}

fn format_failures(failures: &[String]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(": {}", failures.join("; "))
    }
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

impl EngineError {
    /// Whether the error was caused by caller input rather than by processing.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownMethod(_)
                | EngineError::InvalidWorkerCount(_)
                | EngineError::InvalidTransition { .. }
                | EngineError::JobNotFound(_)
                | EngineError::JobNotReady { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
