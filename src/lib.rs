//! # eventmill
//!
//! Chunked, parallel aggregation of sensor event datasets, tracked as
//! cancellable background jobs.
//!
//! ## Usage
//!
//! ```bash
//! eventmill process data/events.csv -w 4 -m out_of_process
//! ```
//!
//! ## Modules
//!
//! - `app` - Configuration, logging and fatal error handling
//! - `compute` - Row counting, chunk planning, aggregation, execution strategies and merging
//! - `error` - Error taxonomy shared by the library
//! - `jobs` - Job records, lifecycle state machine and the job service
//! - `subprocess` - Process runner abstraction used to launch workers
pub mod app;
pub mod compute;
pub mod error;
pub mod jobs;
pub mod subprocess;

pub use compute::{AggregateResult, ComputeEngine, ExecutionMethod, JobRequest};
pub use error::{EngineError, Result};
pub use jobs::{Job, JobService, JobStatus};
