//! Subprocess abstraction
//!
//! Worker processes are started through the [`ProcessRunner`] trait so that
//! tests can replace real processes with a [`MockProcessRunner`].

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;


pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
