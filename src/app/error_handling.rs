//! Error handling utilities

use crate::error::EngineError;
use tracing::error;

/// Exit code for failures caused by the request itself
pub const ARGUMENT_ERROR: i32 = 2;
/// Exit code for every other failure
pub const GENERAL_ERROR: i32 = 1;

/// Map an error to the process exit code
pub fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<EngineError>() {
        Some(engine_err) if engine_err.is_caller_error() => ARGUMENT_ERROR,
        Some(EngineError::SourceNotFound(_)) | Some(EngineError::Config(_)) => ARGUMENT_ERROR,
        _ => GENERAL_ERROR,
    }
}

/// Handle fatal errors and exit with appropriate status code
///
/// In verbose mode the full context chain is printed as well.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {:#}", error);

    eprintln!("Error: {error:#}");
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code(&error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        let caller = anyhow::Error::new(EngineError::UnknownMethod("mpi".to_string()));
        assert_eq!(exit_code(&caller), ARGUMENT_ERROR);

        let missing = anyhow::Error::new(EngineError::SourceNotFound(PathBuf::from("x.csv")))
            .context("Failed to process x.csv");
        assert_eq!(exit_code(&missing), ARGUMENT_ERROR);

        let failed = anyhow::Error::new(EngineError::EmptyResultSet);
        assert_eq!(exit_code(&failed), GENERAL_ERROR);

        assert_eq!(exit_code(&anyhow::anyhow!("boom")), GENERAL_ERROR);
    }
}
