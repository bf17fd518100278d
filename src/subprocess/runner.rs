use async_trait::async_trait;
use std::time::Duration;

use super::error::ProcessError;

/// Environment variables forwarded to child processes besides PATH
const INHERITED_VARS: &[&str] = &[
    "HOME",
    "USER",
    "TMPDIR",
    "LANG",
    "LC_ALL",
    "RUST_LOG",
    "RUST_BACKTRACE",
];

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Kill the child once this elapses and report [`ExitStatus::Timeout`]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Last non-empty stderr line, used when summarising a failed worker.
    pub fn stderr_tail(&self) -> Option<&str> {
        self.stderr.lines().rev().find(|line| !line.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Timeout,
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exit code 0"),
            ExitStatus::Error(code) => write!(f, "exit code {code}"),
            ExitStatus::Timeout => write!(f, "timeout"),
            ExitStatus::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// Dropping the returned future kills the child process.
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Log command execution details
    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!(
            "Executing subprocess: {} {}",
            command.program,
            command.args.join(" ")
        );

        if let Some(timeout) = command.timeout {
            tracing::trace!("Timeout: {:?}", timeout);
        }
    }

    /// Configure the command with a minimal environment
    fn configure_command(
        command: &ProcessCommand,
    ) -> Result<tokio::process::Command, ProcessError> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);

        cmd.env_clear();
        Self::preserve_essential_env(&mut cmd, &command.program)?;

        // Cancelling a run drops the future; the child must not outlive it.
        cmd.kill_on_drop(true);

        Self::configure_stdio(&mut cmd);
        Ok(cmd)
    }

    /// Forward PATH (required) and a small set of optional variables
    fn preserve_essential_env(
        cmd: &mut tokio::process::Command,
        program: &str,
    ) -> Result<(), ProcessError> {
        match std::env::var("PATH") {
            Ok(path) => {
                cmd.env("PATH", path);
            }
            Err(e) => {
                tracing::error!(
                    "Required environment variable PATH is not available for command '{}': {:?}",
                    program,
                    e
                );
                return Err(ProcessError::InternalError {
                    message: format!(
                        "PATH is not available (required for '{}' command): {:?}",
                        program, e
                    ),
                });
            }
        }

        let mut missing = Vec::new();
        for var in INHERITED_VARS {
            match std::env::var(var) {
                Ok(value) => {
                    cmd.env(var, value);
                }
                Err(_) => missing.push(*var),
            }
        }

        if !missing.is_empty() {
            tracing::trace!(
                "Optional env vars not available for '{}': {}",
                program,
                missing.join(", ")
            );
        }

        Ok(())
    }

    /// Configure stdio pipes for the process
    fn configure_stdio(cmd: &mut tokio::process::Command) {
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
    }

    /// Wait for process with optional timeout.
    ///
    /// `None` means the timeout expired; the child is killed when the
    /// abandoned wait future drops it.
    async fn wait_with_timeout(
        child: tokio::process::Child,
        timeout: Option<Duration>,
    ) -> Result<Option<std::process::Output>, ProcessError> {
        match timeout {
            Some(duration) => {
                match tokio::time::timeout(duration, child.wait_with_output()).await {
                    Ok(result) => result.map(Some).map_err(ProcessError::Io),
                    Err(_) => Ok(None),
                }
            }
            None => child.wait_with_output().await.map(Some).map_err(ProcessError::Io),
        }
    }

    /// Convert process exit status to our ExitStatus enum
    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    fn build_output(output: Option<std::process::Output>, duration: Duration) -> ProcessOutput {
        match output {
            Some(output) => ProcessOutput {
                status: Self::parse_exit_status(output.status),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration,
            },
            None => ProcessOutput {
                status: ExitStatus::Timeout,
                stdout: String::new(),
                stderr: String::new(),
                duration,
            },
        }
    }

    fn log_result(result: &ProcessOutput, command: &ProcessCommand) {
        match &result.status {
            ExitStatus::Success => {
                tracing::debug!(
                    "Subprocess completed successfully in {:?}: {}",
                    result.duration,
                    command.program
                );
            }
            ExitStatus::Error(code) => {
                tracing::debug!(
                    "Subprocess failed with exit code {} in {:?}: {}",
                    code,
                    result.duration,
                    command.program
                );
                if !result.stderr.is_empty() {
                    tracing::trace!("Stderr: {}", result.stderr);
                }
            }
            ExitStatus::Signal(signal) => {
                tracing::warn!(
                    "Subprocess terminated by signal {} in {:?}: {}",
                    signal,
                    result.duration,
                    command.program
                );
            }
            ExitStatus::Timeout => {
                tracing::warn!(
                    "Subprocess timed out after {:?}: {}",
                    result.duration,
                    command.program
                );
            }
        }
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: format!("{} {}", command.program, command.args.join(" ")),
                source: error,
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = std::time::Instant::now();

        Self::log_command_start(&command);

        let mut cmd = Self::configure_command(&command)?;
        let child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;

        let output = Self::wait_with_timeout(child, command.timeout).await?;

        let result = Self::build_output(output, start.elapsed());

        Self::log_result(&result, &command);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let status = std::process::ExitStatus::from_raw(0);
        assert_eq!(
            TokioProcessRunner::parse_exit_status(status),
            ExitStatus::Success
        );

        // Exit code 1
        let status = std::process::ExitStatus::from_raw(256);
        assert_eq!(
            TokioProcessRunner::parse_exit_status(status),
            ExitStatus::Error(1)
        );

        // Killed by SIGKILL
        let status = std::process::ExitStatus::from_raw(9);
        assert_eq!(
            TokioProcessRunner::parse_exit_status(status),
            ExitStatus::Signal(9)
        );
    }

    #[test]
    fn test_stderr_tail_skips_blank_lines() {
        let output = ProcessOutput {
            status: ExitStatus::Error(1),
            stdout: String::new(),
            stderr: "starting\nError: bad row\n\n".to_string(),
            duration: Duration::from_millis(1),
        };
        assert_eq!(output.stderr_tail(), Some("Error: bad row"));
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::Error(2).to_string(), "exit code 2");
        assert_eq!(ExitStatus::Signal(15).to_string(), "signal 15");
        assert_eq!(ExitStatus::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_expired_wait_reports_timeout() {
        let output = TokioProcessRunner::build_output(None, Duration::from_millis(100));
        assert_eq!(output.status, ExitStatus::Timeout);
        assert!(!output.status.success());
        assert_eq!(output.stderr_tail(), None);
    }
}
