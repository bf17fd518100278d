//! Application configuration
//!
//! [`AppConfig`] carries process-wide settings from the command line.
//! [`EngineConfig`] holds the tunables of the compute engine and the job
//! service, loaded from TOML and then overridden by `EVENTMILL_*` variables.

use crate::compute::{ExecutionMethod, WorkerLauncher};
use crate::error::{EngineError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Explicit engine configuration file, if any
    pub config_path: Option<PathBuf>,
}

impl AppConfig {
    /// Create a new application configuration
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Engine and job service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker count used when a request does not name one
    #[serde(default = "default_workers")]
    pub default_workers: usize,

    #[serde(default = "default_method")]
    pub default_method: ExecutionMethod,

    /// Energy strictly above this counts as high-energy
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f64,

    /// Root of the per-run artifact directories of out-of-process workers
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    #[serde(default)]
    pub keep_artifacts: bool,

    /// Executable started as a worker; the running executable when unset
    #[serde(default)]
    pub worker_program: Option<PathBuf>,

    /// Wall-clock limit for a single worker process
    #[serde(default, with = "humantime_serde")]
    pub worker_timeout: Option<Duration>,

    /// Wall-clock limit for a whole job
    #[serde(default, with = "humantime_serde")]
    pub job_timeout: Option<Duration>,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How long terminal jobs are kept before a sweep removes them
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,
}

fn default_workers() -> usize {
    4
}

fn default_method() -> ExecutionMethod {
    ExecutionMethod::InProcess
}

fn default_energy_threshold() -> f64 {
    crate::compute::DEFAULT_ENERGY_THRESHOLD
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("data/processed/chunks")
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_workers: default_workers(),
            default_method: default_method(),
            energy_threshold: default_energy_threshold(),
            artifact_dir: default_artifact_dir(),
            keep_artifacts: false,
            worker_program: None,
            worker_timeout: None,
            job_timeout: None,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retention: default_retention(),
        }
    }
}

/// Location of the per-user configuration file
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "eventmill", "eventmill")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load configuration for this process.
    ///
    /// An explicit path must exist. Otherwise the per-user file is used when
    /// present, else defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|path| path.exists()) {
                Some(path) => {
                    debug!("Loading configuration from {}", path.display());
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };

        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_env_from(|key| std::env::var(key).ok());
    }

    /// Apply `EVENTMILL_*` overrides read through `lookup`.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn merge_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("EVENTMILL_WORKERS") {
            match value.parse::<usize>() {
                Ok(workers) => self.default_workers = workers,
                Err(e) => warn!("Ignoring EVENTMILL_WORKERS={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("EVENTMILL_METHOD") {
            match value.parse::<ExecutionMethod>() {
                Ok(method) => self.default_method = method,
                Err(e) => warn!("Ignoring EVENTMILL_METHOD: {}", e),
            }
        }

        if let Some(value) = lookup("EVENTMILL_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup("EVENTMILL_ENERGY_THRESHOLD") {
            match value.parse::<f64>() {
                Ok(threshold) => self.energy_threshold = threshold,
                Err(e) => warn!("Ignoring EVENTMILL_ENERGY_THRESHOLD={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("EVENTMILL_JOB_TIMEOUT") {
            match humantime::parse_duration(&value) {
                Ok(timeout) => self.job_timeout = Some(timeout),
                Err(e) => warn!("Ignoring EVENTMILL_JOB_TIMEOUT={}: {}", value, e),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_workers == 0 {
            return Err(EngineError::Config(
                "default_workers must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(EngineError::Config(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if !self.energy_threshold.is_finite() {
            return Err(EngineError::Config(format!(
                "energy_threshold must be a finite number, got {}",
                self.energy_threshold
            )));
        }
        Ok(())
    }

    /// How out-of-process workers are started
    pub fn worker_launcher(&self) -> Result<WorkerLauncher> {
        match &self.worker_program {
            Some(program) => Ok(WorkerLauncher::new(program)),
            None => WorkerLauncher::current_exe(),
        }
    }
}
