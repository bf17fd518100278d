//! Job service
//!
//! The entry point for collaborators: submit work, query it, cancel it.
//! Submission returns immediately; each job runs in its own Tokio task,
//! and at most `max_concurrent_jobs` of them execute at once.

use super::{Job, JobResult, JobStats, JobStatus, JobStore};
use crate::app::EngineConfig;
use crate::compute::{
    ComputeEngine, ExecutionMethod, JobExecutor, JobRequest, ProgressSink,
};
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Forwards engine progress into the job record
struct StoreProgress {
    store: Arc<JobStore>,
    job_id: String,
}

impl ProgressSink for StoreProgress {
    fn report(&self, fraction: f64) {
        if let Err(e) = self.store.set_progress(&self.job_id, fraction) {
            debug!("Progress for job {} not recorded: {}", self.job_id, e);
        }
    }
}

type TokenMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

pub struct JobService {
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    slots: Arc<Semaphore>,
    tokens: TokenMap,
    job_timeout: Option<Duration>,
    retention: Duration,
}

impl JobService {
    pub fn new(store: Arc<JobStore>, executor: Arc<dyn JobExecutor>, config: &EngineConfig) -> Self {
        Self {
            store,
            executor,
            slots: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            tokens: Arc::new(Mutex::new(HashMap::new())),
            job_timeout: config.job_timeout,
            retention: config.retention,
        }
    }

    /// Service backed by a production [`ComputeEngine`]
    pub fn from_config(config: EngineConfig) -> Self {
        let store = Arc::new(JobStore::new());
        let service_config = config.clone();
        let engine = Arc::new(ComputeEngine::production(config));
        Self::new(store, engine, &service_config)
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Submit a job, naming the method as text.
    ///
    /// The method is parsed here, so an unknown method creates no job.
    pub fn submit(
        &self,
        input: impl Into<PathBuf>,
        num_workers: usize,
        method: &str,
    ) -> Result<String> {
        let method: ExecutionMethod = method.parse()?;
        self.submit_request(JobRequest::new(input, num_workers, method))
    }

    /// Submit a typed request and return the new job's id.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit_request(&self, request: JobRequest) -> Result<String> {
        if request.num_workers == 0 {
            return Err(EngineError::InvalidWorkerCount(0));
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Worker(format!("no async runtime to run the job: {e}")))?;

        let job = self.store.create(&request);
        let token = CancellationToken::new();
        self.lock_tokens().insert(job.id.clone(), token.clone());

        info!(
            "Submitted job {}: {} with {} workers ({})",
            job.id,
            request.input.display(),
            request.num_workers,
            request.method
        );

        let task = JobTask {
            job_id: job.id.clone(),
            request,
            token,
            store: Arc::clone(&self.store),
            executor: Arc::clone(&self.executor),
            slots: Arc::clone(&self.slots),
            tokens: Arc::clone(&self.tokens),
            job_timeout: self.job_timeout,
        };
        handle.spawn(task.run());

        Ok(job.id)
    }

    pub fn status(&self, job_id: &str) -> Result<Job> {
        self.store.get(job_id)
    }

    /// Outcome of a finished job.
    ///
    /// Only `Completed` and `Failed` jobs have one; every other state,
    /// including `Cancelled`, is `JobNotReady`.
    pub fn result(&self, job_id: &str) -> Result<JobResult> {
        let job = self.store.get(job_id)?;
        match job.status {
            JobStatus::Completed | JobStatus::Failed => Ok(JobResult {
                job_id: job.id,
                status: job.status,
                results: job.results,
                error: job.error,
                completed_at: job.completed_at,
            }),
            status => Err(EngineError::JobNotReady {
                job_id: job.id,
                status,
            }),
        }
    }

    /// Cancel a pending or running job.
    ///
    /// The record becomes `Cancelled` before the engine is signalled, so
    /// whatever the engine still produces is discarded.
    pub fn cancel(&self, job_id: &str) -> Result<Job> {
        let job = self.store.set_status(job_id, JobStatus::Cancelled)?;
        if let Some(token) = self.lock_tokens().get(job_id) {
            token.cancel();
        }
        info!("Cancelled job {}", job_id);
        Ok(job)
    }

    pub fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<Job> {
        self.store.list(status, limit)
    }

    pub fn stats(&self) -> JobStats {
        self.store.stats()
    }

    /// Remove terminal jobs older than the retention period
    pub fn sweep_expired(&self) -> usize {
        self.store.sweep_older_than(self.retention)
    }

    /// Poll until the job reaches a terminal state
    pub async fn wait(&self, job_id: &str, poll: Duration) -> Result<Job> {
        loop {
            let job = self.store.get(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Poll until the job's task has exited.
    ///
    /// A cancelled job is terminal as soon as [`cancel`](Self::cancel)
    /// returns, while its engine may still be stopping workers and removing
    /// artifacts. Once this returns, that work is done.
    pub async fn wait_settled(&self, job_id: &str, poll: Duration) -> Result<Job> {
        loop {
            let job = self.store.get(job_id)?;
            if job.status.is_terminal() && !self.lock_tokens().contains_key(job_id) {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything one background job needs, moved into its task
struct JobTask {
    job_id: String,
    request: JobRequest,
    token: CancellationToken,
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    slots: Arc<Semaphore>,
    tokens: TokenMap,
    job_timeout: Option<Duration>,
}

impl JobTask {
    async fn run(self) {
        self.execute().await;
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }

    async fn execute(&self) {
        let _permit = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    warn!("Job {} cannot be scheduled: {}", self.job_id, e);
                    return;
                }
            },
            _ = self.token.cancelled() => {
                debug!("Job {} cancelled while queued", self.job_id);
                return;
            }
        };

        if self.token.is_cancelled() {
            return;
        }
        if let Err(e) = self.store.set_status(&self.job_id, JobStatus::Running) {
            debug!("Job {} not started: {}", self.job_id, e);
            return;
        }

        let progress: Arc<dyn ProgressSink> = Arc::new(StoreProgress {
            store: Arc::clone(&self.store),
            job_id: self.job_id.clone(),
        });
        let mut run = self
            .executor
            .execute(&self.request, progress, self.token.clone());

        let outcome = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Job {} exceeded its {:?} limit", self.job_id, limit);
                    // The engine unwinds through its cancellation path,
                    // stopping workers and removing artifacts.
                    self.token.cancel();
                    if let Err(e) = run.await {
                        debug!("Job {} stopped after timeout: {}", self.job_id, e);
                    }
                    Err(EngineError::Timeout(limit))
                }
            },
            None => run.await,
        };

        let recorded = match outcome {
            Ok(results) => self.store.complete(&self.job_id, results).map(|job| {
                info!("Job {} completed", job.id);
            }),
            Err(e) => {
                let message = e.to_string();
                self.store.fail(&self.job_id, message.clone()).map(|job| {
                    warn!("Job {} failed: {}", job.id, message);
                })
            }
        };

        // A job cancelled while running is already terminal
        if let Err(e) = recorded {
            debug!("Discarding outcome of job {}: {}", self.job_id, e);
        }
    }
}
