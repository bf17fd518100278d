//! Job registry
//!
//! Every mutation takes the registry lock once, validates against the
//! [`JobStateMachine`] and applies the change, so readers always see a
//! consistent record. Callers only ever receive clones.

use super::{Job, JobStateMachine, JobStats, JobStatus};
use crate::compute::{AggregateResult, JobRequest};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

struct Entry {
    /// Insertion order, used for newest-first listing
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, Entry>,
    next_seq: u64,
}

#[derive(Default)]
pub struct JobStore {
    registry: Mutex<Registry>,
    machine: JobStateMachine,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new `Pending` job
    pub fn create(&self, request: &JobRequest) -> Job {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            input: request.input.clone(),
            num_workers: request.num_workers,
            method: request.method,
            status: JobStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: None,
            error: None,
        };

        let mut registry = self.lock();
        let seq = registry.next_seq;
        registry.next_seq += 1;
        registry.jobs.insert(
            job.id.clone(),
            Entry {
                seq,
                job: job.clone(),
            },
        );

        debug!("Created job {} for {}", job.id, job.input.display());
        job
    }

    pub fn get(&self, job_id: &str) -> Result<Job> {
        self.lock()
            .jobs
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))
    }

    /// Apply a validated transition and run `update` on the record
    fn transition<F>(&self, job_id: &str, to: JobStatus, update: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut registry = self.lock();
        let job = &mut registry
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?
            .job;

        self.machine.validate(job.status, to)?;

        let now = Utc::now();
        if to == JobStatus::Running {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }
        job.status = to;
        update(job);

        debug!("Job {} is now {}", job_id, to);
        Ok(job.clone())
    }

    /// Move a job to `Running` or `Cancelled`.
    ///
    /// `Completed` and `Failed` carry an outcome and are only reachable
    /// through [`complete`](Self::complete) and [`fail`](Self::fail).
    pub fn set_status(&self, job_id: &str, status: JobStatus) -> Result<Job> {
        if matches!(status, JobStatus::Completed | JobStatus::Failed) {
            let from = self.get(job_id)?.status;
            return Err(EngineError::InvalidTransition { from, to: status });
        }
        self.transition(job_id, status, |_| {})
    }

    /// Record progress, clamped to `[0, 1]`.
    ///
    /// Reports for terminal jobs are dropped.
    pub fn set_progress(&self, job_id: &str, progress: f64) -> Result<()> {
        let mut registry = self.lock();
        let job = &mut registry
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?
            .job;

        if job.status.is_terminal() {
            debug!("Dropping progress report for {} job {}", job.status, job_id);
            return Ok(());
        }
        if progress.is_nan() {
            return Ok(());
        }
        job.progress = progress.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn complete(&self, job_id: &str, results: AggregateResult) -> Result<Job> {
        self.transition(job_id, JobStatus::Completed, |job| {
            job.progress = 1.0;
            job.results = Some(results);
        })
    }

    pub fn fail(&self, job_id: &str, error: impl Into<String>) -> Result<Job> {
        let error = error.into();
        self.transition(job_id, JobStatus::Failed, |job| {
            job.error = Some(error);
        })
    }

    /// Jobs newest first, optionally filtered by status and truncated
    pub fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<Job> {
        let registry = self.lock();
        let mut entries: Vec<&Entry> = registry
            .jobs
            .values()
            .filter(|entry| status.is_none_or(|s| entry.job.status == s))
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));

        entries
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|entry| entry.job.clone())
            .collect()
    }

    /// Remove terminal jobs that finished before `cutoff`
    pub fn sweep_completed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut registry = self.lock();
        let before = registry.jobs.len();
        registry.jobs.retain(|_, entry| {
            let job = &entry.job;
            !(job.status.is_terminal() && job.completed_at.unwrap_or(job.created_at) < cutoff)
        });
        let removed = before - registry.jobs.len();

        if removed > 0 {
            info!("Removed {} expired jobs", removed);
        }
        removed
    }

    /// Remove terminal jobs that finished more than `age` ago
    pub fn sweep_older_than(&self, age: Duration) -> usize {
        match chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        {
            Some(cutoff) => self.sweep_completed_before(cutoff),
            None => 0,
        }
    }

    pub fn stats(&self) -> JobStats {
        let registry = self.lock();
        let mut stats = JobStats::default();
        for entry in registry.jobs.values() {
            stats.record(entry.job.status);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
