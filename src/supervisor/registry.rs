//! In-memory job registry.
//!
//! Holds every job the supervisor knows about, keyed by [`JobId`]. All
//! mutation goes through short critical sections on a `parking_lot` lock;
//! no guard is ever held across an `.await`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use docforge_common::{Error, Job, JobId, JobStatus, Result};

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub cleaned: usize,
}

#[derive(Debug)]
pub struct JobRegistry {
    data_dir: PathBuf,
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create a job with a fresh id and its workspace directory
    /// `<data_dir>/<id>`.
    pub fn create(
        &self,
        input_path: PathBuf,
        target_format: Option<String>,
        max_retries: u32,
    ) -> Result<Job> {
        loop {
            let id = JobId::new();
            let workspace_dir = self.data_dir.join(id.to_string());
            if workspace_dir.exists() {
                continue;
            }
            std::fs::create_dir_all(&workspace_dir)?;

            let job = Job::new(
                id,
                input_path.clone(),
                workspace_dir,
                target_format.clone(),
                max_retries,
            );
            match self.jobs.write().entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(job.clone());
                    return Ok(job);
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn status_of(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.read().get(&id).map(|job| job.status)
    }

    /// Apply `f` to the job under the write lock.
    pub fn update<R>(&self, id: JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        self.jobs.write().get_mut(&id).map(f)
    }

    /// Move a queued job to `running` and return a snapshot of it.
    ///
    /// Fails with [`Error::Conflict`] when the job is already running or
    /// finished, so a job can never be executed twice.
    pub fn begin(&self, id: JobId) -> Result<Job> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| Error::not_found("job", id))?;
        match job.status {
            JobStatus::Queued => {
                job.start();
                Ok(job.clone())
            }
            other => Err(Error::Conflict(format!("job {id} is {other}"))),
        }
    }

    /// Mark a job `cleaned` unless it is running. Returns the workspace to
    /// remove on success.
    pub fn clean(&self, id: JobId) -> Option<PathBuf> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id)?;
        if job.status == JobStatus::Running {
            return None;
        }
        job.clean();
        Some(job.workspace_dir.clone())
    }

    /// Drop terminal records that finished before `cutoff`.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<JobId> {
        let mut evicted = Vec::new();
        self.jobs.write().retain(|id, job| {
            let expired = job.status.is_terminal()
                && job.finished_at.is_some_and(|finished| finished < cutoff);
            if expired {
                evicted.push(*id);
            }
            !expired
        });
        evicted
    }

    pub fn counters(&self) -> Counters {
        let jobs = self.jobs.read();
        let mut counters = Counters {
            total: jobs.len(),
            ..Counters::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => counters.queued += 1,
                JobStatus::Running => counters.running += 1,
                JobStatus::Done => counters.done += 1,
                JobStatus::Failed => counters.failed += 1,
                JobStatus::Cleaned => counters.cleaned += 1,
            }
        }
        counters
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}
