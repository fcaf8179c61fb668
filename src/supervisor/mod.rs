//! Job supervisor.
//!
//! [`Supervisor`] is the explicitly-owned context tying together the
//! [`JobRegistry`], the [`AdmissionQueue`] and the concurrency gate. It is
//! cheap to clone: every clone shares the same state.
//!
//! A job submitted through the queued path is admitted (or refused when the
//! queue is full), waits for a gate slot, runs under the retry controller and
//! always ends `done` or `failed`. [`Supervisor::run_immediately`] skips the
//! queue but shares the gate, and hands the final error back to the caller.

mod maintenance;
mod queue;
mod registry;
mod retry;
mod status;

pub use maintenance::MaintenanceHandles;
pub use queue::AdmissionQueue;
pub use registry::{Counters, JobRegistry};
pub use retry::{run_with_retries, RetryPolicy};
pub use status::{JobReport, SystemStatus};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use docforge_common::config::Config;
use docforge_common::{Error, Job, JobId, JobStatus, Result};
use docforge_exec::Converter;

/// Message recorded on jobs still waiting when the gate is closed.
const SHUTDOWN_MESSAGE: &str = "Supervisor shut down before the job started";

#[derive(Clone)]
pub struct Supervisor {
    config: Arc<Config>,
    registry: Arc<JobRegistry>,
    queue: Arc<AdmissionQueue>,
    gate: Arc<Semaphore>,
    started: Instant,
}

impl Supervisor {
    /// Build a supervisor and make sure the data directory exists.
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = config.storage.data_dir.clone();
        std::fs::create_dir_all(&data_dir)?;

        let gate_size = config.queue.gate_size();
        tracing::info!(
            data_dir = %data_dir.display(),
            max_concurrency = gate_size,
            max_queue_size = config.queue.max_queue_size,
            "Supervisor initialised"
        );

        Ok(Self {
            registry: Arc::new(JobRegistry::new(data_dir)),
            queue: Arc::new(AdmissionQueue::new(config.queue.max_queue_size)),
            gate: Arc::new(Semaphore::new(gate_size)),
            config: Arc::new(config),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        self.registry.data_dir()
    }

    /// Gate slots not currently held.
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // ---- Job creation ----

    pub fn create_job(&self, input_path: PathBuf, target_format: Option<String>) -> Result<Job> {
        let job = self
            .registry
            .create(input_path, target_format, self.config.queue.max_retries)?;
        tracing::debug!(job_id = %job.id, workspace = %job.workspace_dir.display(), "Job created");
        Ok(job)
    }

    /// Point a job that has not started yet at its input file.
    pub fn set_input_path(&self, id: JobId, path: PathBuf) -> Result<()> {
        self.registry
            .update(id, |job| {
                if job.status != JobStatus::Queued {
                    return Err(Error::Conflict(format!("job {id} is {}", job.status)));
                }
                job.input_path = path;
                Ok(())
            })
            .unwrap_or_else(|| Err(Error::not_found("job", id)))
    }

    /// Copy `source` into `<workspace>/input/` and record it as the job's
    /// input.
    pub async fn stage_input(&self, id: JobId, source: &Path) -> Result<PathBuf> {
        let job = self.get(id).ok_or_else(|| Error::not_found("job", id))?;
        let file_name = source.file_name().ok_or_else(|| {
            Error::Validation(format!("{} has no file name", source.display()))
        })?;

        let input_dir = job.workspace_dir.join("input");
        tokio::fs::create_dir_all(&input_dir).await?;
        let staged = input_dir.join(file_name);
        tokio::fs::copy(source, &staged).await?;

        self.set_input_path(id, staged.clone())?;
        tracing::debug!(job_id = %id, input = %staged.display(), "Input staged");
        Ok(staged)
    }

    // ---- Queued path ----

    /// Admit a job into the waiting queue.
    ///
    /// When the queue is full the job is marked `failed` with
    /// "Queue is full" and [`Error::AdmissionRejected`] is returned; it
    /// never runs.
    pub fn enqueue(&self, id: JobId) -> Result<()> {
        match self.registry.status_of(id) {
            None => return Err(Error::not_found("job", id)),
            Some(JobStatus::Queued) => {}
            Some(other) => return Err(Error::Conflict(format!("job {id} is {other}"))),
        }

        match self.queue.push(id) {
            Ok(_) => {
                tracing::info!(job_id = %id, position = ?self.queue.position(id), "Job enqueued");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.registry.update(id, |job| job.fail(&message));
                tracing::error!(job_id = %id, capacity = self.queue.capacity(), "Job rejected: {message}");
                Err(e)
            }
        }
    }

    /// Wait for a slot, run the job with retries and record the outcome.
    ///
    /// Never returns an error: every failure ends up on the job record.
    /// A job that is no longer `queued` (refused at admission, cleaned, or
    /// picked up by another caller) is skipped.
    pub async fn run_job(&self, id: JobId, converter: &dyn Converter) {
        match self.registry.status_of(id) {
            Some(JobStatus::Queued) => {}
            Some(status) => {
                tracing::debug!(job_id = %id, %status, "Skipping job that is not queued");
                return;
            }
            None => {
                tracing::warn!(job_id = %id, "Skipping unknown job");
                return;
            }
        }

        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                self.fail_on_shutdown(id);
                return;
            }
        };

        // Whoever moved the job out of `queued` also owns its queue entry.
        let job = match self.registry.begin(id) {
            Ok(job) => job,
            Err(e) => {
                tracing::debug!(job_id = %id, "Not starting job: {e}");
                return;
            }
        };
        self.queue.remove(id);
        tracing::info!(job_id = %id, input = %job.input_path.display(), "Job started");

        match run_with_retries(&self.registry, &job, converter, self.retry_policy(&job)).await {
            Ok(output) => {
                tracing::info!(job_id = %id, output = %output.display(), "Job finished");
                self.registry.update(id, |job| job.complete(output));
            }
            Err(e) => {
                tracing::error!(job_id = %id, "Job failed: {e}");
                let message = e.to_string();
                self.registry.update(id, |job| job.fail(&message));
            }
        }
    }

    /// Enqueue a job and spawn its scheduler task.
    pub fn submit(&self, id: JobId, converter: Arc<dyn Converter>) -> Result<JoinHandle<()>> {
        self.enqueue(id)?;
        let supervisor = self.clone();
        Ok(tokio::spawn(async move {
            supervisor.run_job(id, converter.as_ref()).await;
        }))
    }

    // ---- Immediate path ----

    /// Run a job now, bypassing the queue but honouring the gate.
    ///
    /// The job is recorded `done` or `failed` exactly as on the queued path,
    /// and the final error is returned to the caller.
    pub async fn run_immediately(&self, id: JobId, converter: &dyn Converter) -> Result<PathBuf> {
        if self.registry.status_of(id).is_none() {
            return Err(Error::not_found("job", id));
        }

        let Ok(_permit) = self.gate.acquire().await else {
            self.fail_on_shutdown(id);
            return Err(Error::Internal(SHUTDOWN_MESSAGE.to_string()));
        };

        let job = self.registry.begin(id)?;
        self.queue.remove(id);
        tracing::info!(job_id = %id, input = %job.input_path.display(), "Job started immediately");

        match run_with_retries(&self.registry, &job, converter, self.retry_policy(&job)).await {
            Ok(output) => {
                tracing::info!(job_id = %id, output = %output.display(), "Job finished");
                self.registry.update(id, |job| job.complete(output.clone()));
                Ok(output)
            }
            Err(e) => {
                tracing::error!(job_id = %id, "Job failed: {e}");
                let message = e.to_string();
                self.registry.update(id, |job| job.fail(&message));
                Err(e)
            }
        }
    }

    /// Close the gate. Jobs still waiting for a slot are failed; running
    /// jobs finish normally.
    pub fn shutdown(&self) {
        self.gate.close();
        tracing::info!(queued = self.queue.len(), "Supervisor shutting down");
    }

    fn fail_on_shutdown(&self, id: JobId) {
        self.queue.remove(id);
        self.registry.update(id, |job| {
            if job.status == JobStatus::Queued {
                job.fail(SHUTDOWN_MESSAGE);
            }
        });
        tracing::warn!(job_id = %id, "{SHUTDOWN_MESSAGE}");
    }

    fn retry_policy(&self, job: &Job) -> RetryPolicy {
        RetryPolicy {
            max_retries: job.max_retries,
            cooldown: self.config.queue.retry_cooldown(),
        }
    }

    // ---- Queries ----

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.registry.get(id)
    }

    /// 0-based position among jobs waiting for a slot.
    pub fn waiting_position(&self, id: JobId) -> Option<usize> {
        self.queue.position(id)
    }

    pub fn status(&self, id: JobId) -> Option<JobReport> {
        let job = self.registry.get(id)?;
        let position = self.queue.position(id);
        Some(JobReport::from_job(&job, position))
    }

    pub fn counters(&self) -> Counters {
        self.registry.counters()
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus::collect(self)
    }

    // ---- Cleanup ----

    /// Delete a job's workspace and mark it `cleaned`.
    ///
    /// Returns `false` for unknown or running jobs. Filesystem errors are
    /// logged, never returned.
    pub fn cleanup_job(&self, id: JobId) -> bool {
        let Some(workspace) = self.registry.clean(id) else {
            tracing::debug!(job_id = %id, "Cleanup skipped: job unknown or running");
            return false;
        };
        self.queue.remove(id);

        if let Err(e) = std::fs::remove_dir_all(&workspace) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!(job_id = %id, "Cleanup error: {e}");
            }
        }
        tracing::info!(job_id = %id, "Job cleaned up and marked as cleaned");
        true
    }

    /// Forget terminal jobs that finished longer ago than the record TTL.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.config.retention.record_ttl() else {
            return 0;
        };
        let evicted = self.registry.evict_finished_before(now - ttl);
        for id in &evicted {
            tracing::info!(job_id = %id, "Evicted job record");
        }
        evicted.len()
    }

    /// Remove workspaces under the data directory whose modification time
    /// is older than the cleanup threshold.
    ///
    /// Known jobs go through [`Supervisor::cleanup_job`]; directories no job
    /// claims are deleted outright. Running jobs and jobs still waiting in
    /// the queue are left alone.
    pub fn sweep_workspaces(&self) -> usize {
        self.sweep_workspaces_at(SystemTime::now())
    }

    pub fn sweep_workspaces_at(&self, now: SystemTime) -> usize {
        let threshold = self.config.retention.cleanup_after();
        let entries = match std::fs::read_dir(self.data_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(data_dir = %self.data_dir().display(), "Cleanup cycle error: {e}");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= threshold {
                continue;
            }

            let known = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<JobId>().ok())
                .filter(|id| self.registry.status_of(*id).is_some());

            match known {
                Some(id) => {
                    if self.queue.position(id).is_some() {
                        tracing::debug!(job_id = %id, "Sweep skipped queued job");
                        continue;
                    }
                    if !self.cleanup_job(id) {
                        continue;
                    }
                }
                None => {
                    if let Err(e) = std::fs::remove_dir_all(&path) {
                        tracing::error!(path = %path.display(), "Cleanup error: {e}");
                        continue;
                    }
                    tracing::info!(path = %path.display(), "Removed orphaned workspace");
                }
            }
            removed += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use docforge_exec::ConversionRequest;

    struct Echo;

    #[async_trait]
    impl Converter for Echo {
        async fn convert(&self, request: &ConversionRequest) -> Result<PathBuf> {
            let out = request.output_dir.join("out.pdf");
            tokio::fs::write(&out, b"%PDF").await?;
            Ok(out)
        }
    }

    fn supervisor(max_queue_size: usize) -> (Supervisor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config.queue.max_queue_size = max_queue_size;
        config.queue.max_concurrency = 2;
        (Supervisor::new(config).unwrap(), dir)
    }

    #[test]
    fn new_creates_data_dir() {
        let (supervisor, _dir) = supervisor(0);
        assert!(supervisor.data_dir().is_dir());
        assert_eq!(supervisor.available_slots(), 2);
    }

    #[test]
    fn enqueue_unknown_job_is_not_found() {
        let (supervisor, _dir) = supervisor(0);
        assert_matches!(supervisor.enqueue(JobId::new()), Err(Error::NotFound { .. }));
    }

    #[test]
    fn rejected_job_is_failed() {
        let (supervisor, _dir) = supervisor(1);
        let first = supervisor.create_job(PathBuf::new(), None).unwrap();
        let second = supervisor.create_job(PathBuf::new(), None).unwrap();

        supervisor.enqueue(first.id).unwrap();
        assert_matches!(
            supervisor.enqueue(second.id),
            Err(Error::AdmissionRejected { capacity: 1 })
        );

        let rejected = supervisor.get(second.id).unwrap();
        assert_eq!(rejected.status, JobStatus::Failed);
        assert_eq!(rejected.message.as_deref(), Some("Queue is full"));
        assert_eq!(supervisor.waiting_position(second.id), None);
        assert_eq!(supervisor.waiting_position(first.id), Some(0));
    }

    #[tokio::test]
    async fn stage_input_copies_into_workspace() {
        let (supervisor, dir) = supervisor(0);
        let source = dir.path().join("report.docx");
        std::fs::write(&source, b"doc").unwrap();

        let job = supervisor.create_job(PathBuf::new(), None).unwrap();
        let staged = supervisor.stage_input(job.id, &source).await.unwrap();

        assert_eq!(staged, job.workspace_dir.join("input").join("report.docx"));
        assert_eq!(std::fs::read(&staged).unwrap(), b"doc");
        assert_eq!(supervisor.get(job.id).unwrap().input_path, staged);
    }

    #[tokio::test]
    async fn run_job_skips_finished_job() {
        let (supervisor, _dir) = supervisor(0);
        let job = supervisor.create_job(PathBuf::new(), None).unwrap();
        supervisor.run_immediately(job.id, &Echo).await.unwrap();

        let done = supervisor.get(job.id).unwrap();
        supervisor.run_job(job.id, &Echo).await;
        let after = supervisor.get(job.id).unwrap();
        assert_eq!(after.status, JobStatus::Done);
        assert_eq!(after.finished_at, done.finished_at);
    }

    #[tokio::test]
    async fn set_input_path_rejected_after_start() {
        let (supervisor, _dir) = supervisor(0);
        let job = supervisor.create_job(PathBuf::new(), None).unwrap();
        supervisor.run_immediately(job.id, &Echo).await.unwrap();

        assert_matches!(
            supervisor.set_input_path(job.id, PathBuf::from("x")),
            Err(Error::Conflict(_))
        );
    }

    #[tokio::test]
    async fn status_reports_output_and_position() {
        let (supervisor, _dir) = supervisor(0);
        let waiting = supervisor.create_job(PathBuf::new(), None).unwrap();
        supervisor.enqueue(waiting.id).unwrap();

        let report = supervisor.status(waiting.id).unwrap();
        assert_eq!(report.status, JobStatus::Queued);
        assert_eq!(report.waiting_position, Some(0));
        assert!(report.output_path.is_none());

        let done = supervisor.create_job(PathBuf::new(), None).unwrap();
        let out = supervisor.run_immediately(done.id, &Echo).await.unwrap();
        let report = supervisor.status(done.id).unwrap();
        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(report.output_path, Some(out));
        assert_eq!(report.waiting_position, None);
    }

    #[tokio::test]
    async fn shutdown_fails_waiting_jobs() {
        let (supervisor, _dir) = supervisor(0);
        let job = supervisor.create_job(PathBuf::new(), None).unwrap();
        supervisor.enqueue(job.id).unwrap();
        supervisor.shutdown();

        supervisor.run_job(job.id, &Echo).await;
        let job = supervisor.get(job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message.as_deref(), Some(SHUTDOWN_MESSAGE));
        assert_eq!(supervisor.queue_len(), 0);
    }

    #[tokio::test]
    async fn shutdown_fails_immediate_job() {
        let (supervisor, _dir) = supervisor(0);
        let job = supervisor.create_job(PathBuf::new(), None).unwrap();
        supervisor.shutdown();

        let result = supervisor.run_immediately(job.id, &Echo).await;
        assert_matches!(result, Err(Error::Internal(_)));
        let job = supervisor.get(job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message.as_deref(), Some(SHUTDOWN_MESSAGE));
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn job_keeps_its_position_until_it_starts() {
        let (supervisor, _dir) = supervisor(0);
        let held = supervisor.gate.clone().acquire_many_owned(2).await.unwrap();
        let job = supervisor.create_job(PathBuf::new(), None).unwrap();
        supervisor.enqueue(job.id).unwrap();

        let runner = supervisor.clone();
        let handle = tokio::spawn(async move { runner.run_job(job.id, &Echo).await });
        tokio::task::yield_now().await;
        assert_eq!(supervisor.waiting_position(job.id), Some(0));

        // Another caller starts the job while the scheduler waits for a slot.
        supervisor.registry.begin(job.id).unwrap();
        drop(held);
        handle.await.unwrap();

        let job = supervisor.get(job.id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.output_path.is_none());
    }

    #[tokio::test]
    async fn cleanup_job_removes_workspace() {
        let (supervisor, _dir) = supervisor(0);
        let job = supervisor.create_job(PathBuf::new(), None).unwrap();
        supervisor.run_immediately(job.id, &Echo).await.unwrap();

        assert!(supervisor.cleanup_job(job.id));
        assert!(!job.workspace_dir.exists());
        let cleaned = supervisor.get(job.id).unwrap();
        assert_eq!(cleaned.status, JobStatus::Cleaned);
        assert_eq!(
            cleaned.message.as_deref(),
            Some(docforge_common::job::CLEANED_MESSAGE)
        );
        assert!(!supervisor.cleanup_job(JobId::new()));
    }
}
