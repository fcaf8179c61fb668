//! Read-only views over supervisor state.

use std::path::{Path, PathBuf};

use serde::Serialize;

use docforge_common::{Job, JobId, JobStatus};

use super::{Counters, Supervisor};

/// What a client polling a job sees.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: Option<String>,
    /// Index of the current or last attempt.
    pub retries: u32,
    /// Present only once the job is `done`.
    pub output_path: Option<PathBuf>,
    /// Present only while the job waits in the queue.
    pub waiting_position: Option<usize>,
}

impl JobReport {
    pub fn from_job(job: &Job, waiting_position: Option<usize>) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            message: job.message.clone(),
            retries: job.attempt_count,
            output_path: job
                .output_path
                .clone()
                .filter(|_| job.status == JobStatus::Done),
            waiting_position: waiting_position.filter(|_| job.status == JobStatus::Queued),
        }
    }
}

/// Service-level health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub convert_timeout_seconds: u64,
    pub max_concurrency: usize,
    pub available_slots: usize,
    pub queue_length: usize,
    pub cleanup_after_seconds: u64,
    #[serde(flatten)]
    pub counters: Counters,
    pub cpu_cores: usize,
    pub data_dir: PathBuf,
    pub data_dir_used_bytes: u64,
    pub data_dir_free_bytes: u64,
}

impl SystemStatus {
    pub(super) fn collect(supervisor: &Supervisor) -> Self {
        let config = supervisor.config();
        let (used, free) = disk_usage(supervisor.data_dir()).unwrap_or_else(|e| {
            tracing::warn!("Failed to read disk usage: {e}");
            (0, 0)
        });

        Self {
            status: "ok",
            uptime_seconds: supervisor.started.elapsed().as_secs(),
            convert_timeout_seconds: config.converter.convert_timeout().as_secs(),
            max_concurrency: config.queue.gate_size(),
            available_slots: supervisor.available_slots(),
            queue_length: supervisor.queue_len(),
            cleanup_after_seconds: config.retention.cleanup_after().as_secs(),
            counters: supervisor.counters(),
            cpu_cores: num_cpus::get(),
            data_dir: supervisor.data_dir().to_path_buf(),
            data_dir_used_bytes: used,
            data_dir_free_bytes: free,
        }
    }
}

/// `(used, free)` bytes of the filesystem holding `path`.
#[cfg(unix)]
fn disk_usage(path: &Path) -> std::io::Result<(u64, u64)> {
    let stats = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
    let block = stats.fragment_size() as u64;
    let total = stats.blocks() as u64 * block;
    let free = stats.blocks_available() as u64 * block;
    let reserved_free = stats.blocks_free() as u64 * block;
    Ok((total.saturating_sub(reserved_free), free))
}

#[cfg(not(unix))]
fn disk_usage(_path: &Path) -> std::io::Result<(u64, u64)> {
    Ok((0, 0))
}
