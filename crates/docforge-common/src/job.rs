//! The conversion job record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::JobId;

/// Message recorded when a workspace is reclaimed.
pub const CLEANED_MESSAGE: &str = "Cleaned up after retention period";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Cleaned,
}

impl JobStatus {
    /// `done`, `failed` and `cleaned` see no further automatic transition
    /// other than eviction.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cleaned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cleaned => "cleaned",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested conversion and its tracked state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input_path: PathBuf,
    pub workspace_dir: PathBuf,
    pub target_format: Option<String>,
    pub status: JobStatus,
    /// 0-based index of the current or last attempt.
    pub attempt_count: u32,
    pub max_retries: u32,
    pub output_path: Option<PathBuf>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        id: JobId,
        input_path: PathBuf,
        workspace_dir: PathBuf,
        target_format: Option<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id,
            input_path,
            workspace_dir,
            target_format,
            status: JobStatus::Queued,
            attempt_count: 0,
            max_retries,
            output_path: None,
            message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record the attempt about to run. Never moves backwards and never
    /// exceeds `max_retries`.
    pub fn record_attempt(&mut self, attempt: u32) {
        self.attempt_count = self.attempt_count.max(attempt.min(self.max_retries));
    }

    pub fn complete(&mut self, output_path: PathBuf) {
        self.status = JobStatus::Done;
        self.output_path = Some(output_path);
        self.message = None;
        self.mark_finished();
    }

    pub fn fail(&mut self, message: &str) {
        self.status = JobStatus::Failed;
        self.message = Some(message.to_string());
        self.mark_finished();
    }

    /// The workspace is gone: forget the output but keep the record.
    pub fn clean(&mut self) {
        self.status = JobStatus::Cleaned;
        self.output_path = None;
        self.message = Some(CLEANED_MESSAGE.to_string());
        self.mark_finished();
    }

    fn mark_finished(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }
}
