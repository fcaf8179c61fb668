//! Bounded retry around a single conversion.

use std::path::PathBuf;
use std::time::Duration;

use docforge_common::{Error, Job, Result};
use docforge_exec::{ConversionRequest, Converter};

use super::registry::JobRegistry;

/// Retry settings for one job.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts beyond the first.
    pub max_retries: u32,
    /// Pause between a failed attempt and the next one.
    pub cooldown: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `converter` for `job` up to `policy.attempts()` times.
///
/// The attempt index is written to the registry before each attempt. The
/// first success is returned immediately; after the last failure the
/// result is [`Error::RetriesExhausted`] wrapping that failure.
pub async fn run_with_retries(
    registry: &JobRegistry,
    job: &Job,
    converter: &dyn Converter,
    policy: RetryPolicy,
) -> Result<PathBuf> {
    let request = ConversionRequest {
        job_id: job.id,
        input_path: job.input_path.clone(),
        output_dir: job.workspace_dir.clone(),
        target_format: job.target_format.clone(),
    };

    let mut last_error = None;
    for attempt in 0..policy.attempts() {
        if attempt > 0 {
            tokio::time::sleep(policy.cooldown).await;
        }
        registry.update(job.id, |j| j.record_attempt(attempt));

        match converter.convert(&request).await {
            Ok(path) => {
                if attempt > 0 {
                    tracing::info!(job_id = %job.id, attempt, "Conversion succeeded after retry");
                }
                return Ok(path);
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    attempt,
                    max_retries = policy.max_retries,
                    "Conversion attempt failed: {e}"
                );
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(last) => Error::exhausted(policy.attempts(), last),
        None => Error::Internal("Unknown conversion failure".to_string()),
    })
}
