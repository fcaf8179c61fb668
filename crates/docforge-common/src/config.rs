//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! sub-configs for storage, the job queue, the converter and retention. Every
//! section defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub converter: ConverterConfig,
    pub retention: RetentionConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.queue.max_concurrency == 0 {
            warnings.push("queue.max_concurrency is 0; one slot will be used".into());
        }

        if self.queue.max_queue_size == 0 {
            warnings.push("queue.max_queue_size is 0; the admission queue is unbounded".into());
        }

        if self.converter.convert_timeout_secs == 0 {
            warnings.push(
                "converter.convert_timeout_secs is 0; every conversion will time out".into(),
            );
        }

        if self.retention.job_record_ttl_secs <= 0 {
            warnings.push(
                "retention.job_record_ttl_secs <= 0; job records are never evicted".into(),
            );
        }

        if let Some(ref path) = self.converter.soffice_path {
            if !path.exists() {
                warnings.push(format!(
                    "converter.soffice_path {} does not exist; PATH lookup will be used",
                    path.display()
                ));
            }
        }

        if self.retention.eviction_interval_secs == 0 || self.retention.sweep_interval_secs == 0 {
            warnings.push("retention intervals of 0 are raised to 1 second".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Where job workspaces live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::temp_dir().join("docforge"),
        }
    }
}

/// Admission queue, concurrency gate and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of conversions allowed to run at once.
    pub max_concurrency: usize,
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Maximum number of jobs waiting for a slot; 0 means unlimited.
    pub max_queue_size: usize,
    /// Pause between a failed attempt and the next one.
    pub retry_cooldown_ms: u64,
}

fn default_max_concurrency() -> usize {
    num_cpus::get().max(1)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_retries: 2,
            max_queue_size: 1000,
            retry_cooldown_ms: 200,
        }
    }
}

impl QueueConfig {
    /// Gate size, never below one.
    pub fn gate_size(&self) -> usize {
        self.max_concurrency.max(1)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }
}

/// External converter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Explicit path to `soffice`; `None` searches `PATH`.
    pub soffice_path: Option<PathBuf>,
    /// Per-attempt wall-clock deadline.
    pub convert_timeout_secs: u64,
    /// How long to wait after SIGTERM before sending SIGKILL.
    pub terminate_grace_secs: u64,
    /// How long to wait for the reap after SIGKILL.
    pub kill_wait_secs: u64,
    /// Target used when a request does not name one.
    pub default_format: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            soffice_path: None,
            convert_timeout_secs: 600,
            terminate_grace_secs: 5,
            kill_wait_secs: 3,
            default_format: "pdf".into(),
        }
    }
}

impl ConverterConfig {
    pub fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_secs(self.kill_wait_secs)
    }
}

/// Record eviction and workspace reclamation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// How long terminal job records stay queryable; `<= 0` disables eviction.
    pub job_record_ttl_secs: i64,
    /// Workspace directories older than this (by mtime) are removed.
    pub cleanup_after_secs: u64,
    pub eviction_interval_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_record_ttl_secs: 86_400,
            cleanup_after_secs: 3_600,
            eviction_interval_secs: 60,
            sweep_interval_secs: 60,
        }
    }
}

impl RetentionConfig {
    /// The record retention window, or `None` when eviction is disabled.
    pub fn record_ttl(&self) -> Option<chrono::Duration> {
        (self.job_record_ttl_secs > 0).then(|| chrono::Duration::seconds(self.job_record_ttl_secs))
    }

    pub fn cleanup_after(&self) -> Duration {
        Duration::from_secs(self.cleanup_after_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
