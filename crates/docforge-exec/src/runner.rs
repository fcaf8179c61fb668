//! The conversion seam and its LibreOffice implementation.
//!
//! [`Converter`] is what the supervisor drives for each attempt.
//! [`SofficeRunner`] implements it by launching `soffice --headless
//! --convert-to` under a deadline, inside a fresh [`ProfileDir`], and then
//! locating the produced file by base name and extension.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use docforge_common::config::ConverterConfig;
use docforge_common::{Error, JobId, Result};

use crate::process::ProcessCommand;
use crate::profile::ProfileDir;
use crate::tools::{ConverterTools, SOFFICE};

/// Everything one conversion attempt needs.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub job_id: JobId,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub target_format: Option<String>,
}

/// Produces a converted file for a request, or fails.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Run one conversion attempt and return the absolute output path.
    async fn convert(&self, request: &ConversionRequest) -> Result<PathBuf>;
}

/// Extension the converter writes for `target`: the filter name prefix
/// before any `:`, lower-cased (`"pdf:writer_pdf_Export"` gives `"pdf"`).
pub fn expected_extension(target: &str) -> String {
    target
        .split(':')
        .next()
        .unwrap_or(target)
        .trim()
        .to_ascii_lowercase()
}

/// First file in `output_dir` (by name) whose name starts with the input's
/// base name and ends with `.ext`.
pub fn find_output(input: &Path, output_dir: &Path, ext: &str) -> Option<PathBuf> {
    let base = input.file_stem()?.to_string_lossy().to_string();
    let suffix = format!(".{}", ext.to_ascii_lowercase());

    let mut names: Vec<(String, PathBuf)> = std::fs::read_dir(output_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| (entry.file_name().to_string_lossy().to_string(), entry.path()))
        .collect();
    names.sort();

    names
        .into_iter()
        .find(|(name, _)| name.starts_with(&base) && name.to_ascii_lowercase().ends_with(&suffix))
        .map(|(_, path)| std::fs::canonicalize(&path).unwrap_or(path))
}

/// Runs LibreOffice in headless mode for each conversion.
#[derive(Debug, Clone)]
pub struct SofficeRunner {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
    terminate_grace: Duration,
    kill_wait: Duration,
    default_format: String,
}

impl SofficeRunner {
    /// Runner for the given executable with default deadlines.
    pub fn new(program: PathBuf) -> Self {
        Self::with_config(program, &ConverterConfig::default())
    }

    fn with_config(program: PathBuf, config: &ConverterConfig) -> Self {
        Self {
            program,
            leading_args: Vec::new(),
            timeout: config.convert_timeout(),
            terminate_grace: config.terminate_grace(),
            kill_wait: config.kill_wait(),
            default_format: config.default_format.clone(),
        }
    }

    /// Runner built from configuration and a discovered `soffice`.
    pub fn from_config(config: &ConverterConfig, tools: &ConverterTools) -> Result<Self> {
        let tool = tools.require(SOFFICE)?;
        Ok(Self::with_config(tool.path.clone(), config))
    }

    /// Arguments placed before the converter's own, for launching through a
    /// wrapper program (e.g. `program = "sh"`, leading args = script path).
    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn with_kill_wait(mut self, wait: Duration) -> Self {
        self.kill_wait = wait;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, input: &Path, output_dir: &Path, target: &str, profile: &ProfileDir) -> ProcessCommand {
        let mut cmd = ProcessCommand::new(self.program.clone());
        cmd.args(self.leading_args.iter().cloned())
            .arg("--headless")
            .arg(format!("-env:UserInstallation={}", profile.uri()))
            .args(["--norestore", "--nodefault", "--nolockcheck", "--nofirststartwizard"])
            .arg("--convert-to")
            .arg(target)
            .arg("--outdir")
            .arg(output_dir.to_string_lossy())
            .arg(input.to_string_lossy())
            .timeout(self.timeout)
            .terminate_grace(self.terminate_grace)
            .kill_wait(self.kill_wait);
        cmd
    }

    /// Convert `input` into `output_dir`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConversionTimedOut`] when the deadline elapses.
    /// - [`Error::ConversionProcessFailed`] on a nonzero exit.
    /// - [`Error::OutputMissing`] on a clean exit with no matching file.
    /// - [`Error::Tool`] / [`Error::Io`] when the process or directories
    ///   cannot be set up.
    pub async fn run(&self, job_id: JobId, input: &Path, output_dir: &Path, target: Option<&str>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(output_dir).await?;

        // Dropped on every return path below, which removes the directory.
        let profile = ProfileDir::create(output_dir)?;

        let target = target
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(self.default_format.as_str());
        let cmd = self.command(input, output_dir, target, &profile);
        let tool = cmd.program_name();

        tracing::info!(job_id = %job_id, "Executing: {}", cmd.display());

        let output = cmd.run().await?;

        if !output.stdout.trim().is_empty() {
            tracing::debug!(job_id = %job_id, "{tool} stdout: {}", output.stdout.trim());
        }
        if !output.stderr.trim().is_empty() {
            tracing::debug!(job_id = %job_id, "{tool} stderr: {}", output.stderr.trim());
        }

        if !output.status.success() {
            return Err(Error::ConversionProcessFailed {
                tool,
                code: output.code(),
                details: output.details("Unknown error"),
            });
        }

        let ext = expected_extension(target);
        find_output(input, output_dir, &ext).ok_or_else(|| Error::OutputMissing {
            details: output.details("No output produced"),
        })
    }
}

#[async_trait]
impl Converter for SofficeRunner {
    async fn convert(&self, request: &ConversionRequest) -> Result<PathBuf> {
        self.run(
            request.job_id,
            &request.input_path,
            &request.output_dir,
            request.target_format.as_deref(),
        )
        .await
    }
}
