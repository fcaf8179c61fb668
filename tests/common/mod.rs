//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a scratch directory and a
//! [`Supervisor`] rooted in it, plus a handful of [`Converter`] stand-ins
//! and a shell-script fake of `soffice`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use docforge::Supervisor;
use docforge_common::config::Config;
use docforge_common::{Error, JobId, Result};
use docforge_exec::{ConversionRequest, Converter, SofficeRunner};

/// Test harness wrapping a [`Supervisor`] whose data directory lives in a
/// temporary directory.
pub struct TestHarness {
    pub supervisor: Supervisor,
    dir: TempDir,
}

impl TestHarness {
    /// Two slots, an unbounded queue and a short retry cooldown.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config.queue.max_concurrency = 2;
        config.queue.max_queue_size = 0;
        config.queue.retry_cooldown_ms = 10;
        tweak(&mut config);

        let supervisor = Supervisor::new(config).expect("failed to build supervisor");
        Self { supervisor, dir }
    }

    /// Directory outside the data dir for inputs and scripts.
    pub fn scratch(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> &Path {
        self.supervisor.data_dir()
    }

    /// Create a job with a staged input file called `name`.
    pub async fn job(&self, name: &str) -> JobId {
        let source = self.scratch().join(name);
        std::fs::write(&source, b"document body").expect("failed to write input");

        let job = self
            .supervisor
            .create_job(PathBuf::new(), Some("pdf".into()))
            .expect("failed to create job");
        self.supervisor
            .stage_input(job.id, &source)
            .await
            .expect("failed to stage input");
        job.id
    }
}

/// Write `<stem>.pdf` into the request's output directory.
async fn write_output(request: &ConversionRequest) -> Result<PathBuf> {
    let stem = request
        .input_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".into());
    let out = request.output_dir.join(format!("{stem}.pdf"));
    tokio::fs::write(&out, b"%PDF-1.7").await?;
    Ok(out)
}

/// Fails the first `failures` calls, then succeeds.
pub struct FlakyConverter {
    failures: u32,
    delay: Duration,
    calls: AtomicU32,
}

impl FlakyConverter {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for FlakyConverter {
    async fn convert(&self, request: &ConversionRequest) -> Result<PathBuf> {
        tokio::time::sleep(self.delay).await;
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::ConversionProcessFailed {
                tool: "soffice".into(),
                code: 1,
                details: format!("attempt {call} failed"),
            });
        }
        write_output(request).await
    }
}

/// Tracks how many conversions are in flight at once.
pub struct OverlapConverter {
    hold: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

impl OverlapConverter {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for OverlapConverter {
    async fn convert(&self, request: &ConversionRequest) -> Result<PathBuf> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        write_output(request).await
    }
}

/// Blocks inside `convert` until released.
#[derive(Default)]
pub struct GatedConverter {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl Converter for GatedConverter {
    async fn convert(&self, request: &ConversionRequest) -> Result<PathBuf> {
        self.started.notify_one();
        self.release.notified().await;
        write_output(request).await
    }
}

/// Argument parsing shared by every fake converter script. Leaves `outdir`,
/// `base` and `ext` set the way LibreOffice would name its output.
#[cfg(unix)]
const PRELUDE: &str = r#"
outdir=""; input=""; target=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    --convert-to) target="$2"; shift 2 ;;
    -*) shift ;;
    *) input="$1"; shift ;;
  esac
done
base=$(basename "$input"); base="${base%.*}"
ext="${target%%:*}"
"#;

/// A [`SofficeRunner`] that runs `body` through `sh` instead of LibreOffice.
#[cfg(unix)]
pub fn fake_soffice(dir: &Path, body: &str, timeout: Duration) -> SofficeRunner {
    let script = dir.join(format!("fake-soffice-{}.sh", JobId::new()));
    std::fs::write(&script, format!("{PRELUDE}\n{body}\n")).expect("failed to write script");
    SofficeRunner::new(PathBuf::from("sh"))
        .with_leading_args([script.to_string_lossy().to_string()])
        .with_timeout(timeout)
        .with_terminate_grace(Duration::from_millis(300))
        .with_kill_wait(Duration::from_secs(1))
}

/// Poll `check` every few milliseconds until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
