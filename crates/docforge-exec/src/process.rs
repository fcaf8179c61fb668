//! Managed external processes with deadline and process-group signalling.
//!
//! [`ProcessCommand`] is a builder for one invocation. [`ManagedProcess`] is
//! the running child: it leads its own process group so the converter and
//! anything it forks can be signalled together, its stdout/stderr are drained
//! concurrently, and on a missed deadline termination escalates from SIGTERM
//! to SIGKILL across the group.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use docforge_common::{Error, Result};

/// Default deadline: 10 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
/// Default pause between SIGTERM and SIGKILL.
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// Default wait for the reap after SIGKILL.
const DEFAULT_KILL_WAIT: Duration = Duration::from_secs(3);

/// Output captured from a process that exited on its own.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl ProcessOutput {
    /// Exit code, or -1 when the process was ended by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Trimmed stderr, else trimmed stdout, else `fallback`.
    pub fn details(&self, fallback: &str) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

/// Result of waiting on a [`ManagedProcess`] with a deadline.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The process exited and both pipes reached EOF before the deadline.
    Exited(ProcessOutput),
    /// The deadline elapsed first. The process is still running.
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// A builder for one external process invocation.
///
/// # Example
///
/// ```no_run
/// use docforge_exec::ProcessCommand;
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # async fn example() -> docforge_common::Result<()> {
/// let output = ProcessCommand::new(PathBuf::from("soffice"))
///     .arg("--version")
///     .timeout(Duration::from_secs(30))
///     .run()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    terminate_grace: Duration,
    kill_wait: Duration,
}

impl ProcessCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            kill_wait: DEFAULT_KILL_WAIT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the wall-clock deadline.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Set how long to wait after SIGTERM before escalating to SIGKILL.
    pub fn terminate_grace(&mut self, d: Duration) -> &mut Self {
        self.terminate_grace = d;
        self
    }

    /// Set how long to wait for the reap after SIGKILL.
    pub fn kill_wait(&mut self, d: Duration) -> &mut Self {
        self.kill_wait = d;
        self
    }

    /// File name of the program, for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// The command line with each argument quoted where needed.
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .map(|a| {
                if a.is_empty() || a.contains(|c: char| c.is_whitespace() || c == '\'') {
                    format!("'{}'", a.replace('\'', "'\\''"))
                } else {
                    a
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawn the process as the leader of a new process group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] if spawning the process fails.
    pub fn spawn(&self) -> Result<ManagedProcess> {
        let name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::tool(&name, format!("failed to spawn: {e}")))?;

        let pgid = child.id().and_then(|pid| i32::try_from(pid).ok());
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        tracing::debug!(process = %name, pgid = ?pgid, "Process started");

        Ok(ManagedProcess {
            name,
            child,
            pgid,
            stdout,
            stderr,
        })
    }

    /// Run to completion under the deadline.
    ///
    /// A nonzero exit is *not* an error here; callers inspect
    /// [`ProcessOutput::status`].
    ///
    /// # Errors
    ///
    /// - [`Error::Tool`] if spawning or waiting fails.
    /// - [`Error::ConversionTimedOut`] if the deadline elapses. The process
    ///   group has been sent SIGTERM, then SIGKILL if anything survived the
    ///   grace period, before this returns.
    pub async fn run(&self) -> Result<ProcessOutput> {
        let mut process = self.spawn()?;

        match process.wait_with_deadline(self.timeout).await? {
            WaitOutcome::Exited(output) => Ok(output),
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    process = %process.name,
                    timeout = ?self.timeout,
                    "Deadline elapsed; terminating process group"
                );
                process
                    .terminate_with_escalation(self.terminate_grace, self.kill_wait)
                    .await;
                Err(Error::ConversionTimedOut {
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// A running child process that leads its own process group.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
    pgid: Option<i32>,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl ManagedProcess {
    /// Start `command`. Shorthand for [`ProcessCommand::spawn`].
    pub fn start(command: &ProcessCommand) -> Result<Self> {
        command.spawn()
    }

    /// Process group id (equal to the leader's pid).
    pub fn pgid(&self) -> Option<i32> {
        self.pgid
    }

    /// Wait for exit and for both pipes to close, up to `deadline`.
    ///
    /// Pipe EOF is part of the wait because a converter that forks helpers
    /// is not finished until they let go of its output.
    pub async fn wait_with_deadline(&mut self, deadline: Duration) -> Result<WaitOutcome> {
        let waited = tokio::time::timeout(deadline, async {
            let status = self.child.wait().await?;
            let stdout = join_pipe(&mut self.stdout).await;
            let stderr = join_pipe(&mut self.stderr).await;
            Ok::<_, std::io::Error>(ProcessOutput {
                status,
                stdout,
                stderr,
            })
        })
        .await;

        match waited {
            Ok(Ok(output)) => Ok(WaitOutcome::Exited(output)),
            Ok(Err(e)) => Err(Error::tool(
                &self.name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Ok(WaitOutcome::TimedOut),
        }
    }

    /// Send SIGTERM to the whole group. A group that is already gone is a no-op.
    pub fn terminate_group(&self) {
        self.signal_group(GroupSignal::Terminate);
    }

    /// Send SIGKILL to the whole group. A group that is already gone is a no-op.
    pub fn kill_group(&self) {
        self.signal_group(GroupSignal::Kill);
    }

    /// Whether any member of the group can still be signalled.
    pub fn group_alive(&self) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal::killpg;
            use nix::unistd::Pid;

            match self.pgid {
                Some(pgid) => killpg(Pid::from_raw(pgid), None).is_ok(),
                None => false,
            }
        }
        #[cfg(not(unix))]
        {
            self.child.id().is_some()
        }
    }

    /// Wait up to `within` for the leader to be reaped.
    pub async fn wait_for_exit(&mut self, within: Duration) -> bool {
        matches!(
            tokio::time::timeout(within, self.child.wait()).await,
            Ok(Ok(_))
        )
    }

    /// SIGTERM the group, wait `grace`, SIGKILL whatever is left, then wait
    /// up to `kill_wait` for the reap.
    pub async fn terminate_with_escalation(&mut self, grace: Duration, kill_wait: Duration) {
        self.terminate_group();

        let exited = self.wait_for_exit(grace).await;
        if !exited || self.group_alive() {
            tracing::warn!(
                process = %self.name,
                "Process group did not terminate after SIGTERM; issuing SIGKILL"
            );
            self.kill_group();
            #[cfg(not(unix))]
            {
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!(process = %self.name, "Kill failed: {e}");
                }
            }
            if !self.wait_for_exit(kill_wait).await {
                tracing::error!(process = %self.name, "Process not reaped after SIGKILL");
            }
        }

        self.abort_readers();
    }

    fn signal_group(&self, signal: GroupSignal) {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let Some(pgid) = self.pgid else {
                return;
            };
            let sig = match signal {
                GroupSignal::Terminate => Signal::SIGTERM,
                GroupSignal::Kill => Signal::SIGKILL,
            };
            match killpg(Pid::from_raw(pgid), sig) {
                Ok(()) => tracing::debug!(process = %self.name, pgid, signal = %sig, "Signalled process group"),
                // The group is already gone.
                Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(process = %self.name, pgid, "Failed to signal process group: {e}"),
            }
        }
        #[cfg(not(unix))]
        {
            // Without process groups only the leader can be killed, which
            // needs `&mut Child`; callers holding one do that directly.
            let _ = signal;
        }
    }

    fn abort_readers(&mut self) {
        for handle in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        // An unreaped leader means the group may still be running.
        if matches!(self.child.try_wait(), Ok(None)) {
            tracing::debug!(process = %self.name, "Dropped while running; killing process group");
            self.kill_group();
        }
        self.abort_readers();
    }
}

fn drain<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut reader| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf).await;
            buf
        })
    })
}

async fn join_pipe(handle: &mut Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(h) = handle.as_mut() else {
        return String::new();
    };
    let bytes = h.await.unwrap_or_default();
    *handle = None;
    String::from_utf8_lossy(&bytes).to_string()
}
