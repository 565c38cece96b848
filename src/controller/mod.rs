//! Interactive child-process controller.
//!
//! Spawns one child through a shell with all three standard streams piped,
//! feeds it input lines, waits for tagged output lines on either output
//! stream, and shuts it down without losing output.
//!
//! ## Lifecycle
//!
//! ```text
//! IDLE       → spawn()          → ACTIVE
//! ACTIVE     → stop() completes → TERMINATED   (exit status final, pid deregistered)
//! ```
//!
//! A controller is single-use: it never respawns after termination.

mod shutdown;

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::error::{HarnessError, Result};
use crate::matcher::ExpectPattern;
use crate::registry::{GlobalPidRegistry, PidRegistry};
use crate::signal;
use crate::stream::{LineStreamReader, StreamKind};

pub use shutdown::ShutdownPhase;

/// Where a controller is in its single-use lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Nothing spawned yet.
    Idle,
    /// Child running (or exited but not yet stopped).
    Active,
    /// `stop()` completed; the exit status is final.
    Terminated,
}

/// Drives one interactive child process.
pub struct ProcessController {
    config: ControllerConfig,
    registry: Arc<dyn PidRegistry>,
    state: ControllerState,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: LineStreamReader,
    stderr: LineStreamReader,
    pid: Option<u32>,
    expected_signal: Option<i32>,
    raw_exit: Option<i32>,
}

impl fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessController")
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("expected_signal", &self.expected_signal)
            .field("raw_exit", &self.raw_exit)
            .finish_non_exhaustive()
    }
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

/// Exit status as a single integer: the exit code, or `-signal` when the
/// child was killed by a signal.
pub fn raw_exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return -sig;
        }
    }
    status.code().unwrap_or(-1)
}

/// Roughly thirty years, for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// Termination by the signal the caller sent on purpose counts as success.
pub fn normalize_exit_code(raw: i32, expected_signal: Option<i32>) -> i32 {
    match expected_signal {
        Some(sig) if raw < 0 && raw.checked_neg() == Some(sig) => 0,
        _ => raw,
    }
}

impl ProcessController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(GlobalPidRegistry),
            state: ControllerState::Idle,
            child: None,
            stdin: None,
            stdout: LineStreamReader::detached(StreamKind::Stdout),
            stderr: LineStreamReader::detached(StreamKind::Stderr),
            pid: None,
            expected_signal: None,
            raw_exit: None,
        }
    }

    /// Report pids to `registry` instead of the process-wide table.
    pub fn with_registry(mut self, registry: Arc<dyn PidRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Start `program args...` as one shell command line.
    ///
    /// Arguments are joined with single spaces and not quoted, so shell
    /// syntax passes through unchanged.
    pub fn spawn<I, S>(&mut self, program: &str, args: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        let mut parts = vec![program.to_string()];
        parts.extend(args.into_iter().map(|arg| arg.to_string()));
        self.spawn_command_line(&parts.join(" "))
    }

    /// Start a prepared shell command line. Must run inside a tokio runtime.
    pub fn spawn_command_line(&mut self, line: &str) -> Result<&mut Self> {
        if self.state != ControllerState::Idle {
            return Err(HarnessError::InvalidState("controller already spawned a process"));
        }

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(line)
            .env_clear()
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.work_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| HarnessError::Spawn {
            command: line.to_string(),
            source: Arc::new(e),
        })?;

        self.stdin = child.stdin.take();
        if let Some(out) = child.stdout.take() {
            self.stdout = LineStreamReader::attached(StreamKind::Stdout, out);
        }
        if let Some(err) = child.stderr.take() {
            self.stderr = LineStreamReader::attached(StreamKind::Stderr, err);
        }

        self.pid = child.id();
        if let Some(pid) = self.pid {
            self.registry.add(pid);
        }
        debug!(command = %line, pid = ?self.pid, shell = %self.config.shell, "spawned child");

        self.child = Some(child);
        self.state = ControllerState::Active;
        Ok(self)
    }

    /// Write `text` plus a newline to the child's stdin and flush it.
    /// No-op without a child.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(());
        };
        debug!(line = %text, "stdin");

        let data = format!("{text}\n");
        stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| HarnessError::io("stdin", e))?;
        stdin
            .flush()
            .await
            .map_err(|e| HarnessError::io("stdin", e))
    }

    /// Deliver `sig` to the child and treat termination by it as success.
    ///
    /// The signal is recorded even without a child, but not once the exit
    /// status is final. A child that is already gone is not an error.
    pub fn send_signal(&mut self, sig: i32) -> Result<()> {
        if self.state == ControllerState::Terminated {
            debug!(signal = sig, "child already terminated, signal ignored");
            return Ok(());
        }
        self.expected_signal = Some(sig);
        let Some(pid) = self.child.as_ref().and_then(Child::id) else {
            return Ok(());
        };

        debug!(pid, signal = sig, "signalling child");
        match signal::send(pid, sig) {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(pid, "child already gone");
                Ok(())
            }
            Err(e) => Err(HarnessError::Signal {
                signal: sig,
                pid,
                source: Arc::new(e),
            }),
        }
    }

    pub async fn read_stdout_line(&self) -> Result<String> {
        self.stdout.read_line().await
    }

    pub async fn read_stderr_line(&self) -> Result<String> {
        self.stderr.read_line().await
    }

    /// Wait up to `timeout` for a tagged line matching `pattern` on either
    /// stream.
    ///
    /// Returns `Ok(false)` when the deadline passes first. Lines that do not
    /// match are still captured. Fails with `InvalidState` before `spawn`.
    pub async fn expect(&self, pattern: &str, timeout: Duration) -> Result<bool> {
        if self.state == ControllerState::Idle {
            return Err(HarnessError::InvalidState("the process is not started"));
        }

        let pattern = ExpectPattern::with_tag(&self.config.tag, pattern)?;
        let deadline = deadline_after(timeout);

        let mut stdout_read = self.stdout.read();
        let mut stderr_read = self.stderr.read();
        let mut stdout_open = self.stdout.is_attached();
        let mut stderr_open = self.stderr.is_attached();

        loop {
            if Instant::now() >= deadline {
                break;
            }
            if !stdout_open && !stderr_open {
                tokio::time::sleep_until(deadline).await;
                break;
            }

            let raced = tokio::time::timeout_at(deadline, async {
                tokio::select! {
                    line = &mut stdout_read, if stdout_open => (StreamKind::Stdout, line),
                    line = &mut stderr_read, if stderr_open => (StreamKind::Stderr, line),
                }
            })
            .await;
            let Ok((kind, line)) = raced else {
                break;
            };

            let Some(line) = line? else {
                debug!(stream = %kind, "stream closed while expecting");
                match kind {
                    StreamKind::Stdout => stdout_open = false,
                    StreamKind::Stderr => stderr_open = false,
                }
                continue;
            };

            if pattern.is_match(&line) {
                info!(stream = %kind, line = %line, "matched");
                return Ok(true);
            }

            match kind {
                StreamKind::Stdout => stdout_read = self.stdout.read(),
                StreamKind::Stderr => stderr_read = self.stderr.read(),
            }
        }

        debug!(pattern = %pattern.as_str(), ?timeout, "expectation timed out");
        Ok(false)
    }

    /// [`expect`](Self::expect) with the configured default timeout.
    pub async fn expect_default(&self, pattern: &str) -> Result<bool> {
        self.expect(pattern, self.config.default_expect_timeout()).await
    }

    /// Ask the child to exit, drain its output until it does, then collect
    /// whatever is left. Second calls are no-ops.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            ControllerState::Idle => Err(HarnessError::InvalidState("stop called before spawn")),
            ControllerState::Terminated => Ok(()),
            ControllerState::Active => shutdown::ShutdownSequencer::new(self).run().await,
        }
    }

    /// Normalized exit status. Only valid once `stop()` has completed.
    pub fn exit_code(&self) -> Result<i32> {
        self.raw_exit
            .map(|raw| normalize_exit_code(raw, self.expected_signal))
            .ok_or(HarnessError::InvalidState("the process has not terminated"))
    }

    /// Exit status as observed, before signal normalization.
    pub fn raw_exit_code(&self) -> Option<i32> {
        self.raw_exit
    }

    pub fn expected_signal(&self) -> Option<i32> {
        self.expected_signal
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Everything the child has written to stdout so far.
    pub fn stdout(&self) -> String {
        self.stdout.captured()
    }

    /// Everything the child has written to stderr so far.
    pub fn stderr(&self) -> String {
        self.stderr.captured()
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        if self.state == ControllerState::Active {
            if let Some(pid) = self.pid {
                debug!(pid, "dropped before stop; deregistering, child killed on drop");
                self.registry.remove(pid);
            }
        }
    }
}
