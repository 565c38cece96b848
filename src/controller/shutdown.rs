//! Shutdown sequencing.
//!
//! ## State machine
//!
//! ```text
//! REQUESTING → exit command sent             → DRAINING
//! DRAINING   → child exit observed           → FINALIZING
//! FINALIZING → in-flight reads settled,
//!              remaining output collected,
//!              pid deregistered              → DONE
//! ```
//!
//! While draining, process exit races one read per output stream. A stream
//! read that wins is consumed and replaced by a fresh read on that stream;
//! the other pending operations carry over untouched. A step timeout only
//! re-arms the race: the child exiting is the one way out of `Draining`.

use std::io;
use std::process::ExitStatus;

use tracing::{debug, warn};

use super::{ControllerState, ProcessController, raw_exit_code};
use crate::error::{HarnessError, Result};

/// Phases of [`ProcessController::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Requesting,
    Draining,
    Finalizing,
    Done,
}

pub(super) struct ShutdownSequencer<'a> {
    ctl: &'a mut ProcessController,
    phase: ShutdownPhase,
    status: Option<ExitStatus>,
}

impl<'a> ShutdownSequencer<'a> {
    pub(super) fn new(ctl: &'a mut ProcessController) -> Self {
        Self {
            ctl,
            phase: ShutdownPhase::Requesting,
            status: None,
        }
    }

    pub(super) async fn run(mut self) -> Result<()> {
        loop {
            let next = match self.phase {
                ShutdownPhase::Requesting => {
                    self.request_exit().await?;
                    ShutdownPhase::Draining
                }
                ShutdownPhase::Draining => {
                    self.status = Some(self.drain_until_exit().await?);
                    ShutdownPhase::Finalizing
                }
                ShutdownPhase::Finalizing => {
                    self.finalize().await?;
                    ShutdownPhase::Done
                }
                ShutdownPhase::Done => return Ok(()),
            };
            debug!(from = ?self.phase, to = ?next, pid = ?self.ctl.pid, "shutdown transition");
            self.phase = next;
        }
    }

    async fn request_exit(&mut self) -> Result<()> {
        let command = self.ctl.config.exit_command.clone();
        match self.ctl.send_line(&command).await {
            Err(HarnessError::Io { source, .. }) if source.kind() == io::ErrorKind::BrokenPipe => {
                debug!("stdin already closed, child is exiting on its own");
                Ok(())
            }
            other => other,
        }
    }

    async fn drain_until_exit(&mut self) -> Result<ExitStatus> {
        let step = self.ctl.config.stop_step_timeout();
        let ProcessController {
            child,
            stdout,
            stderr,
            ..
        } = &mut *self.ctl;
        let child = child
            .as_mut()
            .ok_or(HarnessError::InvalidState("no child to stop"))?;

        let exited = child.wait();
        tokio::pin!(exited);

        let mut stdout_read = stdout.read();
        let mut stderr_read = stderr.read();
        let mut stdout_open = true;
        let mut stderr_open = true;

        loop {
            tokio::select! {
                status = &mut exited => {
                    return status.map_err(|e| HarnessError::io("child", e));
                }
                line = &mut stdout_read, if stdout_open => match line? {
                    Some(_) => stdout_read = stdout.read(),
                    None => stdout_open = false,
                },
                line = &mut stderr_read, if stderr_open => match line? {
                    Some(_) => stderr_read = stderr.read(),
                    None => stderr_open = false,
                },
                () = tokio::time::sleep(step) => {
                    warn!(?step, "child has not exited yet, still draining");
                }
            }
        }
    }

    async fn finalize(&mut self) -> Result<()> {
        let status = self
            .status
            .ok_or(HarnessError::InvalidState("finalizing before exit was observed"))?;

        // Both pipes are serviced together: a grandchild holding them open
        // can block on one while we wait on the other.
        let (stdout, stderr) = (&self.ctl.stdout, &self.ctl.stderr);
        tokio::try_join!(stdout.settle(), stderr.settle())?;
        let (out, err) = tokio::try_join!(stdout.drain_to_end(), stderr.drain_to_end())?;
        debug!(
            stdout_bytes = out.len(),
            stderr_bytes = err.len(),
            "collected remaining output"
        );

        self.ctl.stdin = None;
        self.ctl.child = None;
        if let Some(pid) = self.ctl.pid {
            self.ctl.registry.remove(pid);
        }
        self.ctl.raw_exit = Some(raw_exit_code(status));
        self.ctl.state = ControllerState::Terminated;
        debug!(raw_exit = ?self.ctl.raw_exit, "child terminated");
        Ok(())
    }
}
