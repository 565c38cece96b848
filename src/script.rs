//! Ordered interaction steps for driving a controller from the command line.
//!
//! Steps are written as `kind:argument`:
//!
//! - `expect:<pattern>` wait for a tagged line matching `<pattern>`
//! - `send:<text>` write one input line
//! - `signal:<number|name>` deliver a signal (`TERM`, `INT`, `KILL` or a number)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::controller::ProcessController;
use crate::error::Result;
use crate::signal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Expect(String),
    Send(String),
    Signal(i32),
}

fn parse_signal(raw: &str) -> Option<i32> {
    let upper = raw.trim().to_ascii_uppercase();
    let name = upper.strip_prefix("SIG").unwrap_or(&upper);
    match name {
        "TERM" => Some(signal::SIGTERM),
        "INT" => Some(signal::SIGINT),
        "KILL" => Some(signal::SIGKILL),
        _ => name.parse().ok().filter(|n| *n > 0),
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, arg) = s
            .split_once(':')
            .ok_or_else(|| format!("step '{s}' must look like kind:argument"))?;
        match kind {
            "expect" if !arg.is_empty() => Ok(Step::Expect(arg.to_string())),
            "expect" => Err("expect step needs a pattern".to_string()),
            "send" => Ok(Step::Send(arg.to_string())),
            "signal" => parse_signal(arg)
                .map(Step::Signal)
                .ok_or_else(|| format!("unknown signal '{arg}'")),
            other => Err(format!(
                "unknown step kind '{other}' (expected expect, send or signal)"
            )),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Expect(pattern) => write!(f, "expect:{pattern}"),
            Step::Send(text) => write!(f, "send:{text}"),
            Step::Signal(sig) => write!(f, "signal:{sig}"),
        }
    }
}

/// How far a script got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// Steps that ran to completion.
    pub completed: usize,
    /// The expectation that timed out, if any. Later steps were skipped.
    pub failed: Option<Step>,
}

impl ScriptOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed.is_none()
    }
}

/// Run `steps` in order, stopping at the first expectation that times out.
pub async fn run_steps(
    ctl: &mut ProcessController,
    steps: &[Step],
    timeout: Duration,
) -> Result<ScriptOutcome> {
    for (index, step) in steps.iter().enumerate() {
        info!(step = %step, "running step");
        match step {
            Step::Expect(pattern) => {
                if !ctl.expect(pattern, timeout).await? {
                    warn!(step = %step, ?timeout, "expectation not met");
                    return Ok(ScriptOutcome {
                        completed: index,
                        failed: Some(step.clone()),
                    });
                }
            }
            Step::Send(text) => ctl.send_line(text).await?,
            Step::Signal(sig) => ctl.send_signal(*sig)?,
        }
    }

    Ok(ScriptOutcome {
        completed: steps.len(),
        failed: None,
    })
}
