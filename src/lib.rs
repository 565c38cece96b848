//! Drive one interactive child process from async test code.
//!
//! A [`ProcessController`] spawns a child with piped standard streams,
//! writes input lines to it, waits for `[runmon]`-tagged output lines within
//! a deadline, and stops it with an `exit` command while draining every
//! line it still writes.
//!
//! ```rust,ignore
//! let mut runmon = ProcessController::default();
//! runmon.spawn("python3", ["-m", "runmon", "tests/input"])?;
//!
//! assert!(runmon.expect("started", Duration::from_secs(5)).await?);
//! runmon.send_line("reload").await?;
//! assert!(runmon.expect("restarting", Duration::from_secs(5)).await?);
//!
//! runmon.stop().await?;
//! assert_eq!(runmon.exit_code()?, 0);
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod script;
pub mod signal;
pub mod stream;

pub use config::ControllerConfig;
pub use controller::{
    ControllerState, ProcessController, ShutdownPhase, normalize_exit_code, raw_exit_code,
};
pub use error::{HarnessError, Result};
pub use matcher::ExpectPattern;
pub use registry::{
    GlobalPidRegistry, LocalPidRegistry, PidRegistry, install_interrupt_cleanup, kill_registered,
};
pub use stream::{LineStreamReader, ReadHandle, StreamKind};
