//! Error taxonomy for the harness.
//!
//! Timeouts are not errors: `expect` reports a missed deadline as `false`.
//! Operations on a controller without an attached process are no-ops where
//! that makes sense, and `InvalidState` where they cannot proceed.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::stream::StreamKind;

/// Errors surfaced by the controller and its collaborators.
///
/// `Clone` because a single read result is handed to every caller attached
/// to the same in-flight read.
#[derive(Debug, Clone, Error)]
pub enum HarnessError {
    /// Operation requires a different lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The child could not be started.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading, writing or waiting on the child failed.
    #[error("i/o error on {stream}: {source}")]
    Io {
        stream: &'static str,
        #[source]
        source: Arc<io::Error>,
    },

    /// The caller's expectation pattern is not a valid regex.
    #[error("invalid expectation pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Signal delivery failed for a reason other than the child being gone.
    #[error("failed to deliver signal {signal} to pid {pid}: {source}")]
    Signal {
        signal: i32,
        pid: u32,
        #[source]
        source: Arc<io::Error>,
    },

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl HarnessError {
    pub(crate) fn io(stream: &'static str, source: io::Error) -> Self {
        Self::Io {
            stream,
            source: Arc::new(source),
        }
    }

    pub(crate) fn stream_io(kind: StreamKind, source: io::Error) -> Self {
        Self::io(kind.as_str(), source)
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
