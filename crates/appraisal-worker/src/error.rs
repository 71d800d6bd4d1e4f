//! Error taxonomy for worker supervision.
//!
//! Process-level failures ([`WorkerError::SpawnFailed`],
//! [`WorkerError::ExitedWithPendingCommands`]) are broadcast to every pending
//! command; command-level failures are scoped to the one command they name.
//! Malformed worker output never becomes an error; it is logged and skipped.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// How the worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitStatusInfo {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, when killed by one (unix only).
    pub signal: Option<i32>,
}

impl ExitStatusInfo {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitStatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Errors surfaced to callers of [`crate::session::WorkerSession`].
///
/// `Clone` so a single start outcome can be handed to every caller that was
/// waiting on the same in-flight start.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The executable was missing or invalid, the spawn syscall failed, or the
    /// process died before it became ready.
    #[error("failed to start worker {path}: {reason}")]
    SpawnFailed { path: String, reason: String },

    /// The executable locator could not produce a launch descriptor.
    #[error("could not locate worker executable: {0}")]
    Locate(String),

    /// Writing the command line to the worker's stdin failed.
    #[error("failed to write command {id} to worker: {reason}")]
    WriteFailed { id: u64, reason: String },

    /// The worker answered with a status outside the accepted set.
    #[error("command {id} failed ({status}): {message}")]
    CommandFailed {
        id: u64,
        status: String,
        message: String,
    },

    /// The worker terminated while the command was still pending.
    #[error("worker process terminated ({exit}) while command {id} was pending")]
    ExitedWithPendingCommands { id: u64, exit: ExitStatusInfo },

    /// No response arrived within the per-command deadline.
    #[error("command {id} timed out after {timeout:?}")]
    CommandTimeout { id: u64, timeout: Duration },

    /// The session was closed before the operation could complete.
    #[error("worker session closed")]
    Closed,
}

impl WorkerError {
    /// Returns `true` for errors caused by the worker process going away.
    pub fn is_process_failure(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed { .. } | Self::ExitedWithPendingCommands { .. } | Self::Closed
        )
    }
}
