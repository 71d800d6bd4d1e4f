//! Configuration types for appraisal-worker.
//!
//! [`WorkerConfig`] is deserialized from `worker.toml`. Every field has a
//! default, so an empty or absent file yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn default_executable() -> String {
    "report-automation".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    10_000
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_shutdown_timeout_ms() -> u64 {
    3_000
}

/// Worker launch and supervision settings.
///
/// # Example `worker.toml`
///
/// ```toml
/// interpreter = "python3"
/// module = "report_automation"
/// working_dir = "/opt/appraisal/worker"
/// startup_timeout_ms = 15000
///
/// [env]
/// PYTHONUNBUFFERED = "1"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker executable, or a directory containing it (default:
    /// `"report-automation"` from `PATH`). Ignored when `interpreter` is set.
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Interpreter to launch instead of a self-contained executable.
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Module passed to the interpreter as `-m <module>`.
    #[serde(default)]
    pub module: Option<String>,

    /// Extra arguments appended to the command line.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the worker process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for the worker process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Startup readiness bound in milliseconds (default: 10000).
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Per-command response deadline in seconds (default: 300, `0` disables).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Bound on graceful shutdown before the worker is killed (default: 3000).
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Stdout text that signals readiness. When unset, a successful spawn is
    /// treated as ready.
    #[serde(default)]
    pub ready_marker: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            interpreter: None,
            module: None,
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            startup_timeout_ms: default_startup_timeout_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            ready_marker: None,
        }
    }
}

impl WorkerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Default command deadline; `None` when disabled.
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
