//! Config resolution for appraisal-worker.
//!
//! Resolves [`WorkerConfig`] from multiple sources with the following priority
//! (highest to lowest):
//!
//! 1. CLI flags (applied by the caller after [`resolve_config`] returns)
//! 2. Environment variables (`APPRAISAL_WORKER_*`)
//! 3. TOML file: an explicit `--config` path, else
//!    `<home>/.config/appraisal/worker.toml` when it exists
//! 4. Compiled-in defaults (via [`WorkerConfig::default`])

use super::types::WorkerConfig;
use anyhow::Context;
use appraisal_core::home::config_dir;
use std::path::{Path, PathBuf};

/// Location of the per-user worker config file.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("worker.toml"))
}

/// Resolve the complete worker configuration.
///
/// # Arguments
///
/// * `config_path` – Optional explicit path to a TOML file. It must exist.
///   When `None` the default per-user file is used if present.
///
/// # Errors
///
/// Returns an error if an explicit `config_path` cannot be read, if either
/// file fails to parse, or if the home directory cannot be determined while
/// looking for the default file.
pub fn resolve_config(config_path: Option<&Path>) -> anyhow::Result<WorkerConfig> {
    let mut cfg = match config_path {
        Some(path) => load_file(path)?,
        None => {
            let path = default_config_path()?;
            if path.is_file() {
                load_file(&path)?
            } else {
                WorkerConfig::default()
            }
        }
    };

    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn load_file(path: &Path) -> anyhow::Result<WorkerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg: WorkerConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded worker config");
    Ok(cfg)
}

/// Apply `APPRAISAL_WORKER_*` environment variable overrides to `cfg`.
///
/// Empty string values are treated as "not set"; numeric values that fail to
/// parse are ignored.
fn apply_env_overrides(cfg: &mut WorkerConfig) {
    if let Some(v) = non_empty_env("APPRAISAL_WORKER_EXECUTABLE") {
        cfg.executable = v;
    }
    if let Some(v) = non_empty_env("APPRAISAL_WORKER_INTERPRETER") {
        cfg.interpreter = Some(v);
    }
    if let Some(v) = non_empty_env("APPRAISAL_WORKER_MODULE") {
        cfg.module = Some(v);
    }
    if let Some(v) = non_empty_env("APPRAISAL_WORKER_WORKING_DIR") {
        cfg.working_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = non_empty_env("APPRAISAL_WORKER_READY_MARKER") {
        cfg.ready_marker = Some(v);
    }
    if let Some(ms) = numeric_env("APPRAISAL_WORKER_STARTUP_TIMEOUT_MS") {
        cfg.startup_timeout_ms = ms;
    }
    if let Some(secs) = numeric_env("APPRAISAL_WORKER_COMMAND_TIMEOUT_SECS") {
        cfg.command_timeout_secs = secs;
    }
    if let Some(ms) = numeric_env("APPRAISAL_WORKER_SHUTDOWN_TIMEOUT_MS") {
        cfg.shutdown_timeout_ms = ms;
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn numeric_env(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(%key, value = %raw, "ignoring non-numeric environment override");
            None
        }
    }
}
