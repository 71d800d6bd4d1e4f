//! Canonical home directory resolution.
//!
//! Every crate that stores configuration or logs under the user's home goes
//! through [`get_home_dir`], so tests and custom deployments can redirect all
//! of them with a single `APPRAISAL_HOME` variable.
//!
//! # Precedence
//!
//! 1. `APPRAISAL_HOME` environment variable (if set and non-blank)
//! 2. `dirs::home_dir()` platform default

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the home directory for appraisal tooling.
///
/// # Errors
///
/// Returns an error if `APPRAISAL_HOME` is unset and the platform home
/// directory cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("APPRAISAL_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

/// Directory holding appraisal configuration and event logs
/// (`<home>/.config/appraisal`).
///
/// # Errors
///
/// Propagates [`get_home_dir`] failures.
pub fn config_dir() -> Result<PathBuf> {
    Ok(get_home_dir()?.join(".config").join("appraisal"))
}
