//! CLI argument types for appraisal-worker.
//!
//! Defines the top-level [`Cli`] struct and all subcommand [`Args`] using
//! clap's derive macros. Each subcommand maps to a module in
//! [`crate::commands`].

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Drive the report-automation worker over line-delimited JSON
#[derive(Parser, Debug)]
#[command(name = "appraisal-worker", version, about)]
pub struct Cli {
    /// Path to worker.toml (default: ~/.config/appraisal/worker.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a worker and relay JSON commands read from stdin
    Run(RunArgs),
    /// Show resolved configuration
    Config(ConfigArgs),
}

/// Arguments for the `run` subcommand
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Worker executable or directory (overrides config/env)
    #[arg(long)]
    pub executable: Option<String>,

    /// Startup readiness bound in milliseconds
    #[arg(long = "startup-timeout-ms")]
    pub startup_timeout_ms: Option<u64>,

    /// Per-command timeout in seconds (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print progress events for this report/task key (repeatable)
    #[arg(long = "watch", value_name = "KEY")]
    pub watch: Vec<String>,
}

/// Arguments for the `config` subcommand
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
