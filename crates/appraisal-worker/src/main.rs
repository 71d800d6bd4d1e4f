//! appraisal-worker: drive the report-automation worker from the terminal.
//!
//! # Subcommands
//!
//! - `run`   : Start a worker session and relay JSON commands from stdin
//! - `config`: Show resolved configuration

use appraisal_core::logging;
use clap::Parser;

use appraisal_worker::cli::{Cli, Commands};
use appraisal_worker::commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(&cli.config, args).await,
        Commands::Config(args) => commands::config_cmd::run(&cli.config, args).await,
    }
}
