//! `config` subcommand: show resolved configuration.
//!
//! Prints the resolved [`WorkerConfig`] either as JSON (`--json`) or as a
//! human-readable key=value table.

use crate::cli::ConfigArgs;
use crate::config::{WorkerConfig, resolve_config};
use std::path::PathBuf;

/// Run the `config` subcommand.
///
/// # Errors
///
/// Returns an error if config resolution fails (e.g., unreadable TOML file or
/// home directory cannot be determined).
pub async fn run(config_path: &Option<PathBuf>, args: ConfigArgs) -> anyhow::Result<()> {
    let cfg: WorkerConfig = resolve_config(config_path.as_deref())?;

    if args.json {
        let json = serde_json::to_string_pretty(&cfg)?;
        println!("{json}");
    } else {
        print!("{}", render_table(&cfg));
    }
    Ok(())
}

fn render_table(cfg: &WorkerConfig) -> String {
    let unset = "<unset>";
    let mut out = String::from("appraisal-worker configuration:\n");
    row(&mut out, "executable", &cfg.executable);
    row(&mut out, "interpreter", cfg.interpreter.as_deref().unwrap_or(unset));
    row(&mut out, "module", cfg.module.as_deref().unwrap_or(unset));
    row(&mut out, "args", &cfg.args.join(" "));
    let working_dir = cfg
        .working_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| unset.to_string());
    row(&mut out, "working_dir", &working_dir);
    row(&mut out, "startup_timeout_ms", &cfg.startup_timeout_ms.to_string());
    row(&mut out, "command_timeout_secs", &cfg.command_timeout_secs.to_string());
    row(&mut out, "shutdown_timeout_ms", &cfg.shutdown_timeout_ms.to_string());
    row(&mut out, "ready_marker", cfg.ready_marker.as_deref().unwrap_or(unset));

    if cfg.env.is_empty() {
        row(&mut out, "env", "(none)");
    } else {
        out.push_str("  env:\n");
        let mut keys: Vec<&String> = cfg.env.keys().collect();
        keys.sort();
        for key in keys {
            out.push_str(&format!("    {key} = {}\n", cfg.env[key]));
        }
    }
    out
}

fn row(out: &mut String, key: &str, value: &str) {
    out.push_str(&format!("  {key:<22}= {value}\n"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lists_defaults() {
        let table = render_table(&WorkerConfig::default());
        assert!(table.contains("executable            = report-automation"));
        assert!(table.contains("interpreter           = <unset>"));
        assert!(table.contains("command_timeout_secs  = 300"));
        assert!(table.contains("env                   = (none)"));
    }

    #[test]
    fn test_table_sorts_env() {
        let mut cfg = WorkerConfig::default();
        cfg.env.insert("ZED".to_string(), "1".to_string());
        cfg.env.insert("ALPHA".to_string(), "2".to_string());
        let table = render_table(&cfg);
        let alpha = table.find("ALPHA = 2").unwrap();
        let zed = table.find("ZED = 1").unwrap();
        assert!(alpha < zed);
    }
}
