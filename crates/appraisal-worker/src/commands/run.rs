//! `run` subcommand: relay JSON commands to a supervised worker.
//!
//! Reads one JSON object per stdin line (`{"action": "...", ...fields}`),
//! sends each as a command without waiting for earlier ones, and writes every
//! outcome as a JSON line to stdout. Progress for `--watch` keys is written to
//! the same stream. On stdin EOF the remaining commands are awaited and the
//! worker is closed.

use crate::cli::RunArgs;
use crate::config::{WorkerConfig, resolve_config};
use crate::framing::write_line;
use crate::progress::ProgressUpdate;
use crate::protocol::{ACTION_FIELD, Action, COMMAND_ID_FIELD, PROGRESS_EVENT_TYPE};
use crate::session::WorkerSession;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// A progress update as written to stdout, tagged so it can be told apart
/// from command outcomes.
#[derive(Debug, Serialize)]
struct ProgressLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    update: &'a ProgressUpdate,
}

impl<'a> ProgressLine<'a> {
    fn new(update: &'a ProgressUpdate) -> Self {
        Self {
            kind: PROGRESS_EVENT_TYPE,
            update,
        }
    }
}

/// Run the `run` subcommand.
///
/// # Errors
///
/// Returns an error if configuration resolution fails or stdin/stdout I/O
/// fails. Worker and command failures are reported on stdout instead.
pub async fn run(config_path: &Option<PathBuf>, args: RunArgs) -> anyhow::Result<()> {
    let mut config = resolve_config(config_path.as_deref())?;
    apply_cli_overrides(&mut config, &args);

    let session = WorkerSession::from_config(config);
    tracing::info!(session_id = %session.session_id(), "starting worker session");

    let (out_tx, mut out_rx) = mpsc::channel::<Value>(OUTPUT_CHANNEL_CAPACITY);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = write_line(&mut stdout, &msg.to_string()).await {
                tracing::error!(error = %e, "failed to write to stdout");
                break;
            }
        }
    });

    let mut watchers = JoinSet::new();
    for key in &args.watch {
        let mut rx = session.subscribe_progress(key.clone());
        let tx = out_tx.clone();
        watchers.spawn(async move {
            while let Some(update) = rx.recv().await {
                let line = match serde_json::to_value(ProgressLine::new(&update)) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, key = %update.key, "failed to encode progress");
                        continue;
                    }
                };
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }

    if let Err(e) = session.start().await {
        tracing::warn!(error = %e, "worker failed to start; commands will retry");
    }

    let mut commands = JoinSet::new();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (action, params) = match parse_request(&line) {
            Ok(parsed) => parsed,
            Err(reason) => {
                let _ = out_tx.send(json!({ "error": reason })).await;
                continue;
            }
        };
        let session = session.clone();
        let tx = out_tx.clone();
        commands.spawn(async move {
            let msg = match session.send_command(action.clone(), params).await {
                Ok(response) => response.to_value(),
                Err(e) => json!({ ACTION_FIELD: action.as_str(), "error": e.to_string() }),
            };
            let _ = tx.send(msg).await;
        });
    }

    while commands.join_next().await.is_some() {}
    session.close().await;

    for key in &args.watch {
        session.unregister_progress(key);
    }
    while watchers.join_next().await.is_some() {}
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Apply `run` flags on top of the resolved configuration.
fn apply_cli_overrides(config: &mut WorkerConfig, args: &RunArgs) {
    if let Some(ref executable) = args.executable {
        config.executable = executable.clone();
        config.interpreter = None;
    }
    if let Some(ms) = args.startup_timeout_ms {
        config.startup_timeout_ms = ms;
    }
    if let Some(secs) = args.timeout {
        config.command_timeout_secs = secs;
    }
}

/// Split a stdin line into the action and the remaining fields.
fn parse_request(line: &str) -> Result<(Action, Value), String> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON request: {e}"))?;
    let Value::Object(mut obj) = value else {
        return Err("request must be a JSON object".to_string());
    };
    let action = match obj.remove(ACTION_FIELD) {
        Some(Value::String(action)) if !action.is_empty() => Action::from(action),
        _ => return Err(format!("request is missing a string `{ACTION_FIELD}` field")),
    };
    obj.remove(COMMAND_ID_FIELD);
    Ok((action, Value::Object(obj)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            executable: None,
            startup_timeout_ms: None,
            timeout: None,
            watch: Vec::new(),
        }
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut cfg = WorkerConfig {
            interpreter: Some("python3".to_string()),
            ..Default::default()
        };
        let run_args = RunArgs {
            executable: Some("/opt/worker".to_string()),
            startup_timeout_ms: Some(250),
            timeout: Some(0),
            ..args()
        };
        apply_cli_overrides(&mut cfg, &run_args);
        assert_eq!(cfg.executable, "/opt/worker");
        assert!(cfg.interpreter.is_none());
        assert_eq!(cfg.startup_timeout_ms, 250);
        assert!(cfg.command_timeout().is_none());
    }

    #[test]
    fn test_no_flags_keep_config() {
        let mut cfg = WorkerConfig::default();
        apply_cli_overrides(&mut cfg, &args());
        assert_eq!(cfg, WorkerConfig::default());
    }

    #[test]
    fn test_parse_request_splits_action() {
        let (action, params) =
            parse_request(r#"{"action":"deleteReport","reportId":"42","commandId":9}"#).unwrap();
        assert_eq!(action.as_str(), "deleteReport");
        assert_eq!(params, json!({"reportId": "42"}));

        let (action, _) = parse_request(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(action, Action::Ping);
    }

    #[test]
    fn test_parse_request_rejects_bad_input() {
        assert!(parse_request("not json").is_err());
        assert!(parse_request("[1]").is_err());
        assert!(parse_request(r#"{"reportId":"42"}"#).is_err());
        assert!(parse_request(r#"{"action":7}"#).is_err());
    }

    #[test]
    fn test_progress_line_shape() {
        let update = ProgressUpdate {
            key: "42".to_string(),
            completed: 1.0,
            total: 4.0,
            percentage: 25.0,
            message: "1/4".to_string(),
            paused: false,
            stopped: false,
            process_type: Some("delete-report".to_string()),
            timestamp: Some("2024-05-01T10:00:00Z".to_string()),
        };
        let v = serde_json::to_value(ProgressLine::new(&update)).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["key"], "42");
        assert_eq!(v["percentage"], 25.0);
        assert_eq!(v["processType"], "delete-report");
        assert_eq!(v["timestamp"], "2024-05-01T10:00:00Z");
        assert_eq!(v["paused"], false);
    }
}
