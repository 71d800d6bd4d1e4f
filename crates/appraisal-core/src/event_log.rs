//! Structured JSONL event logging shared by appraisal binaries.
//!
//! Each call to [`emit_event_best_effort`] appends one compact JSON object to
//! the event file. The first line of every file is a schema header mapping
//! the short keys to their long names. Files rotate by size.

use crate::home::config_dir;
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_MAX_FILES: u32 = 5;
const DEFAULT_TRUNC_CHARS: usize = 200;

/// How much free-form message text is copied into events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageVerbosity {
    None,
    Truncated,
    Full,
}

impl MessageVerbosity {
    fn from_env() -> Self {
        match std::env::var("APPRAISAL_LOG_MSG")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "full" => Self::Full,
            "truncated" => Self::Truncated,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventLogConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: u32,
    pub message_verbosity: MessageVerbosity,
    pub truncate_chars: usize,
}

impl EventLogConfig {
    pub fn from_env() -> Self {
        let path = std::env::var("APPRAISAL_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir()
                    .map(|dir| dir.join("events.jsonl"))
                    .unwrap_or_else(|_| PathBuf::from("events.jsonl"))
            });
        let max_bytes = env_positive("APPRAISAL_LOG_MAX_BYTES").unwrap_or(DEFAULT_MAX_BYTES);
        let max_files = env_positive("APPRAISAL_LOG_MAX_FILES").unwrap_or(DEFAULT_MAX_FILES);
        let truncate_chars =
            env_positive("APPRAISAL_LOG_TRUNC_CHARS").unwrap_or(DEFAULT_TRUNC_CHARS);

        Self {
            path,
            max_bytes,
            max_files,
            message_verbosity: MessageVerbosity::from_env(),
            truncate_chars,
        }
    }
}

fn env_positive<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
}

/// Fields of a single structured event. Empty `level`, `source` or `action`
/// suppresses the event entirely.
#[derive(Clone, Debug, Default)]
pub struct EventFields {
    pub level: &'static str,
    pub source: &'static str,
    pub action: &'static str,
    pub session_id: Option<String>,
    pub command_id: Option<u64>,
    pub target: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub count: Option<u64>,
    pub message_text: Option<String>,
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn maybe_message_field(cfg: &EventLogConfig, text: Option<&str>) -> Option<String> {
    let txt = text?;
    match cfg.message_verbosity {
        MessageVerbosity::None => None,
        MessageVerbosity::Truncated => Some(truncate_chars(txt, cfg.truncate_chars)),
        MessageVerbosity::Full => Some(txt.to_string()),
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn rotated_path(path: &Path, idx: u32) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.display(), idx))
}

fn rotate_if_needed(path: &Path, max_bytes: u64, max_files: u32) -> std::io::Result<()> {
    if !path.exists() || fs::metadata(path)?.len() < max_bytes {
        return Ok(());
    }

    for idx in (1..max_files).rev() {
        let src = rotated_path(path, idx);
        if src.exists() {
            let _ = fs::rename(&src, rotated_path(path, idx + 1));
        }
    }
    let _ = fs::rename(path, rotated_path(path, 1));
    Ok(())
}

fn schema_header_line() -> String {
    json!({
        "v": 1,
        "k": "h",
        "ts": Utc::now().to_rfc3339(),
        "m": {
            "v": "schema_version",
            "k": "record_kind",
            "ts": "timestamp",
            "lv": "level",
            "src": "source",
            "act": "action",
            "sid": "session_id",
            "cid": "command_id",
            "target": "target",
            "res": "result",
            "cnt": "count",
            "err": "error",
            "msg": "message_text"
        }
    })
    .to_string()
}

fn write_header_if_empty(path: &Path) -> std::io::Result<()> {
    let should_write = !path.exists() || fs::metadata(path)?.len() == 0;
    if !should_write {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(schema_header_line().as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()
}

fn event_line(cfg: &EventLogConfig, fields: EventFields) -> String {
    let mut obj = Map::new();
    obj.insert("v".to_string(), Value::from(1));
    obj.insert("k".to_string(), Value::from("e"));
    obj.insert("ts".to_string(), Value::from(Utc::now().to_rfc3339()));
    obj.insert("lv".to_string(), Value::from(fields.level));
    obj.insert("src".to_string(), Value::from(fields.source));
    obj.insert("act".to_string(), Value::from(fields.action));
    obj.insert(
        "sid".to_string(),
        Value::from(fields.session_id.unwrap_or_else(|| "unknown".to_string())),
    );
    if let Some(v) = fields.command_id {
        obj.insert("cid".to_string(), Value::from(v));
    }
    if let Some(v) = fields.target {
        obj.insert("target".to_string(), Value::from(v));
    }
    if let Some(v) = fields.result {
        obj.insert("res".to_string(), Value::from(v));
    }
    if let Some(v) = fields.count {
        obj.insert("cnt".to_string(), Value::from(v));
    }
    if let Some(v) = fields.error {
        obj.insert("err".to_string(), Value::from(v));
    }
    if let Some(v) = maybe_message_field(cfg, fields.message_text.as_deref()) {
        obj.insert("msg".to_string(), Value::from(v));
    }
    Value::Object(obj).to_string()
}

/// Emit a single structured event to the shared sink.
///
/// Fail-open: any I/O error is swallowed.
pub fn emit_event_best_effort(fields: EventFields) {
    if fields.level.is_empty() || fields.source.is_empty() || fields.action.is_empty() {
        return;
    }

    let cfg = EventLogConfig::from_env();

    let _ = (|| -> std::io::Result<()> {
        ensure_parent(&cfg.path)?;
        rotate_if_needed(&cfg.path, cfg.max_bytes, cfg.max_files)?;
        write_header_if_empty(&cfg.path)?;

        let line = event_line(&cfg, fields);
        let mut file = OpenOptions::new().create(true).append(true).open(&cfg.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    })();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::{NamedTempFile, TempDir};

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    #[serial]
    fn test_emit_event_writes_header_and_event() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("events.jsonl");
        unsafe {
            std::env::set_var("APPRAISAL_LOG_FILE", &log_path);
            std::env::set_var("APPRAISAL_LOG_MSG", "none");
        }

        emit_event_best_effort(EventFields {
            level: "info",
            source: "appraisal-worker",
            action: "worker_spawn",
            session_id: Some("sess-123".to_string()),
            command_id: Some(7),
            result: Some("ok".to_string()),
            message_text: Some("hidden".to_string()),
            ..Default::default()
        });

        let lines = read_lines(&log_path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["k"], "h");
        assert_eq!(lines[1]["k"], "e");
        assert_eq!(lines[1]["sid"], "sess-123");
        assert_eq!(lines[1]["act"], "worker_spawn");
        assert_eq!(lines[1]["cid"], 7);
        assert!(lines[1].get("msg").is_none());
        unsafe {
            std::env::remove_var("APPRAISAL_LOG_FILE");
            std::env::remove_var("APPRAISAL_LOG_MSG");
        }
    }

    #[test]
    #[serial]
    fn test_missing_required_fields_suppresses_event() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("events.jsonl");
        unsafe {
            std::env::set_var("APPRAISAL_LOG_FILE", &log_path);
        }
        emit_event_best_effort(EventFields {
            level: "info",
            source: "appraisal-worker",
            ..Default::default()
        });
        assert!(!log_path.exists());
        unsafe {
            std::env::remove_var("APPRAISAL_LOG_FILE");
        }
    }

    #[test]
    #[serial]
    fn test_rotate_if_needed_renames_file() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("events.jsonl");
        fs::write(&log_path, b"1234567890").unwrap();
        fs::write(rotated_path(&log_path, 1), b"older").unwrap();
        rotate_if_needed(&log_path, 5, 5).unwrap();
        assert!(!log_path.exists());
        assert_eq!(fs::read(rotated_path(&log_path, 1)).unwrap(), b"1234567890");
        assert_eq!(fs::read(rotated_path(&log_path, 2)).unwrap(), b"older");
    }

    #[test]
    #[serial]
    fn test_message_verbosity_truncated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("trunc.jsonl");
        unsafe {
            std::env::set_var("APPRAISAL_LOG_FILE", &path);
            std::env::set_var("APPRAISAL_LOG_MSG", "truncated");
            std::env::set_var("APPRAISAL_LOG_TRUNC_CHARS", "4");
        }
        emit_event_best_effort(EventFields {
            level: "warn",
            source: "appraisal-worker",
            action: "worker_stderr",
            message_text: Some("abcdef".to_string()),
            ..Default::default()
        });
        let lines = read_lines(&path);
        assert_eq!(lines[1]["msg"], "abcd");
        assert_eq!(lines[1]["sid"], "unknown");
        unsafe {
            std::env::remove_var("APPRAISAL_LOG_FILE");
            std::env::remove_var("APPRAISAL_LOG_MSG");
            std::env::remove_var("APPRAISAL_LOG_TRUNC_CHARS");
        }
    }

    #[test]
    #[serial]
    fn test_fail_open_when_path_unwritable() {
        let file = NamedTempFile::new().unwrap();
        unsafe {
            std::env::set_var("APPRAISAL_LOG_FILE", file.path().join("nested.jsonl"));
        }
        emit_event_best_effort(EventFields {
            level: "info",
            source: "appraisal-worker",
            action: "worker_spawn",
            ..Default::default()
        });
        unsafe {
            std::env::remove_var("APPRAISAL_LOG_FILE");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_uses_appraisal_home() {
        let tmp = TempDir::new().unwrap();
        unsafe {
            std::env::remove_var("APPRAISAL_LOG_FILE");
            std::env::set_var("APPRAISAL_HOME", tmp.path());
        }
        let cfg = EventLogConfig::from_env();
        assert_eq!(
            cfg.path,
            tmp.path().join(".config/appraisal").join("events.jsonl")
        );
        assert_eq!(cfg.max_bytes, DEFAULT_MAX_BYTES);
        assert_eq!(cfg.max_files, DEFAULT_MAX_FILES);
        unsafe {
            std::env::remove_var("APPRAISAL_HOME");
        }
    }
}
