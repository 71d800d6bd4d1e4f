//! Scriptable stand-in for the report-automation worker.
//!
//! Reads newline-delimited JSON commands from stdin and answers on stdout with
//! `{"commandId": <id>, "status": ...}` lines. Exits 0 on stdin EOF.
//!
//! # Actions
//!
//! - `ping`: `SUCCESS` with `"pong": true`
//! - `echo`: `SUCCESS` with every request field under `"echo"`
//! - `status`: replies with the status named by the `reply` field
//! - `fail`: `ERROR` with `error` set to the `message` field
//! - `progress`: emits `steps` progress events tagged with `processId` /
//!   `reportId`, then `SUCCESS`
//! - `noise`: writes log text, a malformed line and an unrelated JSON object,
//!   then `SUCCESS`
//! - `split`: writes its response in two flushed halves
//! - `delay`: replies after `ms` milliseconds on a separate thread, so later
//!   commands can overtake it
//! - `silent`: never replies
//! - `pid`: `SUCCESS` with this process id
//! - `crash`: exits immediately with `code` (default 42)
//! - `shutdown`: `SUCCESS`, then exits 0
//!
//! # Environment
//!
//! - `ECHO_WORKER_STARTUP_DELAY_MS`: sleep before reading commands
//! - `ECHO_WORKER_READY_MARKER`: line printed once startup completes
//! - `ECHO_WORKER_EXIT_AT_START`: exit with this code during startup
//! - `ECHO_WORKER_SPAWN_LOG`: append this process id to the file at startup

use serde_json::{Map, Value, json};
use std::io::{BufRead, BufReader, Write};
use std::thread;
use std::time::Duration;

fn main() {
    startup();

    let stdin = std::io::stdin();
    let reader = BufReader::new(stdin.lock());
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let msg: Map<String, Value> = match serde_json::from_str(&line) {
            Ok(Value::Object(obj)) => obj,
            _ => {
                eprintln!("echo-worker: ignoring unparsable input: {line}");
                continue;
            }
        };
        handle_message(msg);
    }
}

fn startup() {
    if let Ok(path) = std::env::var("ECHO_WORKER_SPAWN_LOG") {
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            let _ = writeln!(file, "{}", std::process::id());
        }
    }
    if let Some(ms) = env_u64("ECHO_WORKER_STARTUP_DELAY_MS") {
        thread::sleep(Duration::from_millis(ms));
    }
    if let Some(code) = env_u64("ECHO_WORKER_EXIT_AT_START") {
        eprintln!("echo-worker: exiting during startup");
        std::process::exit(code as i32);
    }
    eprintln!("echo-worker: started");
    if let Ok(marker) = std::env::var("ECHO_WORKER_READY_MARKER") {
        write_raw(&format!("{marker}\n"));
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn handle_message(msg: Map<String, Value>) {
    let id = msg.get("commandId").cloned().unwrap_or(Value::Null);
    let action = msg
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match action.as_str() {
        "ping" => reply(&id, "SUCCESS", json!({"pong": true})),
        "echo" => {
            let mut fields = msg.clone();
            fields.remove("action");
            fields.remove("commandId");
            reply(&id, "SUCCESS", json!({"echo": fields}));
        }
        "status" => {
            let status = msg
                .get("reply")
                .and_then(Value::as_str)
                .unwrap_or("SUCCESS");
            reply(&id, status, json!({}));
        }
        "fail" => {
            let message = msg
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("requested failure");
            reply(&id, "ERROR", json!({"error": message}));
        }
        "progress" => {
            let steps = msg.get("steps").and_then(Value::as_u64).unwrap_or(3);
            for done in 1..=steps {
                let mut event = json!({
                    "type": "progress",
                    "completed": done,
                    "total": steps,
                    "processType": "delete-report",
                });
                for field in ["processId", "reportId"] {
                    if let Some(v) = msg.get(field) {
                        event[field] = v.clone();
                    }
                }
                write_msg(&event);
            }
            reply(&id, "SUCCESS", json!({"steps": steps}));
        }
        "noise" => {
            write_raw("Launching browser session...\n");
            write_raw("{\"commandId\": \n");
            write_raw("   \n");
            write_msg(&json!({"hello": "world"}));
            write_raw("[1, 2, 3]\n");
            reply(&id, "SUCCESS", json!({}));
        }
        "split" => {
            let mut body = json!({"commandId": id, "status": "SUCCESS", "text": "réassemblé"});
            body["padding"] = json!("x".repeat(64));
            let line = format!("{body}\n");
            let bytes = line.as_bytes();
            let mid = bytes.len() / 2;
            write_bytes(&bytes[..mid]);
            thread::sleep(Duration::from_millis(50));
            write_bytes(&bytes[mid..]);
        }
        "delay" => {
            let ms = msg.get("ms").and_then(Value::as_u64).unwrap_or(100);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(ms));
                reply(&id, "SUCCESS", json!({"ms": ms}));
            });
        }
        "silent" => {}
        "pid" => reply(&id, "SUCCESS", json!({"pid": std::process::id()})),
        "crash" => {
            let code = msg.get("code").and_then(Value::as_i64).unwrap_or(42);
            eprintln!("echo-worker: crashing with code {code}");
            std::process::exit(code as i32);
        }
        "shutdown" => {
            reply(&id, "SUCCESS", json!({}));
            std::process::exit(0);
        }
        other => reply(
            &id,
            "ERROR",
            json!({"error": format!("unknown action: {other}")}),
        ),
    }
}

fn reply(id: &Value, status: &str, extra: Value) {
    let mut body = json!({"commandId": id, "status": status});
    if let (Some(obj), Value::Object(extra)) = (body.as_object_mut(), extra) {
        obj.extend(extra);
    }
    write_msg(&body);
}

fn write_msg(msg: &Value) {
    write_raw(&format!("{msg}\n"));
}

fn write_raw(text: &str) {
    write_bytes(text.as_bytes());
}

fn write_bytes(bytes: &[u8]) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = out.write_all(bytes);
    let _ = out.flush();
}
