//! Classification of framed worker output lines.
//!
//! The worker interleaves free-form log text with protocol messages on the
//! same stdout stream. [`classify`] decides which is which and never fails:
//! anything that is not a recognizable protocol message becomes an
//! [`Inbound::Diagnostic`].

use serde_json::Value;

use crate::protocol::{COMMAND_ID_FIELD, PROGRESS_EVENT_TYPE, ProgressEvent, Response};

/// Why a line was routed to the diagnostic sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Plain log text (does not start with `{` or `[`).
    Log,
    /// Looked structured but failed to parse; carries the parse error.
    Malformed(String),
    /// Valid JSON with neither a progress marker nor a command id.
    Unrecognized,
}

/// A classified inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Progress(ProgressEvent),
    Response(Response),
    Diagnostic { kind: DiagnosticKind, line: String },
}

/// Classify one framed line.
pub fn classify(line: &str) -> Inbound {
    let trimmed = line.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return diagnostic(DiagnosticKind::Log, trimmed);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => return diagnostic(DiagnosticKind::Malformed(e.to_string()), trimmed),
    };

    let Value::Object(ref obj) = value else {
        return diagnostic(DiagnosticKind::Unrecognized, trimmed);
    };

    if obj.get("type").and_then(Value::as_str) == Some(PROGRESS_EVENT_TYPE) {
        return match serde_json::from_value::<ProgressEvent>(value) {
            Ok(event) => Inbound::Progress(event),
            Err(e) => diagnostic(DiagnosticKind::Malformed(e.to_string()), trimmed),
        };
    }

    if obj.get(COMMAND_ID_FIELD).and_then(Value::as_u64).is_none() {
        return diagnostic(DiagnosticKind::Unrecognized, trimmed);
    }
    match serde_json::from_value::<Response>(value) {
        Ok(response) => Inbound::Response(response),
        Err(e) => diagnostic(DiagnosticKind::Malformed(e.to_string()), trimmed),
    }
}

fn diagnostic(kind: DiagnosticKind, line: &str) -> Inbound {
    Inbound::Diagnostic {
        kind,
        line: line.to_string(),
    }
}
