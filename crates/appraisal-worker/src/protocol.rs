//! Wire types for the worker's line-delimited JSON protocol.
//!
//! Outbound, one line per command:
//!
//! ```text
//! {"action":"ping","commandId":0}
//! ```
//!
//! Inbound, either a command response correlated by `commandId`:
//!
//! ```text
//! {"commandId":0,"status":"SUCCESS", ...result fields}
//! ```
//!
//! or an out-of-band progress event keyed by report/process id:
//!
//! ```text
//! {"type":"progress","processId":"delete-report-42","completed":3,"total":10}
//! ```

use std::fmt;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

/// Field carrying the correlation id on both commands and responses.
pub const COMMAND_ID_FIELD: &str = "commandId";

/// Field carrying the action name on outbound commands.
pub const ACTION_FIELD: &str = "action";

/// Value of the `type` field that marks a progress event.
pub const PROGRESS_EVENT_TYPE: &str = "progress";

/// Action requested from the worker.
///
/// Only the actions the supervisor itself issues have dedicated variants;
/// everything else travels verbatim through [`Action::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Liveness round-trip.
    Ping,
    /// Graceful shutdown request sent by `close()`.
    Shutdown,
    /// Any caller-defined action.
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Shutdown => "shutdown",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        match name {
            "ping" => Self::Ping,
            "shutdown" => Self::Shutdown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        match name.as_str() {
            "ping" => Self::Ping,
            "shutdown" => Self::Shutdown,
            _ => Self::Other(name),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialize a command as a single JSON line (without the trailing newline).
///
/// `action` and `commandId` always win over same-named entries in `params`.
pub fn encode_command(id: u64, action: &Action, params: &Map<String, Value>) -> String {
    let mut obj = params.clone();
    obj.insert(ACTION_FIELD.to_string(), Value::from(action.as_str()));
    obj.insert(COMMAND_ID_FIELD.to_string(), Value::from(id));
    Value::Object(obj).to_string()
}

/// Status reported by the worker for a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Success,
    OtpRequired,
    LoginSuccess,
    NotLoggedIn,
    MacrosExist,
    NotFound,
    Cancelled,
    Error,
    /// Any status string the supervisor does not know; treated as failure.
    Unknown(String),
}

impl ResponseStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SUCCESS" => Self::Success,
            "OTP_REQUIRED" => Self::OtpRequired,
            "LOGIN_SUCCESS" => Self::LoginSuccess,
            "NOT_LOGGED_IN" => Self::NotLoggedIn,
            "MACROS_EXIST" => Self::MacrosExist,
            "NOT_FOUND" => Self::NotFound,
            "CANCELLED" => Self::Cancelled,
            "ERROR" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "SUCCESS",
            Self::OtpRequired => "OTP_REQUIRED",
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::NotLoggedIn => "NOT_LOGGED_IN",
            Self::MacrosExist => "MACROS_EXIST",
            Self::NotFound => "NOT_FOUND",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether the status resolves the command successfully.
    ///
    /// The non-`SUCCESS` members carry task-specific meaning the supervisor
    /// does not interpret; callers inspect [`Response::status`].
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::OtpRequired
                | Self::LoginSuccess
                | Self::NotLoggedIn
                | Self::MacrosExist
                | Self::NotFound
                | Self::Cancelled
        )
    }
}

impl Default for ResponseStatus {
    /// A response without a `status` field.
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ResponseStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Non-string statuses become [`ResponseStatus::Unknown`] holding their JSON
/// text, so the command is still settled (as a failure).
impl<'de> Deserialize<'de> for ResponseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(raw) => Self::parse(&raw),
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// A command response received from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub command_id: u64,
    /// A missing `status` deserializes as `Unknown("")` and is not written
    /// back out.
    #[serde(default, skip_serializing_if = "ResponseStatus::is_missing")]
    pub status: ResponseStatus,
    #[serde(
        default,
        deserialize_with = "text_or_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,
    /// Every other field of the response object.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ResponseStatus {
    fn is_missing(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl Response {
    /// The worker-supplied failure text, or a generic message naming the status.
    pub fn failure_message(&self) -> String {
        match self.error.as_deref() {
            Some(msg) if !msg.trim().is_empty() => msg.to_string(),
            _ if self.status.is_missing() => "worker reported no status".to_string(),
            _ => format!("worker reported status {}", self.status),
        }
    }

    /// Look up a result field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Reassemble the response as the JSON object the worker sent.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(self.payload.clone()))
    }
}

/// A raw progress event as sent by the worker.
///
/// All fields are optional on the wire. Id fields accept strings or numbers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressEvent {
    #[serde(deserialize_with = "string_or_number")]
    pub report_id: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub process_id: Option<String>,
    pub completed: Option<f64>,
    pub total: Option<f64>,
    pub percentage: Option<f64>,
    pub message: Option<String>,
    pub paused: Option<bool>,
    pub stopped: Option<bool>,
    pub process_type: Option<String>,
    pub timestamp: Option<String>,
}

/// `"42"` and `42` both become `Some("42")`; empty strings and other JSON
/// types become `None`.
fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(Number),
        Other(IgnoredAny),
    }

    Ok(match Option::<RawId>::deserialize(deserializer)? {
        Some(RawId::Text(text)) if !text.is_empty() => Some(text),
        Some(RawId::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Keeps string errors verbatim and renders any other non-null value as JSON.
fn text_or_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn response(v: Value) -> Response {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn encode_command_appends_action_and_id() {
        let params = object(json!({"reportId": "r-1", "commandId": 99, "action": "spoofed"}));
        let line = encode_command(4, &Action::from("upload-report"), &params);
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["action"], "upload-report");
        assert_eq!(parsed["commandId"], 4);
        assert_eq!(parsed["reportId"], "r-1");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn encode_command_escapes_embedded_newlines() {
        let params = object(json!({"note": "line one\nline two"}));
        let line = encode_command(0, &Action::Ping, &params);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn action_round_trips_known_names() {
        assert_eq!(Action::from("ping"), Action::Ping);
        assert_eq!(Action::from("shutdown".to_string()), Action::Shutdown);
        assert_eq!(
            Action::from("scrape-listings"),
            Action::Other("scrape-listings".to_string())
        );
        assert_eq!(Action::Other("x".into()).to_string(), "x");
    }

    #[test]
    fn accepted_statuses() {
        for raw in [
            "SUCCESS",
            "OTP_REQUIRED",
            "LOGIN_SUCCESS",
            "NOT_LOGGED_IN",
            "MACROS_EXIST",
            "NOT_FOUND",
            "CANCELLED",
        ] {
            let status = ResponseStatus::parse(raw);
            assert!(status.is_accepted(), "{raw} should be accepted");
            assert_eq!(status.as_str(), raw);
        }
        assert!(!ResponseStatus::parse("ERROR").is_accepted());
        assert!(!ResponseStatus::parse("FAILED").is_accepted());
        assert_eq!(
            ResponseStatus::parse("FAILED"),
            ResponseStatus::Unknown("FAILED".to_string())
        );
    }

    #[test]
    fn response_from_object_splits_known_fields() {
        let resp = response(json!({"commandId": 3, "status": "SUCCESS", "rows": [1, 2]}));
        assert_eq!(resp.command_id, 3);
        assert_eq!(resp.status, ResponseStatus::Success);
        assert!(resp.error.is_none());
        assert_eq!(resp.get("rows"), Some(&json!([1, 2])));
        assert!(resp.get("status").is_none());
    }

    #[test]
    fn response_to_value_matches_wire_object() {
        let wire = json!({"commandId": 0, "status": "SUCCESS"});
        let resp = response(wire.clone());
        assert_eq!(resp.to_value(), wire);
    }

    #[test]
    fn failure_message_prefers_worker_text() {
        let resp = response(json!({"commandId": 1, "status": "ERROR", "error": "session expired"}));
        assert_eq!(resp.failure_message(), "session expired");

        let resp = response(json!({"commandId": 1, "status": "BROKEN"}));
        assert_eq!(resp.failure_message(), "worker reported status BROKEN");

        let resp = response(json!({"commandId": 1}));
        assert_eq!(resp.failure_message(), "worker reported no status");
        assert_eq!(resp.to_value(), json!({"commandId": 1}));
    }

    #[test]
    fn progress_event_accepts_numeric_ids() {
        let event: ProgressEvent = serde_json::from_value(json!({
            "type": "progress",
            "reportId": 42,
            "completed": 3,
            "total": 10,
            "paused": true,
            "processType": "upload"
        }))
        .unwrap();
        assert_eq!(event.report_id.as_deref(), Some("42"));
        assert_eq!(event.completed, Some(3.0));
        assert_eq!(event.total, Some(10.0));
        assert_eq!(event.paused, Some(true));
        assert_eq!(event.process_type.as_deref(), Some("upload"));
        assert!(event.process_id.is_none());
    }

    #[test]
    fn non_string_status_and_error_are_kept_as_text() {
        let resp = response(json!({"commandId": 2, "status": 7, "error": {"code": 5}}));
        assert_eq!(resp.status, ResponseStatus::Unknown("7".to_string()));
        assert_eq!(resp.error.as_deref(), Some(r#"{"code":5}"#));
        assert!(resp.payload.is_empty());
    }

    #[test]
    fn progress_event_ignores_unusable_ids_and_keeps_timestamp() {
        let event: ProgressEvent = serde_json::from_value(json!({
            "type": "progress",
            "reportId": "",
            "processId": true,
            "timestamp": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert!(event.report_id.is_none());
        assert!(event.process_id.is_none());
        assert_eq!(event.timestamp.as_deref(), Some("2024-05-01T10:00:00Z"));
    }
}
