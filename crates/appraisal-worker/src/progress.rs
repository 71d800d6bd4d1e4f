//! Routing of out-of-band progress events to per-task subscribers.
//!
//! Subscriptions are keyed by logical task key (usually a report id). Some
//! task families tag their events with a namespaced process id such as
//! `delete-report-42`; the namespace prefix is stripped so the event reaches
//! the subscriber registered under `42`.
//!
//! At most one subscriber exists per key (last registration wins) and the hub
//! never expires subscriptions: callers must unregister.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::ProgressEvent;

/// Process-id prefixes that map onto a logical report key.
pub const NAMESPACE_PREFIXES: &[&str] = &["delete-report-", "delete-incomplete-assets-"];

/// Normalized progress payload handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub key: String,
    pub completed: f64,
    pub total: f64,
    pub percentage: f64,
    pub message: String,
    pub paused: bool,
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ProgressUpdate {
    /// Normalize a raw event for delivery under `key`.
    ///
    /// `total` defaults to 1 and `completed` to 0; a missing `percentage` is
    /// derived from the two; a missing `message` becomes `"completed/total"`.
    pub fn from_event(key: String, event: &ProgressEvent) -> Self {
        let completed = event.completed.unwrap_or(0.0);
        let total = event.total.unwrap_or(1.0);
        let percentage = event.percentage.unwrap_or_else(|| {
            if total > 0.0 {
                ((completed / total) * 10_000.0).round() / 100.0
            } else {
                0.0
            }
        });
        let message = match event.message.as_deref() {
            Some(m) if !m.trim().is_empty() => m.to_string(),
            _ => format!("{completed}/{total}"),
        };
        Self {
            key,
            completed,
            total,
            percentage,
            message,
            paused: event.paused.unwrap_or(false),
            stopped: event.stopped.unwrap_or(false),
            process_type: event.process_type.clone(),
            timestamp: event.timestamp.clone(),
        }
    }
}

/// Subscriber callback. Invoked on the stdout reader task, outside any lock.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Compute the routing key for an event.
///
/// A namespaced `processId` is stripped to its logical key; otherwise
/// `reportId` is used, then the raw `processId`.
pub fn routing_key(event: &ProgressEvent) -> Option<String> {
    if let Some(pid) = event.process_id.as_deref() {
        for prefix in NAMESPACE_PREFIXES {
            if let Some(rest) = pid.strip_prefix(prefix) {
                if !rest.is_empty() {
                    return Some(rest.to_string());
                }
            }
        }
    }
    event
        .report_id
        .clone()
        .or_else(|| event.process_id.clone())
}

/// Registry of progress subscribers.
#[derive(Default)]
pub struct ProgressHub {
    subscribers: HashMap<String, ProgressCallback>,
}

impl fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.subscribers.keys().collect();
        keys.sort();
        f.debug_struct("ProgressHub").field("keys", &keys).finish()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `key`, replacing any previous subscriber.
    pub fn register(&mut self, key: impl Into<String>, callback: ProgressCallback) {
        let key = key.into();
        if self.subscribers.insert(key.clone(), callback).is_some() {
            tracing::debug!(%key, "replaced progress subscriber");
        }
    }

    /// Register a channel-backed subscriber and return its receiving end.
    ///
    /// The channel closes when the key is unregistered or replaced.
    pub fn subscribe(&mut self, key: impl Into<String>) -> mpsc::UnboundedReceiver<ProgressUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(
            key,
            Arc::new(move |update| {
                let _ = tx.send(update);
            }),
        );
        rx
    }

    /// Remove the subscriber for `key`. Returns whether one existed.
    pub fn unregister(&mut self, key: &str) -> bool {
        self.subscribers.remove(key).is_some()
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.subscribers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Resolve the subscriber and normalized payload for an event without
    /// invoking it, so the caller can release its lock before the callback
    /// runs.
    pub fn route(&self, event: &ProgressEvent) -> Option<(ProgressCallback, ProgressUpdate)> {
        let Some(key) = routing_key(event) else {
            tracing::debug!("dropping progress event without report or process id");
            return None;
        };
        let Some(callback) = self.subscribers.get(&key) else {
            tracing::debug!(%key, "no progress subscriber; dropping event");
            return None;
        };
        Some((Arc::clone(callback), ProgressUpdate::from_event(key, event)))
    }

    /// Route and deliver an event. Returns whether a subscriber received it.
    pub fn dispatch(&self, event: &ProgressEvent) -> bool {
        match self.route(event) {
            Some((callback, update)) => {
                callback(update);
                true
            }
            None => false,
        }
    }
}
