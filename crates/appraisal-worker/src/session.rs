//! Public facade over a supervised worker.
//!
//! A [`WorkerSession`] is an explicit value: create as many as needed, each
//! owns at most one worker process. Cloning a session is cheap and yields
//! another handle to the same worker.
//!
//! ```no_run
//! # async fn demo() -> Result<(), appraisal_worker::error::WorkerError> {
//! use appraisal_worker::config::WorkerConfig;
//! use appraisal_worker::session::WorkerSession;
//! use serde_json::json;
//!
//! let session = WorkerSession::from_config(WorkerConfig::default());
//! let mut progress = session.subscribe_progress("42");
//! let response = session
//!     .send_command("deleteReport", json!({"reportId": "42"}))
//!     .await?;
//! println!("{}", response.status);
//! while let Ok(update) = progress.try_recv() {
//!     println!("{}%", update.percentage);
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::locator::{ConfiguredLocator, ExecutableLocator};
use crate::pending::CommandOutcome;
use crate::progress::{ProgressCallback, ProgressUpdate};
use crate::protocol::Action;
use crate::supervisor::Supervisor;

pub use crate::supervisor::ReadinessState;

/// Handle to one supervised worker process.
#[derive(Debug, Clone)]
pub struct WorkerSession {
    inner: Arc<Supervisor>,
}

impl WorkerSession {
    /// Session that launches whatever `locator` resolves.
    pub fn new(config: WorkerConfig, locator: Arc<dyn ExecutableLocator>) -> Self {
        Self {
            inner: Arc::new(Supervisor::new(config, locator)),
        }
    }

    /// Session whose launch descriptor comes from the config itself.
    pub fn from_config(config: WorkerConfig) -> Self {
        let locator = Arc::new(ConfiguredLocator::new(config.clone()));
        Self::new(config, locator)
    }

    pub fn session_id(&self) -> &str {
        self.inner.session_id()
    }

    pub fn config(&self) -> &WorkerConfig {
        self.inner.config()
    }

    /// Start the worker if it is not already running. Idempotent; concurrent
    /// callers share one spawn.
    pub async fn start(&self) -> Result<(), WorkerError> {
        self.inner.start().await
    }

    /// Send a command using the configured default deadline.
    ///
    /// `params` must be a JSON object (or `null`); its `action` and
    /// `commandId` keys are overwritten. The worker is started on demand.
    pub async fn send_command(&self, action: impl Into<Action>, params: Value) -> CommandOutcome {
        let deadline = self.inner.config().command_timeout();
        self.dispatch(action.into(), params, deadline).await
    }

    /// Like [`send_command`](Self::send_command) with an explicit deadline;
    /// `None` waits indefinitely.
    pub async fn send_command_with_timeout(
        &self,
        action: impl Into<Action>,
        params: Value,
        deadline: Option<Duration>,
    ) -> CommandOutcome {
        self.dispatch(action.into(), params, deadline).await
    }

    /// Round-trip a `ping` command.
    pub async fn ping(&self) -> Result<(), WorkerError> {
        self.send_command(Action::Ping, Value::Null).await.map(|_| ())
    }

    async fn dispatch(
        &self,
        action: Action,
        params: Value,
        deadline: Option<Duration>,
    ) -> CommandOutcome {
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                tracing::warn!(%action, "command params are not an object; sending as `params`");
                let mut map = Map::new();
                map.insert("params".to_string(), other);
                map
            }
        };
        self.inner.start().await?;
        self.inner.submit(action, &params, deadline).await
    }

    /// Register `callback` for progress events keyed by `key`. Replaces any
    /// earlier subscriber for the same key.
    pub fn register_progress<F>(&self, key: impl Into<String>, callback: F)
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        let callback: ProgressCallback = Arc::new(callback);
        self.inner
            .with_progress(|hub| hub.register(key, callback));
    }

    /// Subscribe to progress for `key` through a channel.
    pub fn subscribe_progress(
        &self,
        key: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<ProgressUpdate> {
        self.inner.with_progress(|hub| hub.subscribe(key))
    }

    /// Remove the subscriber for `key`. Returns whether one existed.
    pub fn unregister_progress(&self, key: &str) -> bool {
        self.inner.with_progress(|hub| hub.unregister(key))
    }

    /// Shut the worker down (graceful `shutdown`, then kill).
    pub async fn close(&self) {
        self.inner.close().await;
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    pub fn state(&self) -> ReadinessState {
        self.inner.state()
    }

    /// Number of commands awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }

    /// OS process id of the current worker, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }
}
