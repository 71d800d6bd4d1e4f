//! Worker process supervision.
//!
//! [`Supervisor`] owns the single worker child of a session: it spawns it,
//! decides when it is ready, pumps its stdout/stderr, writes commands to its
//! stdin and reacts to its exit. All mutable state sits behind one
//! `std::sync::Mutex` that is never held across an `.await`.
//!
//! Every worker incarnation gets a generation number. Exit notifications carry
//! the generation of the handle they belong to, so an exit reported for a
//! handle that has already been replaced is ignored.
//!
//! Background tasks only hold a `Weak` reference to the supervisor. Dropping
//! the last session handle drops the supervisor, which kills the worker.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use appraisal_core::event_log::{EventFields, emit_event_best_effort};
use serde_json::{Map, Value};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::classify::{DiagnosticKind, Inbound, classify};
use crate::config::WorkerConfig;
use crate::error::{ExitStatusInfo, WorkerError};
use crate::framing::{read_lines, write_line};
use crate::locator::{ExecutableLocator, resolve_program_path};
use crate::pending::{CommandOutcome, CommandTable};
use crate::progress::ProgressHub;
use crate::protocol::{Action, encode_command};

const EVENT_SOURCE: &str = "appraisal-worker";

/// How long the wait task lets the output readers drain after the process
/// exits. Bounded because a grandchild can keep the pipes open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type StartOutcome = Option<Result<(), WorkerError>>;

/// Lifecycle of the session's worker as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    NotStarted,
    Starting,
    Ready,
    Exited,
}

enum Phase {
    NotStarted,
    /// A start is in flight; concurrent callers wait on this channel.
    Starting(watch::Receiver<StartOutcome>),
    Ready,
    Exited,
}

/// The live worker. Only present in `Starting` or `Ready`, and dropped as
/// soon as its exit is processed.
struct WorkerHandle {
    generation: u64,
    pid: Option<u32>,
    stdin: Arc<AsyncMutex<ChildStdin>>,
    alive: Arc<AtomicBool>,
    exit_rx: watch::Receiver<Option<ExitStatusInfo>>,
    /// Firing (or dropping) this makes the wait task kill the child.
    kill_tx: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    fn kill(&mut self) {
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }
    }
}

struct State {
    phase: Phase,
    handle: Option<WorkerHandle>,
    commands: CommandTable,
    progress: ProgressHub,
    generation: u64,
}

impl State {
    fn handle_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.alive.load(Ordering::SeqCst))
    }
}

/// Shared core behind [`crate::session::WorkerSession`].
pub struct Supervisor {
    session_id: String,
    config: WorkerConfig,
    locator: Arc<dyn ExecutableLocator>,
    state: Mutex<State>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("locator", &self.locator)
            .finish()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut handle) = st.handle.take() {
            tracing::debug!(
                session_id = %self.session_id,
                pid = ?handle.pid,
                "session dropped; killing worker"
            );
            handle.kill();
        }
    }
}

impl Supervisor {
    pub fn new(config: WorkerConfig, locator: Arc<dyn ExecutableLocator>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            config,
            locator,
            state: Mutex::new(State {
                phase: Phase::NotStarted,
                handle: None,
                commands: CommandTable::new(),
                progress: ProgressHub::new(),
                generation: 0,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn event(&self, level: &'static str, action: &'static str) -> EventFields {
        EventFields {
            level,
            source: EVENT_SOURCE,
            action,
            session_id: Some(self.session_id.clone()),
            ..Default::default()
        }
    }

    pub fn state(&self) -> ReadinessState {
        match self.lock().phase {
            Phase::NotStarted => ReadinessState::NotStarted,
            Phase::Starting(_) => ReadinessState::Starting,
            Phase::Ready => ReadinessState::Ready,
            Phase::Exited => ReadinessState::Exited,
        }
    }

    /// `Ready` and the process has not been observed to exit. No round-trip.
    pub fn is_ready(&self) -> bool {
        let st = self.lock();
        matches!(st.phase, Phase::Ready) && st.handle_alive()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().handle.as_ref().and_then(|h| h.pid)
    }

    /// Run `f` against the progress hub under the state lock.
    pub fn with_progress<R>(&self, f: impl FnOnce(&mut ProgressHub) -> R) -> R {
        f(&mut self.lock().progress)
    }

    // ─── Start ──────────────────────────────────────────────────────────────

    /// Bring the worker to `Ready`.
    ///
    /// Returns immediately when already ready. When a start is in flight,
    /// waits for that attempt instead of spawning a second worker. The launch
    /// itself runs on its own task, so dropping this future does not abandon
    /// a half-started worker.
    pub async fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        let rx = {
            let mut st = self.lock();
            if matches!(st.phase, Phase::Ready) && st.handle_alive() {
                return Ok(());
            }
            let in_flight = match &st.phase {
                Phase::Starting(rx) => Some(rx.clone()),
                _ => None,
            };
            match in_flight {
                Some(rx) => rx,
                None => {
                    self.retire_stale_handle(&mut st);
                    st.generation += 1;
                    let generation = st.generation;
                    let (tx, rx) = watch::channel(None);
                    st.phase = Phase::Starting(rx.clone());

                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let launched = this.launch(generation).await;
                        let outcome = this.finish_start(generation, launched);
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };
        wait_for_start(rx).await
    }

    /// Drop a handle whose process died before its exit was processed.
    fn retire_stale_handle(&self, st: &mut State) {
        if let Some(handle) = st.handle.take() {
            let exit = (*handle.exit_rx.borrow()).unwrap_or_default();
            let rejected = st.commands.reject_all(exit);
            tracing::debug!(
                generation = handle.generation,
                rejected,
                "retired stale worker handle"
            );
        }
    }

    /// Spawn the worker and race readiness against exit and the startup timer.
    /// Returns the program path on success.
    async fn launch(self: &Arc<Self>, generation: u64) -> Result<String, WorkerError> {
        let descriptor = self
            .locator
            .locate()
            .await
            .map_err(|e| WorkerError::Locate(format!("{e:#}")))?;
        let program = resolve_program_path(&descriptor)?;
        let path = program.display().to_string();
        let spawn_failed = |reason: String| WorkerError::SpawnFailed {
            path: path.clone(),
            reason,
        };

        let mut child = spawn_child(&program, &descriptor)
            .map_err(|e| spawn_failed(e.to_string()))?;
        let pid = child.id();
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(spawn_failed("worker stdio pipes unavailable".to_string()));
        };

        tracing::info!(
            session_id = %self.session_id,
            kind = %descriptor.kind,
            program = %path,
            pid = ?pid,
            "spawned worker"
        );
        emit_event_best_effort(EventFields {
            target: Some(path.clone()),
            count: pid.map(u64::from),
            ..self.event("info", "worker_spawn")
        });

        let alive = Arc::new(AtomicBool::new(true));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();

        self.lock().handle = Some(WorkerHandle {
            generation,
            pid,
            stdin: Arc::new(AsyncMutex::new(stdin)),
            alive: Arc::clone(&alive),
            exit_rx: exit_rx.clone(),
            kill_tx: Some(kill_tx),
        });

        // Readers are attached before the readiness race so early output is
        // never lost.
        let (marker_tx, marker_rx) = match self.config.ready_marker.clone() {
            Some(marker) => {
                let (tx, rx) = oneshot::channel();
                (Some((marker, tx)), Some(rx))
            }
            None => (None, None),
        };
        let stdout_task = tokio::spawn(pump_stdout(Arc::downgrade(self), stdout, marker_tx));
        let stderr_task = tokio::spawn(pump_stderr(self.session_id.clone(), stderr));
        tokio::spawn(wait_for_exit(
            child,
            ExitWatch {
                supervisor: Arc::downgrade(self),
                generation,
                kill_rx,
                exit_tx,
                alive: Arc::clone(&alive),
                stdout_task,
                stderr_task,
            },
        ));

        let started = async move {
            if let Some(rx) = marker_rx {
                if rx.await.is_err() {
                    // stdout closed without the marker; exit decides.
                    std::future::pending::<()>().await;
                }
            }
        };

        let startup_timeout = self.config.startup_timeout();
        tokio::select! {
            biased;
            exit = wait_exit(exit_rx) => Err(spawn_failed(format!(
                "worker exited during startup ({})",
                exit.unwrap_or_default()
            ))),
            () = started => Ok(path.clone()),
            () = tokio::time::sleep(startup_timeout) => {
                if alive.load(Ordering::SeqCst) {
                    tracing::warn!(
                        session_id = %self.session_id,
                        timeout_ms = startup_timeout.as_millis() as u64,
                        "no readiness signal before startup timeout; assuming worker is ready"
                    );
                    Ok(path.clone())
                } else {
                    Err(spawn_failed("worker exited before becoming ready".to_string()))
                }
            }
        }
    }

    fn finish_start(
        &self,
        generation: u64,
        launched: Result<String, WorkerError>,
    ) -> Result<(), WorkerError> {
        let outcome = {
            let mut st = self.lock();
            let current = st.generation == generation
                && st.handle.as_ref().is_some_and(|h| h.generation == generation);
            let outcome = match launched {
                Ok(_) if current && matches!(st.phase, Phase::Starting(_)) => {
                    st.phase = Phase::Ready;
                    Ok(())
                }
                Ok(path) => Err(WorkerError::SpawnFailed {
                    path,
                    reason: "worker exited during startup".to_string(),
                }),
                Err(e) => Err(e),
            };
            if outcome.is_err() && st.generation == generation {
                // Dropping the handle fires the kill trigger.
                if let Some(handle) = st.handle.take() {
                    let exit = current_exit(&handle.exit_rx).unwrap_or_default();
                    st.commands.reject_all(exit);
                }
                st.phase = Phase::Exited;
            }
            outcome
        };

        match &outcome {
            Ok(()) => {
                tracing::info!(session_id = %self.session_id, generation, "worker ready");
                emit_event_best_effort(self.event("info", "worker_ready"));
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "worker failed to start");
                emit_event_best_effort(EventFields {
                    error: Some(e.to_string()),
                    ..self.event("error", "worker_spawn_failed")
                });
            }
        }
        outcome
    }

    // ─── Commands ───────────────────────────────────────────────────────────

    /// Write a command to the running worker and await its outcome.
    ///
    /// Does not start the worker; returns [`WorkerError::Closed`] when there
    /// is no live handle. The deadline covers both the stdin write and the
    /// wait for the response.
    pub async fn submit(
        &self,
        action: Action,
        params: &Map<String, Value>,
        deadline: Option<Duration>,
    ) -> CommandOutcome {
        let deadline = deadline.map(|limit| (limit, Instant::now() + limit));
        let (id, mut rx, stdin) = {
            let mut st = self.lock();
            let Some(stdin) = st.handle.as_ref().map(|h| Arc::clone(&h.stdin)) else {
                return Err(WorkerError::Closed);
            };
            let (id, rx) = st.commands.insert(action.clone());
            (id, rx, stdin)
        };

        let line = encode_command(id, &action, params);
        tracing::debug!(command_id = id, %action, "sending command");
        // Detached so an expired deadline never leaves half a line on stdin.
        let write = tokio::spawn(async move {
            let mut writer = stdin.lock_owned().await;
            write_line(&mut *writer, &line).await
        });
        let written = match within(deadline, write).await {
            Ok(Ok(result)) => result.map_err(|e| e.to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(limit) => return self.expire(id, &action, limit, rx).await,
        };
        if let Err(reason) = written {
            self.lock().commands.remove(id);
            tracing::warn!(command_id = id, error = %reason, "failed to write command");
            return Err(WorkerError::WriteFailed { id, reason });
        }

        match within(deadline, &mut rx).await {
            Ok(received) => received.unwrap_or_else(|_| Err(WorkerError::Closed)),
            Err(limit) => self.expire(id, &action, limit, rx).await,
        }
    }

    /// Reject a command whose deadline passed, unless it settled meanwhile.
    async fn expire(
        &self,
        id: u64,
        action: &Action,
        limit: Duration,
        rx: oneshot::Receiver<CommandOutcome>,
    ) -> CommandOutcome {
        let removed = self.lock().commands.remove(id).is_some();
        if !removed {
            return rx.await.unwrap_or_else(|_| Err(WorkerError::Closed));
        }
        tracing::warn!(command_id = id, %action, timeout = ?limit, "command timed out");
        emit_event_best_effort(EventFields {
            command_id: Some(id),
            target: Some(action.to_string()),
            ..self.event("warn", "command_timeout")
        });
        Err(WorkerError::CommandTimeout { id, timeout: limit })
    }

    // ─── Output routing ─────────────────────────────────────────────────────

    fn route_line(&self, line: &str) {
        match classify(line) {
            Inbound::Response(response) => {
                self.lock().commands.resolve(response);
            }
            Inbound::Progress(event) => {
                let routed = self.lock().progress.route(&event);
                if let Some((callback, update)) = routed {
                    callback(update);
                }
            }
            Inbound::Diagnostic { kind, line } => match kind {
                DiagnosticKind::Log => tracing::info!(stream = "stdout", "worker: {line}"),
                DiagnosticKind::Malformed(error) => {
                    tracing::warn!(stream = "stdout", %error, "malformed worker output: {line}")
                }
                DiagnosticKind::Unrecognized => {
                    tracing::debug!(stream = "stdout", "unrecognized worker message: {line}")
                }
            },
        }
    }

    // ─── Exit & shutdown ────────────────────────────────────────────────────

    /// Process an exit of the worker with the given generation.
    ///
    /// Rejects every pending command, clears the table, marks the session
    /// `Exited` and drops the handle in one critical section. Idempotent;
    /// exits of replaced handles are ignored. During a start the phase is
    /// left to the in-flight launch, so concurrent `start` callers keep
    /// sharing its outcome.
    pub fn handle_exit(&self, generation: u64, exit: ExitStatusInfo) {
        self.record_exit(generation, exit, None);
    }

    fn record_exit(&self, generation: u64, exit: ExitStatusInfo, stderr_tail: Option<String>) {
        let rejected = {
            let mut st = self.lock();
            if st.handle.as_ref().map(|h| h.generation) != Some(generation) {
                tracing::debug!(generation, "ignoring exit of stale worker handle");
                return;
            }
            st.handle = None;
            if !matches!(st.phase, Phase::Starting(_)) {
                st.phase = Phase::Exited;
            }
            st.commands.reject_all(exit)
        };

        if rejected > 0 {
            tracing::warn!(
                session_id = %self.session_id,
                %exit,
                rejected,
                "worker exited with pending commands"
            );
        } else {
            tracing::info!(session_id = %self.session_id, %exit, "worker exited");
        }
        emit_event_best_effort(EventFields {
            result: Some(exit.to_string()),
            count: Some(rejected as u64),
            message_text: stderr_tail,
            ..self.event(if rejected > 0 { "warn" } else { "info" }, "worker_exit")
        });
    }

    /// Shut the worker down: graceful `shutdown` first, then kill.
    ///
    /// Always leaves the session `Exited` with no handle.
    pub async fn close(self: &Arc<Self>) {
        let in_flight = match &self.lock().phase {
            Phase::Starting(rx) => Some(rx.clone()),
            _ => None,
        };
        if let Some(rx) = in_flight {
            let _ = wait_for_start(rx).await;
        }

        let target = {
            let mut st = self.lock();
            let target = st
                .handle
                .as_ref()
                .map(|h| (h.generation, h.exit_rx.clone()));
            if target.is_none() {
                st.phase = Phase::Exited;
            }
            target
        };
        let Some((generation, exit_rx)) = target else {
            return;
        };

        let bound = self.config.shutdown_timeout();
        let graceful = async {
            self.submit(Action::Shutdown, &Map::new(), Some(bound)).await?;
            Ok::<_, WorkerError>(wait_exit(exit_rx.clone()).await)
        };
        let exited = match tokio::time::timeout(bound, graceful).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "graceful shutdown failed");
                current_exit(&exit_rx)
            }
            Err(_) => {
                tracing::debug!(timeout = ?bound, "graceful shutdown timed out");
                current_exit(&exit_rx)
            }
        };

        let (exit, how) = match exited {
            Some(exit) => (exit, "graceful"),
            None => {
                if let Some(handle) = self
                    .lock()
                    .handle
                    .as_mut()
                    .filter(|h| h.generation == generation)
                {
                    handle.kill();
                }
                let exit = tokio::time::timeout(bound, wait_exit(exit_rx))
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                (exit, "killed")
            }
        };

        self.handle_exit(generation, exit);
        {
            let mut st = self.lock();
            if st.generation == generation {
                st.handle = None;
                st.phase = Phase::Exited;
            }
        }

        tracing::info!(session_id = %self.session_id, %exit, how, "worker closed");
        emit_event_best_effort(EventFields {
            result: Some(how.to_string()),
            ..self.event("info", "worker_close")
        });
    }
}

fn spawn_child(
    program: &Path,
    descriptor: &crate::locator::LaunchDescriptor,
) -> std::io::Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(&descriptor.argv)
        .envs(&descriptor.env)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = descriptor.working_directory {
        cmd.current_dir(dir);
    }
    cmd.spawn()
}

async fn wait_for_start(mut rx: watch::Receiver<StartOutcome>) -> Result<(), WorkerError> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or(Err(WorkerError::Closed)),
        Err(_) => Err(WorkerError::Closed),
    }
}

fn current_exit(rx: &watch::Receiver<Option<ExitStatusInfo>>) -> Option<ExitStatusInfo> {
    *rx.borrow()
}

async fn wait_exit(mut rx: watch::Receiver<Option<ExitStatusInfo>>) -> Option<ExitStatusInfo> {
    match rx.wait_for(Option::is_some).await {
        Ok(exit) => *exit,
        Err(_) => None,
    }
}

async fn within<F: Future>(
    deadline: Option<(Duration, Instant)>,
    fut: F,
) -> Result<F::Output, Duration> {
    match deadline {
        None => Ok(fut.await),
        Some((limit, at)) => tokio::time::timeout_at(at, fut).await.map_err(|_| limit),
    }
}

async fn pump_stdout(
    supervisor: Weak<Supervisor>,
    stdout: ChildStdout,
    mut marker: Option<(String, oneshot::Sender<()>)>,
) {
    let result = read_lines(stdout, |line| {
        if marker
            .as_ref()
            .is_some_and(|(text, _)| line.contains(text.as_str()))
        {
            if let Some((_, tx)) = marker.take() {
                tracing::debug!("worker readiness marker seen");
                let _ = tx.send(());
            }
        }
        if let Some(supervisor) = supervisor.upgrade() {
            supervisor.route_line(&line);
        }
    })
    .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, "worker stdout read failed");
    }
    tracing::debug!("worker stdout reader exited");
}

/// Logs worker stderr and returns its last non-blank line.
async fn pump_stderr(session_id: String, stderr: ChildStderr) -> Option<String> {
    let mut last = None;
    let result = read_lines(stderr, |line| {
        tracing::info!(%session_id, stream = "stderr", "worker: {line}");
        if !line.trim().is_empty() {
            last = Some(line);
        }
    })
    .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, "worker stderr read failed");
    }
    last
}

/// State the wait task carries alongside the child.
struct ExitWatch {
    supervisor: Weak<Supervisor>,
    generation: u64,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitStatusInfo>>,
    alive: Arc<AtomicBool>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<Option<String>>,
}

/// Owns the child: waits for it to exit (or kills it on request), lets the
/// output readers drain, then hands the exit to the supervisor and publishes
/// it.
async fn wait_for_exit(mut child: Child, exit_watch: ExitWatch) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = exit_watch.kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "failed to kill worker");
            }
            child.wait().await
        }
    };
    let exit = match status {
        Ok(status) => ExitStatusInfo::from_status(status),
        Err(e) => {
            tracing::error!(error = %e, "error waiting for worker");
            ExitStatusInfo::default()
        }
    };

    // Responses written just before exit are still buffered in the pipe.
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, exit_watch.stdout_task)
        .await
        .is_err()
    {
        tracing::debug!("worker stdout still open after exit");
    }
    let stderr_tail =
        match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, exit_watch.stderr_task).await {
            Ok(Ok(tail)) => tail,
            _ => None,
        };

    exit_watch.alive.store(false, Ordering::SeqCst);
    if let Some(supervisor) = exit_watch.supervisor.upgrade() {
        supervisor.record_exit(exit_watch.generation, exit, stderr_tail);
    }
    let _ = exit_watch.exit_tx.send(Some(exit));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::locator::{FixedLocator, LaunchDescriptor};
    use serial_test::serial;
    use tempfile::TempDir;

    fn supervisor(descriptor: LaunchDescriptor, config: WorkerConfig) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(
            config,
            Arc::new(FixedLocator::new(descriptor)),
        ))
    }

    async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn exit_during_start_keeps_callers_on_the_same_attempt() {
        let config = WorkerConfig {
            ready_marker: Some("never printed".to_string()),
            startup_timeout_ms: 10_000,
            ..Default::default()
        };
        let sup = supervisor(LaunchDescriptor::direct("sleep").with_args(["30"]), config);

        let first = {
            let sup = Arc::clone(&sup);
            tokio::spawn(async move { sup.start().await })
        };
        wait_until("worker spawn", || sup.pid().is_some()).await;
        assert_eq!(sup.state(), ReadinessState::Starting);

        sup.handle_exit(1, ExitStatusInfo::default());
        assert_eq!(sup.state(), ReadinessState::Starting);

        let second = sup.start().await;
        let first = first.await.unwrap();
        assert!(matches!(first, Err(WorkerError::SpawnFailed { .. })), "{first:?}");
        assert_eq!(first, second);
        assert_eq!(sup.lock().generation, 1);
        assert_eq!(sup.state(), ReadinessState::Exited);
    }

    #[tokio::test]
    #[serial]
    async fn worker_exit_event_carries_last_stderr_line() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("events.jsonl");
        unsafe {
            std::env::set_var("APPRAISAL_LOG_FILE", &log_path);
            std::env::set_var("APPRAISAL_LOG_MSG", "full");
        }

        let script = "echo 'starting' >&2; sleep 0.2; echo 'fatal: browser not found' >&2; exit 3";
        let sup = supervisor(
            LaunchDescriptor::direct("sh").with_args(["-c", script]),
            WorkerConfig::default(),
        );
        sup.start().await.unwrap();

        let exit_event = || -> Option<Value> {
            std::fs::read_to_string(&log_path)
                .ok()?
                .lines()
                .filter_map(|l| serde_json::from_str::<Value>(l).ok())
                .find(|e| e["act"] == "worker_exit" && e["sid"] == sup.session_id())
        };
        wait_until("worker_exit event", || exit_event().is_some()).await;
        let exit = exit_event().unwrap();
        assert_eq!(exit["res"], "exit code 3");
        assert_eq!(exit["msg"], "fatal: browser not found");

        unsafe {
            std::env::remove_var("APPRAISAL_LOG_FILE");
            std::env::remove_var("APPRAISAL_LOG_MSG");
        }
    }

    #[tokio::test]
    async fn dropping_supervisor_kills_worker() {
        let sup = supervisor(
            LaunchDescriptor::direct("sleep").with_args(["30"]),
            WorkerConfig::default(),
        );
        sup.start().await.unwrap();
        let (alive, mut exit_rx) = {
            let st = sup.lock();
            let handle = st.handle.as_ref().unwrap();
            (Arc::clone(&handle.alive), handle.exit_rx.clone())
        };
        drop(sup);

        let exit = tokio::time::timeout(Duration::from_secs(5), exit_rx.wait_for(Option::is_some))
            .await
            .expect("worker still running after supervisor drop")
            .map(|exit| *exit);
        assert!(!alive.load(Ordering::SeqCst));
        assert!(matches!(exit, Ok(Some(ExitStatusInfo { signal: Some(_), .. }))), "{exit:?}");
    }
}
