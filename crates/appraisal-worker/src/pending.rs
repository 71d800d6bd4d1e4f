//! Request/response correlation for commands sent to the worker.
//!
//! [`CommandTable`] hands out per-session ids and parks a oneshot resolver
//! for each command until exactly one outcome arrives: a response, a write
//! failure, a deadline, or process exit. Every path that settles a command
//! first removes it from the table, so no id can resolve twice.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::{ExitStatusInfo, WorkerError};
use crate::protocol::{Action, Response};

/// Outcome delivered to the caller awaiting a command.
pub type CommandOutcome = Result<Response, WorkerError>;

/// A command waiting for its response.
#[derive(Debug)]
pub struct PendingCommand {
    pub id: u64,
    pub action: Action,
    pub submitted_at: Instant,
    resolver: oneshot::Sender<CommandOutcome>,
}

impl PendingCommand {
    /// How long this command has been outstanding.
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    fn settle(self, outcome: CommandOutcome) {
        // The caller may have stopped waiting (e.g. its future was dropped).
        let _ = self.resolver.send(outcome);
    }

    pub fn reject(self, err: WorkerError) {
        self.settle(Err(err));
    }
}

/// Tracks in-flight commands keyed by correlation id.
#[derive(Debug, Default)]
pub struct CommandTable {
    next_id: u64,
    pending: HashMap<u64, PendingCommand>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and register a pending command for it.
    ///
    /// Ids are never reused within a table, including across worker restarts.
    pub fn insert(&mut self, action: Action) -> (u64, oneshot::Receiver<CommandOutcome>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCommand {
                id,
                action,
                submitted_at: Instant::now(),
                resolver: tx,
            },
        );
        (id, rx)
    }

    /// Remove a command without settling it.
    pub fn remove(&mut self, id: u64) -> Option<PendingCommand> {
        self.pending.remove(&id)
    }

    /// Settle the command a response belongs to.
    ///
    /// Returns `false` when no command with that id is pending (duplicate or
    /// stale delivery); such responses are ignored.
    pub fn resolve(&mut self, response: Response) -> bool {
        let Some(cmd) = self.pending.remove(&response.command_id) else {
            tracing::debug!(
                command_id = response.command_id,
                status = %response.status,
                "ignoring response for unknown command id"
            );
            return false;
        };

        tracing::debug!(
            command_id = cmd.id,
            action = %cmd.action,
            status = %response.status,
            elapsed_ms = cmd.age().as_millis() as u64,
            "command settled"
        );

        if response.status.is_accepted() {
            cmd.settle(Ok(response));
        } else {
            let err = WorkerError::CommandFailed {
                id: cmd.id,
                status: response.status.to_string(),
                message: response.failure_message(),
            };
            cmd.reject(err);
        }
        true
    }

    /// Reject and remove every pending command because the worker exited.
    ///
    /// Returns the number of commands rejected.
    pub fn reject_all(&mut self, exit: ExitStatusInfo) -> usize {
        let drained: Vec<PendingCommand> = self.pending.drain().map(|(_, cmd)| cmd).collect();
        let count = drained.len();
        for cmd in drained {
            let id = cmd.id;
            cmd.reject(WorkerError::ExitedWithPendingCommands { id, exit });
        }
        count
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The id the next inserted command will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}
