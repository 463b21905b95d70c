//! Registry of live background commands.
//!
//! Owns every in-flight background command, hands out strictly
//! increasing ids (starting at 0, never reused), and guarantees that
//! everything still registered is terminated exactly once at shutdown.
//! All state sits behind one async mutex; call volume is low and a
//! single lock also serializes `kill` against a concurrent `shutdown`.

use std::collections::HashMap;

use {
    drydock_common::{Error, Result},
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use crate::backend::BackgroundProcess;

/// One in-flight asynchronously started invocation. Exclusively owns
/// its process handle; the handle is released exactly once, on kill or
/// shutdown.
pub struct BackgroundCommand {
    pub id: u64,
    /// The exact shell command string as submitted.
    pub command: String,
    process: Box<dyn BackgroundProcess>,
}

impl BackgroundCommand {
    pub fn pid(&self) -> Option<i32> {
        self.process.pid()
    }
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    commands: HashMap<u64, BackgroundCommand>,
    closed: bool,
}

/// Per-executor registry instance. No global state: independent
/// executors never interfere with each other's ids or commands.
#[derive(Default)]
pub struct BackgroundRegistry {
    state: Mutex<RegistryState>,
}

impl BackgroundRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly spawned process and return its new id.
    pub async fn register(&self, command: String, process: Box<dyn BackgroundProcess>) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        state.commands.insert(
            id,
            BackgroundCommand {
                id,
                command,
                process,
            },
        );
        debug!(id, "background command registered");
        id
    }

    /// Drain newly available output of command `id`.
    pub async fn read_logs(&self, id: u64) -> Result<String> {
        let mut state = self.state.lock().await;
        let cmd = state.commands.get_mut(&id).ok_or(Error::InvalidHandle(id))?;
        cmd.process.read_logs().await
    }

    /// Terminate command `id` and remove it. Removal and release happen
    /// atomically under the registry lock; a second kill for the same
    /// id fails with `InvalidHandle`.
    pub async fn kill(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut cmd = state.commands.remove(&id).ok_or(Error::InvalidHandle(id))?;
        debug!(id, command = %cmd.command, "killing background command");
        cmd.process.kill().await
    }

    /// Ids of all currently registered commands, ascending.
    pub async fn ids(&self) -> Vec<u64> {
        let state = self.state.lock().await;
        let mut ids: Vec<u64> = state.commands.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// `(id, command, pid)` of every registered command, ascending by
    /// id.
    pub async fn entries(&self) -> Vec<(u64, String, Option<i32>)> {
        let state = self.state.lock().await;
        let mut entries: Vec<(u64, String, Option<i32>)> = state
            .commands
            .values()
            .map(|cmd| (cmd.id, cmd.command.clone(), cmd.pid()))
            .collect();
        entries.sort_unstable_by_key(|(id, ..)| *id);
        entries
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.commands.is_empty()
    }

    /// Mark the registry closed without terminating anything: the
    /// caller has already cleaned up.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    /// Terminate every still-registered command. Idempotent: only the
    /// first call does work. One failed termination never blocks the
    /// rest.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        let drained: Vec<(u64, BackgroundCommand)> = state.commands.drain().collect();
        for (id, mut cmd) in drained {
            if let Err(e) = cmd.process.kill().await {
                warn!(id, command = %cmd.command, error = %e, "failed to terminate background command");
            }
        }
    }
}
