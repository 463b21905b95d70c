//! Public operation surface composing backend and registry.

use std::{sync::Arc, time::Duration};

use {drydock_common::Result, tracing::info};

use crate::{
    backend::{ExecutionBackend, ExecutionResult},
    registry::BackgroundRegistry,
};

/// Thin façade over the active execution backend and the background
/// command registry. One executor owns one registry; independent
/// executors never share state.
pub struct CommandExecutor {
    instance_id: String,
    backend: Arc<dyn ExecutionBackend>,
    registry: BackgroundRegistry,
    timeout: Duration,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(backend: Arc<dyn ExecutionBackend>, timeout: Duration) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            backend,
            registry: BackgroundRegistry::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run `command` to completion, bounded by the configured timeout.
    /// A timeout is reported as a normal result with the reserved exit
    /// code, never as an error.
    pub async fn execute(&self, command: &str) -> Result<ExecutionResult> {
        info!(
            instance = %self.instance_id,
            backend = self.backend.name(),
            command,
            "execute"
        );
        self.backend.execute(command, self.timeout).await
    }

    /// Start `command` in the background; returns its registry id
    /// immediately.
    pub async fn execute_in_background(&self, command: &str) -> Result<u64> {
        let process = self.backend.spawn_background(command).await?;
        let id = self.registry.register(command.to_owned(), process).await;
        info!(
            instance = %self.instance_id,
            backend = self.backend.name(),
            id,
            command,
            "background command started"
        );
        Ok(id)
    }

    /// Newly available output of background command `id`, or `""` when
    /// nothing new is ready. Fails with `InvalidHandle` for unknown
    /// ids.
    pub async fn read_logs(&self, id: u64) -> Result<String> {
        self.registry.read_logs(id).await
    }

    /// Terminate background command `id` and drop it from the
    /// registry. Fails with `InvalidHandle` for unknown ids.
    pub async fn kill_background(&self, id: u64) -> Result<()> {
        self.registry.kill(id).await?;
        info!(instance = %self.instance_id, id, "background command killed");
        Ok(())
    }

    /// `(id, command, pid)` of every live background command.
    pub async fn list_background(&self) -> Vec<(u64, String, Option<i32>)> {
        self.registry.entries().await
    }

    /// Mark the executor closed: the caller has already cleaned up, so
    /// shutdown becomes a no-op.
    pub async fn close(&self) {
        self.registry.close().await;
    }

    /// Terminate all outstanding background commands. Idempotent.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
