use std::time::Duration;

use {
    async_trait::async_trait,
    drydock_common::Result,
    serde::{Deserialize, Serialize},
};

/// Exit code reported when a synchronous execution hit its deadline.
/// Reserved — it is never a real process exit code here.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Result of a synchronous command execution: the exit code and the
/// decoded output, stdout and stderr interleaved in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub output: String,
}

impl ExecutionResult {
    /// The well-formed result a timed-out execution returns. A timeout
    /// is an expected, recoverable outcome for the caller, not an
    /// error.
    #[must_use]
    pub fn timed_out(command: &str) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            output: format!("Command: \"{command}\" timed out"),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Cap `output` at `max_bytes`, marking the cut.
pub(crate) fn truncate_output(output: &mut String, max_bytes: usize) {
    if output.len() > max_bytes {
        // Truncate on a char boundary at or below the cap.
        let mut cut = max_bytes;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        output.push_str("\n... [output truncated]");
    }
}

/// A live asynchronously started command owned by exactly one registry
/// entry. Logs are polled, never pushed; `kill` releases the underlying
/// process/stream resource exactly once.
#[async_trait]
pub trait BackgroundProcess: Send {
    /// Process id inside the execution environment, when known.
    fn pid(&self) -> Option<i32>;

    /// Non-blocking drain: returns whatever output is currently
    /// buffered (bounded wait, ~100ms), or `""` when nothing new is
    /// ready. Repeated calls return only newly available bytes.
    async fn read_logs(&mut self) -> Result<String>;

    /// Terminate the process and wait (bounded) for it to exit.
    async fn kill(&mut self) -> Result<()>;
}

/// Capability over the two execution environments: local subprocess
/// spawn and container exec. Selected at construction time.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend name for logs ("local" or "container").
    fn name(&self) -> &'static str;

    /// Run `command` under a shell to completion, bounded by `timeout`.
    /// On expiry the underlying process is killed best-effort and the
    /// reserved timeout result is returned.
    async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecutionResult>;

    /// Start `command` without blocking and hand back the live process.
    async fn spawn_background(&self, command: &str) -> Result<Box<dyn BackgroundProcess>>;
}
