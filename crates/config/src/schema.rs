use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level drydock configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrydockConfig {
    pub workspace: WorkspaceConfig,
    pub exec: ExecConfig,
    pub sandbox: SandboxConfig,
}

/// Workspace directory settings.
///
/// The workspace is the working directory for every execution. When
/// `dir` is unset the process current directory is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub dir: Option<PathBuf>,
    /// Path rewrite for nested-sandbox setups: a workspace path that
    /// starts with `host_prefix` is presented to the sandbox with
    /// `sandbox_prefix` substituted.
    pub rewrite: Option<PathRewriteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRewriteConfig {
    pub host_prefix: PathBuf,
    pub sandbox_prefix: PathBuf,
}

impl PathRewriteConfig {
    /// Map a host workspace path to its in-sandbox equivalent. Paths
    /// outside `host_prefix` pass through unchanged.
    #[must_use]
    pub fn apply(&self, path: &std::path::Path) -> PathBuf {
        match path.strip_prefix(&self.host_prefix) {
            Ok(rest) => self.sandbox_prefix.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }
}

/// Synchronous/background execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Hard deadline for synchronous execution.
    pub timeout_secs: u64,
    /// Bounded wait for a single background log poll.
    pub poll_interval_ms: u64,
    /// Cap on synchronous result output.
    pub max_output_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 100,
            max_output_bytes: 200 * 1024,
        }
    }
}

/// Which execution backend runs commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum SandboxBackendKind {
    /// Direct subprocess spawn on the host.
    #[default]
    Local,
    /// Exec into a running container via the runtime's exec API.
    Container,
}

impl std::fmt::Display for SandboxBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Container => f.write_str("container"),
        }
    }
}

/// Run-as account for container execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunAsConfig {
    pub enabled: bool,
    /// Account name the exec switches to (`su <user> -c`).
    pub user: String,
    /// Numeric id of the account, for provisioning the user inside the
    /// container image. Execution itself switches users by name only.
    pub uid: u32,
}

impl Default for RunAsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user: "sandbox".into(),
            uid: 1000,
        }
    }
}

/// Sandbox backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: SandboxBackendKind,
    /// Container image identifier (container backend only).
    pub image: Option<String>,
    /// Name of the running container to exec into.
    pub container: Option<String>,
    pub run_as: RunAsConfig,
    /// Container runtime API socket.
    pub docker_socket: PathBuf,
    /// Byte order of the exec stream frame length: "big", "little", or
    /// "native". The Docker wire format is big-endian.
    pub frame_byte_order: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackendKind::default(),
            image: None,
            container: None,
            run_as: RunAsConfig::default(),
            docker_socket: PathBuf::from("/var/run/docker.sock"),
            frame_byte_order: "big".into(),
        }
    }
}
