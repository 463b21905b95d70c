//! Configuration loading, validation, and env substitution.
//!
//! Config files: `drydock.toml`, `drydock.yaml`, or `drydock.json`
//! Searched in `./` then `~/.config/drydock/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values, plus a
//! small set of `DRYDOCK_*` environment overrides applied after load.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config},
    schema::{
        DrydockConfig, ExecConfig, PathRewriteConfig, RunAsConfig, SandboxBackendKind,
        SandboxConfig, WorkspaceConfig,
    },
};
