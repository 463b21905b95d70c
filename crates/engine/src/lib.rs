//! Command execution engine.
//!
//! Runs shell commands inside an isolated execution environment —
//! either a local subprocess sandbox or a container-backed sandbox —
//! in two modes: synchronous (blocking with a timeout) and background
//! (fire-and-forget with polled log retrieval and explicit kill).
//!
//! Layering, leaves first: [`demux`] decodes the container runtime's
//! length-prefixed exec stream; [`local`] and [`container`] implement
//! the [`backend::ExecutionBackend`] capability; [`registry`] owns live
//! background commands; [`executor`] composes it all behind the public
//! operation surface.

pub mod backend;
pub mod container;
pub mod demux;
pub mod docker;
pub mod executor;
pub mod local;
pub mod registry;

use std::sync::Arc;

use drydock_config::{DrydockConfig, SandboxBackendKind};

pub use {
    backend::{BackgroundProcess, ExecutionBackend, ExecutionResult, TIMEOUT_EXIT_CODE},
    demux::{ByteOrder, StreamDemuxer},
    executor::CommandExecutor,
    registry::BackgroundRegistry,
};

/// Build the execution backend selected by `cfg`, rooted at
/// `workspace_dir`.
pub fn backend_from_config(
    cfg: &DrydockConfig,
    workspace_dir: std::path::PathBuf,
) -> drydock_common::Result<Arc<dyn ExecutionBackend>> {
    let poll_interval = std::time::Duration::from_millis(cfg.exec.poll_interval_ms);
    match cfg.sandbox.backend {
        SandboxBackendKind::Local => Ok(Arc::new(local::LocalBackend::new(
            workspace_dir,
            poll_interval,
            cfg.exec.max_output_bytes,
        ))),
        SandboxBackendKind::Container => {
            let name = cfg.sandbox.container.clone().ok_or_else(|| {
                drydock_common::Error::message(
                    "sandbox.container must name a running container for the container backend",
                )
            })?;
            let runtime = Arc::new(docker::DockerRuntime::new(
                cfg.sandbox.docker_socket.clone(),
                name,
            ));
            Ok(Arc::new(container::ContainerBackend::new(
                runtime,
                container::ContainerExecOptions {
                    workdir: workspace_dir,
                    run_as_user: cfg
                        .sandbox
                        .run_as
                        .enabled
                        .then(|| cfg.sandbox.run_as.user.clone()),
                    byte_order: ByteOrder::parse(&cfg.sandbox.frame_byte_order),
                    poll_interval,
                    max_output_bytes: cfg.exec.max_output_bytes,
                },
            )))
        },
    }
}
