mod shell;

use std::{path::PathBuf, time::Duration};

use {
    clap::{Parser, Subcommand},
    drydock_config::{DrydockConfig, SandboxBackendKind},
    drydock_engine::CommandExecutor,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "drydock", about = "Drydock — sandboxed shell command execution")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Working directory for executions (overrides config value).
    #[arg(short = 'd', long, global = true)]
    directory: Option<PathBuf>,

    /// Synchronous execution timeout in seconds (overrides config value).
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Execution backend: local or container (overrides config value).
    #[arg(long, global = true)]
    backend: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive shell (default when no subcommand is provided).
    Shell,
    /// Execute one command and print its combined output.
    Run { command: String },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn apply_cli_overrides(cfg: &mut DrydockConfig, cli: &Cli) -> anyhow::Result<()> {
    if let Some(dir) = &cli.directory {
        cfg.workspace.dir = Some(dir.clone());
    }
    if let Some(secs) = cli.timeout {
        cfg.exec.timeout_secs = secs;
    }
    if let Some(backend) = &cli.backend {
        cfg.sandbox.backend = match backend.as_str() {
            "local" => SandboxBackendKind::Local,
            "container" => SandboxBackendKind::Container,
            other => anyhow::bail!("unknown backend '{other}' (expected 'local' or 'container')"),
        };
    }
    Ok(())
}

/// Resolve the execution working directory: create the configured
/// workspace if needed, or fall back to the process current directory.
/// The container backend sees the rewritten path when a nested-sandbox
/// rewrite is configured.
fn resolve_workspace_dir(cfg: &DrydockConfig) -> anyhow::Result<PathBuf> {
    let dir = match &cfg.workspace.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            dir.canonicalize()?
        },
        None => {
            let cwd = std::env::current_dir()?;
            warn!(path = %cwd.display(), "no workspace configured, using current directory");
            cwd
        },
    };
    match (&cfg.workspace.rewrite, cfg.sandbox.backend) {
        (Some(rewrite), SandboxBackendKind::Container) => Ok(rewrite.apply(&dir)),
        _ => Ok(dir),
    }
}

fn build_executor(cli: &Cli) -> anyhow::Result<CommandExecutor> {
    let mut cfg = drydock_config::discover_and_load();
    apply_cli_overrides(&mut cfg, cli)?;

    let workspace = resolve_workspace_dir(&cfg)?;
    let backend = drydock_engine::backend_from_config(&cfg, workspace)?;
    Ok(CommandExecutor::new(
        backend,
        Duration::from_secs(cfg.exec.timeout_secs),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let executor = build_executor(&cli)?;
    info!(
        instance = executor.instance_id(),
        backend = executor.backend_name(),
        "drydock ready"
    );

    let exit_code = match cli.command.unwrap_or(Commands::Shell) {
        Commands::Run { command } => {
            let result = executor.execute(&command).await?;
            if !result.output.is_empty() {
                print!("{}", result.output);
                if !result.output.ends_with('\n') {
                    println!();
                }
            }
            i32::from(result.exit_code != 0)
        },
        Commands::Shell => {
            tokio::select! {
                result = shell::run(&executor) => result?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    info!("interrupted");
                },
            }
            0
        },
    };

    executor.shutdown().await;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
