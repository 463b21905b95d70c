//! Local subprocess execution backend.
//!
//! Commands run under `/bin/bash -c` with stderr merged into the
//! stdout pipe at the fd level (`exec 2>&1`), so the combined output
//! interleaves in true arrival order. Output never passes through the
//! frame demultiplexer: local processes do not frame.

use std::{path::PathBuf, process::Stdio, time::Duration};

use {
    async_trait::async_trait,
    drydock_common::{Error, Result},
    tokio::{
        io::AsyncReadExt,
        process::{Child, Command},
        time,
    },
    tracing::{debug, warn},
};

use crate::backend::{BackgroundProcess, ExecutionBackend, ExecutionResult, truncate_output};

/// Bounded wait for a killed process to actually exit.
const KILL_WAIT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8192;

pub struct LocalBackend {
    workdir: PathBuf,
    poll_interval: Duration,
    max_output_bytes: usize,
}

impl LocalBackend {
    #[must_use]
    pub fn new(workdir: PathBuf, poll_interval: Duration, max_output_bytes: usize) -> Self {
        Self {
            workdir,
            poll_interval,
            max_output_bytes,
        }
    }

    fn shell_command(&self, command: &str) -> Command {
        let mut cmd = Command::new("/bin/bash");
        // The `exec 2>&1` preamble dups the stdout pipe onto fd 2 for
        // the whole script, the fd-level equivalent of piping stderr
        // into stdout.
        cmd.arg("-c").arg(format!("exec 2>&1\n{command}"));
        cmd.current_dir(&self.workdir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        // Leak guard: an abandoned child is killed when its handle
        // drops, which also covers process-wide shutdown.
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Signal the child and wait (bounded) for it to exit.
async fn kill_child(child: &mut Child) {
    match child.start_kill() {
        Ok(()) => {},
        // InvalidInput: the child has already been reaped.
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => return,
        Err(e) => {
            warn!(error = %e, "failed to signal process");
            return;
        },
    }
    if time::timeout(KILL_WAIT, child.wait()).await.is_err() {
        warn!("process did not exit within kill wait");
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        debug!(command, timeout_secs = timeout.as_secs(), "local execute");

        let deadline = time::Instant::now() + timeout;
        let mut child = self.shell_command(command).spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::message("child stdout was not captured"))?;

        let mut raw = Vec::new();
        let outcome = time::timeout_at(deadline, async {
            stdout.read_to_end(&mut raw).await?;
            child.wait().await
        })
        .await;

        match outcome {
            Ok(Ok(status)) => {
                let mut output = String::from_utf8_lossy(&raw).into_owned();
                truncate_output(&mut output, self.max_output_bytes);
                let exit_code = status.code().unwrap_or(-1);
                debug!(exit_code, output_len = output.len(), "local exec done");
                Ok(ExecutionResult { exit_code, output })
            },
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(command, "local exec timed out, killing process");
                kill_child(&mut child).await;
                Ok(ExecutionResult::timed_out(command))
            },
        }
    }

    async fn spawn_background(&self, command: &str) -> Result<Box<dyn BackgroundProcess>> {
        let mut child = self.shell_command(command).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::message("child stdout was not captured"))?;
        let pid = child.id().map(|p| p as i32);
        debug!(command, pid, "local background command spawned");
        Ok(Box::new(LocalProcess {
            child,
            stdout: Some(stdout),
            pid,
            poll_interval: self.poll_interval,
        }))
    }
}

struct LocalProcess {
    child: Child,
    /// Taken to `None` once the pipe reaches EOF.
    stdout: Option<tokio::process::ChildStdout>,
    pid: Option<i32>,
    poll_interval: Duration,
}

#[async_trait]
impl BackgroundProcess for LocalProcess {
    fn pid(&self) -> Option<i32> {
        self.pid
    }

    async fn read_logs(&mut self) -> Result<String> {
        let mut collected = Vec::new();
        let mut eof = false;

        if let Some(stdout) = self.stdout.as_mut() {
            let mut chunk = [0u8; READ_CHUNK];
            // First read waits the poll interval; once data flows,
            // drain whatever else is already buffered without waiting.
            let mut wait = self.poll_interval;
            loop {
                match time::timeout(wait, stdout.read(&mut chunk)).await {
                    Ok(Ok(0)) => {
                        eof = true;
                        break;
                    },
                    Ok(Ok(n)) => {
                        collected.extend_from_slice(&chunk[..n]);
                        wait = Duration::ZERO;
                    },
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => break,
                }
            }
        }
        if eof {
            self.stdout = None;
        }

        Ok(String::from_utf8_lossy(&collected).into_owned())
    }

    async fn kill(&mut self) -> Result<()> {
        kill_child(&mut self.child).await;
        self.stdout = None;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Instant};

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(
            dir.path().to_path_buf(),
            Duration::from_millis(100),
            200 * 1024,
        );
        (dir, backend)
    }

    #[tokio::test]
    async fn execute_captures_output_and_exit_code() {
        let (_dir, backend) = backend();
        let result = backend
            .execute("echo hello", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.trim(), "hello");
    }

    #[tokio::test]
    async fn stderr_is_merged_into_output() {
        let (_dir, backend) = backend();
        let result = backend
            .execute("echo out && echo err >&2", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_code() {
        let (_dir, backend) = backend();
        let result = backend
            .execute("exit 42", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn runs_in_workspace_dir() {
        let (dir, backend) = backend();
        let result = backend.execute("pwd", Duration::from_secs(10)).await.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(result.output.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn timeout_returns_reserved_result_within_bound() {
        let (_dir, backend) = backend();
        let started = Instant::now();
        let result = backend
            .execute("sleep 10", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.output.contains("sleep 10"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn output_is_truncated_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf(), Duration::from_millis(100), 64);
        let result = backend
            .execute("yes x | head -n 200", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(result.output.ends_with("... [output truncated]"));
    }

    #[tokio::test]
    async fn background_logs_drain_without_loss_or_duplication() {
        let (_dir, backend) = backend();
        let mut process = backend
            .spawn_background("echo one; sleep 0.3; echo two")
            .await
            .unwrap();
        assert!(process.pid().is_some());

        let mut all = String::new();
        for _ in 0..30 {
            all.push_str(&process.read_logs().await.unwrap());
            if all.contains("two") {
                break;
            }
        }
        assert_eq!(all, "one\ntwo\n");
    }

    #[tokio::test]
    async fn read_logs_returns_empty_when_nothing_ready() {
        let (_dir, backend) = backend();
        let mut process = backend.spawn_background("sleep 5").await.unwrap();
        assert_eq!(process.read_logs().await.unwrap(), "");
        process.kill().await.unwrap();
    }

    #[tokio::test]
    async fn kill_terminates_and_is_reentrant() {
        let (_dir, backend) = backend();
        let mut process = backend.spawn_background("sleep 30").await.unwrap();
        process.kill().await.unwrap();
        // A second kill on an already-reaped child is a no-op.
        process.kill().await.unwrap();
        assert_eq!(process.read_logs().await.unwrap(), "");
    }
}
