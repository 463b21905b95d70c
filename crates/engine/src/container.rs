//! Container-backed execution backend.
//!
//! Commands are exec'd into a running container through a
//! [`ContainerRuntime`], which delivers output as the runtime's raw
//! multiplexed stream; every byte read here passes through the
//! [`StreamDemuxer`] before reaching the caller.
//!
//! The runtime's cancellation primitive for a blocking exec is
//! unreliable, so the synchronous timeout path does not abort the
//! in-flight call: it finds the process in the container's process
//! listing by matching the fully resolved command line and issues a
//! forced-kill exec for that PID. This is best-effort by construction
//! (PID reuse, overlapping command text); when several processes match,
//! the lowest PID wins.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    drydock_common::Result,
    futures::{StreamExt, stream::BoxStream},
    tokio::time,
    tracing::{debug, warn},
};

use crate::{
    backend::{BackgroundProcess, ExecutionBackend, ExecutionResult, truncate_output},
    demux::{ByteOrder, StreamDemuxer},
};

/// Bounded wait for a forced-kill exec to come back.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Raw multiplexed output bytes of one exec, as chunked by the
/// transport.
pub type ExecStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Exec capability of a container runtime. Implemented over the real
/// engine API by [`crate::docker::DockerRuntime`]; tests inject fakes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Run `argv` inside the container to completion. Returns the exit
    /// code and the raw multiplexed output bytes.
    async fn exec_collect(&self, argv: &[String], workdir: Option<&Path>)
    -> Result<(i32, Vec<u8>)>;

    /// Start `argv` inside the container and return its live output
    /// stream.
    async fn exec_stream(&self, argv: &[String], workdir: Option<&Path>) -> Result<ExecStream>;
}

/// Construction-time options for [`ContainerBackend`].
pub struct ContainerExecOptions {
    /// Working directory for every exec.
    pub workdir: PathBuf,
    /// Privilege-switching account: commands run as `su <user> -c`.
    pub run_as_user: Option<String>,
    pub byte_order: ByteOrder,
    pub poll_interval: Duration,
    pub max_output_bytes: usize,
}

pub struct ContainerBackend {
    runtime: Arc<dyn ContainerRuntime>,
    opts: ContainerExecOptions,
}

fn kill_argv(pid: i32) -> Vec<String> {
    vec!["kill".into(), "-9".into(), pid.to_string()]
}

impl ContainerBackend {
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, opts: ContainerExecOptions) -> Self {
        Self { runtime, opts }
    }

    /// The fully resolved command vector, including the
    /// privilege-switching prefix. PID discovery matches against this
    /// exact argv.
    fn exec_argv(&self, command: &str) -> Vec<String> {
        match &self.opts.run_as_user {
            Some(user) => vec!["su".into(), user.clone(), "-c".into(), command.into()],
            None => vec!["/bin/bash".into(), "-c".into(), command.into()],
        }
    }

    fn decode_all(&self, raw: &[u8]) -> String {
        let mut demux = StreamDemuxer::new(self.opts.byte_order);
        let mut bytes = demux.decode(raw);
        bytes.extend(demux.finish());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Locate the in-container PID whose command line contains the
    /// resolved `argv`. Best-effort string match over a `ps` exec;
    /// lowest PID wins when several lines match.
    async fn find_pid(&self, argv: &[String]) -> Result<Option<i32>> {
        let needle = argv.join(" ");
        let ps: Vec<String> = vec!["ps".into(), "-eo".into(), "pid,args".into()];
        let (_, raw) = self.runtime.exec_collect(&ps, None).await?;
        let listing = self.decode_all(&raw);

        let mut matches: Vec<i32> = Vec::new();
        for line in listing.lines().skip(1) {
            let Some((pid, args)) = line.trim().split_once(char::is_whitespace) else {
                continue;
            };
            if !args.contains(&needle) {
                continue;
            }
            if let Ok(pid) = pid.parse::<i32>() {
                matches.push(pid);
            }
        }
        matches.sort_unstable();
        Ok(matches.first().copied())
    }

    async fn kill_pid(&self, pid: i32) -> Result<()> {
        let (code, _) = self.runtime.exec_collect(&kill_argv(pid), None).await?;
        if code != 0 {
            warn!(pid, code, "in-container kill exited nonzero");
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        debug!(command, timeout_secs = timeout.as_secs(), "container execute");

        let argv = self.exec_argv(command);
        let run = self.runtime.exec_collect(&argv, Some(&self.opts.workdir));
        match time::timeout(timeout, run).await {
            Ok(Ok((exit_code, raw))) => {
                let mut output = self.decode_all(&raw);
                truncate_output(&mut output, self.opts.max_output_bytes);
                debug!(exit_code, output_len = output.len(), "container exec done");
                Ok(ExecutionResult { exit_code, output })
            },
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(command, "container exec timed out, discovering pid to kill");
                match self.find_pid(&argv).await {
                    Ok(Some(pid)) => {
                        if let Err(e) = self.kill_pid(pid).await {
                            warn!(pid, error = %e, "forced kill failed");
                        }
                    },
                    Ok(None) => warn!(command, "no matching process found in container"),
                    Err(e) => warn!(error = %e, "process discovery failed"),
                }
                Ok(ExecutionResult::timed_out(command))
            },
        }
    }

    async fn spawn_background(&self, command: &str) -> Result<Box<dyn BackgroundProcess>> {
        let argv = self.exec_argv(command);
        let stream = self
            .runtime
            .exec_stream(&argv, Some(&self.opts.workdir))
            .await?;

        // Eager discovery so a later kill needs no lookup.
        let pid = match self.find_pid(&argv).await {
            Ok(pid) => pid,
            Err(e) => {
                warn!(command, error = %e, "eager pid discovery failed");
                None
            },
        };
        debug!(command, pid, "container background command started");

        Ok(Box::new(ContainerProcess {
            runtime: Arc::clone(&self.runtime),
            stream: Some(stream),
            demux: StreamDemuxer::new(self.opts.byte_order),
            pid,
            poll_interval: self.opts.poll_interval,
            terminated: false,
        }))
    }
}

struct ContainerProcess {
    runtime: Arc<dyn ContainerRuntime>,
    /// Dropped to `None` when the stream ends or the process is killed.
    stream: Option<ExecStream>,
    demux: StreamDemuxer,
    pid: Option<i32>,
    poll_interval: Duration,
    terminated: bool,
}

#[async_trait]
impl BackgroundProcess for ContainerProcess {
    fn pid(&self) -> Option<i32> {
        self.pid
    }

    async fn read_logs(&mut self) -> Result<String> {
        let mut decoded = Vec::new();
        let mut ended = false;

        if let Some(stream) = self.stream.as_mut() {
            // First chunk waits the poll interval; anything already
            // buffered after that drains without waiting.
            let mut wait = self.poll_interval;
            loop {
                let item = match time::timeout(wait, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => break,
                };
                match item {
                    Some(Ok(chunk)) => {
                        decoded.extend(self.demux.decode(&chunk));
                        wait = Duration::ZERO;
                    },
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        ended = true;
                        break;
                    },
                }
            }
        }
        if ended {
            self.stream = None;
            decoded.extend(self.demux.finish());
        }

        Ok(String::from_utf8_lossy(&decoded).into_owned())
    }

    async fn kill(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.stream = None;

        let Some(pid) = self.pid else {
            warn!("no pid known for background command; releasing stream only");
            return Ok(());
        };
        match time::timeout(KILL_WAIT, self.runtime.exec_collect(&kill_argv(pid), None)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(pid, "kill exec did not return within bound");
                Ok(())
            },
        }
    }
}

impl Drop for ContainerProcess {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        // Last-resort cleanup for handles dropped without an explicit
        // kill (process-wide shutdown). Only possible from inside a
        // runtime.
        if let Some(pid) = self.pid
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let runtime = Arc::clone(&self.runtime);
            handle.spawn(async move {
                let _ = runtime.exec_collect(&kill_argv(pid), None).await;
            });
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        futures::stream,
        std::sync::Mutex,
        tokio::time::{Instant, sleep},
    };

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![tag, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Scripted runtime: `ps` returns `ps_listing`, `kill` succeeds,
    /// anything else either returns `collect_reply` or hangs.
    struct FakeRuntime {
        recorded: Mutex<Vec<Vec<String>>>,
        ps_listing: String,
        collect_reply: Option<(i32, Vec<u8>)>,
        stream_chunks: Vec<Vec<u8>>,
        stream_stays_open: bool,
    }

    impl FakeRuntime {
        fn new() -> Self {
            Self {
                recorded: Mutex::new(Vec::new()),
                ps_listing: "  PID ARGS\n".into(),
                collect_reply: Some((0, Vec::new())),
                stream_chunks: Vec::new(),
                stream_stays_open: false,
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.recorded.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn exec_collect(
            &self,
            argv: &[String],
            _workdir: Option<&Path>,
        ) -> Result<(i32, Vec<u8>)> {
            self.recorded.lock().unwrap().push(argv.to_vec());
            if argv[0] == "ps" {
                return Ok((0, frame(1, self.ps_listing.as_bytes())));
            }
            if argv[0] == "kill" {
                return Ok((0, Vec::new()));
            }
            match &self.collect_reply {
                Some(reply) => Ok(reply.clone()),
                None => {
                    sleep(Duration::from_secs(3600)).await;
                    unreachable!("exec never completes")
                },
            }
        }

        async fn exec_stream(
            &self,
            argv: &[String],
            _workdir: Option<&Path>,
        ) -> Result<ExecStream> {
            self.recorded.lock().unwrap().push(argv.to_vec());
            let chunks: Vec<std::io::Result<Bytes>> = self
                .stream_chunks
                .iter()
                .map(|c| Ok(Bytes::from(c.clone())))
                .collect();
            let head = stream::iter(chunks);
            if self.stream_stays_open {
                Ok(head.chain(stream::pending()).boxed())
            } else {
                Ok(head.boxed())
            }
        }
    }

    fn opts() -> ContainerExecOptions {
        ContainerExecOptions {
            workdir: PathBuf::from("/workspace"),
            run_as_user: None,
            byte_order: ByteOrder::Big,
            poll_interval: Duration::from_millis(50),
            max_output_bytes: 200 * 1024,
        }
    }

    #[tokio::test]
    async fn execute_demuxes_combined_output() {
        let mut fake = FakeRuntime::new();
        let mut raw = frame(1, b"out ");
        raw.extend(frame(2, b"err"));
        fake.collect_reply = Some((3, raw));

        let backend = ContainerBackend::new(Arc::new(fake), opts());
        let result = backend
            .execute("true", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.output, "out err");
    }

    #[tokio::test]
    async fn run_as_user_prefixes_argv() {
        let fake = Arc::new(FakeRuntime::new());
        let backend = ContainerBackend::new(
            Arc::clone(&fake) as Arc<dyn ContainerRuntime>,
            ContainerExecOptions {
                run_as_user: Some("sandbox".into()),
                ..opts()
            },
        );
        backend
            .execute("whoami", Duration::from_secs(5))
            .await
            .unwrap();
        let calls = fake.calls();
        assert_eq!(calls[0][..3], ["su", "sandbox", "-c"]);
        assert_eq!(calls[0][3], "whoami");
    }

    #[tokio::test]
    async fn timeout_discovers_lowest_pid_and_kills_it() {
        let mut fake = FakeRuntime::new();
        fake.collect_reply = None; // the exec never completes
        fake.ps_listing = "  PID ARGS\n\
                           99 /bin/bash -c sleep 10\n\
                           42 /bin/bash -c sleep 10\n\
                           7 unrelated\n"
            .into();
        let fake = Arc::new(fake);
        let backend = ContainerBackend::new(Arc::clone(&fake) as Arc<dyn ContainerRuntime>, opts());

        let started = Instant::now();
        let result = backend
            .execute("sleep 10", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(result.is_timeout());
        assert!(result.output.contains("sleep 10"));
        assert!(started.elapsed() < Duration::from_secs(2));

        let calls = fake.calls();
        let kill = calls
            .iter()
            .find(|argv| argv[0] == "kill")
            .expect("kill exec issued");
        assert_eq!(kill[..], ["kill", "-9", "42"]);
    }

    #[tokio::test]
    async fn timeout_without_match_still_returns_reserved_result() {
        let mut fake = FakeRuntime::new();
        fake.collect_reply = None;
        let fake = Arc::new(fake);
        let backend = ContainerBackend::new(Arc::clone(&fake) as Arc<dyn ContainerRuntime>, opts());

        let result = backend
            .execute("sleep 10", Duration::from_millis(100))
            .await
            .unwrap();
        assert!(result.is_timeout());
        assert!(!fake.calls().iter().any(|argv| argv[0] == "kill"));
    }

    #[tokio::test]
    async fn background_logs_demux_across_chunk_boundaries() {
        let mut fake = FakeRuntime::new();
        let mut whole = frame(1, b"hello ");
        whole.extend(frame(2, b"world"));
        // Split mid-header and mid-payload.
        fake.stream_chunks = vec![whole[..5].to_vec(), whole[5..16].to_vec(), whole[16..].to_vec()];

        let backend = ContainerBackend::new(Arc::new(fake), opts());
        let mut process = backend.spawn_background("echo hi").await.unwrap();

        let mut all = String::new();
        for _ in 0..10 {
            all.push_str(&process.read_logs().await.unwrap());
            if all == "hello world" {
                break;
            }
        }
        assert_eq!(all, "hello world");
        // Stream ended: later polls return empty without error.
        assert_eq!(process.read_logs().await.unwrap(), "");
    }

    #[tokio::test]
    async fn background_pid_is_discovered_eagerly_and_used_by_kill() {
        let mut fake = FakeRuntime::new();
        fake.ps_listing = "  PID ARGS\n  321 /bin/bash -c sleep 60\n".into();
        fake.stream_stays_open = true;
        let fake = Arc::new(fake);
        let backend = ContainerBackend::new(Arc::clone(&fake) as Arc<dyn ContainerRuntime>, opts());

        let mut process = backend.spawn_background("sleep 60").await.unwrap();
        assert_eq!(process.pid(), Some(321));

        process.kill().await.unwrap();
        let calls = fake.calls();
        let kill = calls
            .iter()
            .find(|argv| argv[0] == "kill")
            .expect("kill exec issued");
        assert_eq!(kill[..], ["kill", "-9", "321"]);

        // Kill releases exactly once.
        process.kill().await.unwrap();
        let kills = fake.calls().iter().filter(|a| a[0] == "kill").count();
        assert_eq!(kills, 1);
    }

    #[tokio::test]
    async fn read_logs_on_open_stream_returns_empty_within_bound() {
        let mut fake = FakeRuntime::new();
        fake.stream_stays_open = true;
        let backend = ContainerBackend::new(Arc::new(fake), opts());
        let mut process = backend.spawn_background("sleep 60").await.unwrap();

        let started = Instant::now();
        assert_eq!(process.read_logs().await.unwrap(), "");
        assert!(started.elapsed() < Duration::from_secs(1));
        process.kill().await.unwrap();
    }
}
