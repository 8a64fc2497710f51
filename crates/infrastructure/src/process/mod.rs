//! Runs external commands side by side on the async runtime.
//!
//! Children are driven from a single loop: each one gets a supervising
//! future that reads its pipes, enforces the timeout and reaps it, and at
//! most `max_threads` of those futures are alive at once.

mod output;

use domain::{CommandOutcome, ExternalCommand};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use output::{Channel, SinkConfig};

const READ_CHUNK: usize = 64 * 1024;
/// Time a terminated child gets before its group is killed outright.
const KILL_GRACE: Duration = Duration::from_secs(5);
/// Shell convention for a command that could not be run.
const SPAWN_FAILED: i32 = 127;
/// How long pipes are still read after the child itself has exited.
const PIPE_DRAIN: Duration = Duration::from_secs(1);

pub const TIMED_OUT: &str = "Timed out";
pub const INTERRUPTED: &str = "Interrupted";

/// `torrent_name -> [(media_name, exit_status)]`
pub type ProcessReport = HashMap<String, Vec<(String, i32)>>;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("max_threads must be at least 1")]
    NoWorkers,
    #[error("cannot prepare output directory {path}: {source}")]
    OutputDir {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("task {torrent}/{media} is already queued")]
    DuplicateTask { torrent: String, media: String },
}

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub max_threads: usize,
    /// Zero disables the timeout.
    pub timeout: Duration,
    pub stdout_dir: Option<PathBuf>,
    pub stderr_dir: Option<PathBuf>,
    /// Mirror child stdout on our stdout, one prefixed line at a time.
    pub print_out: bool,
    pub stdout_buffer: bool,
    pub stderr_buffer: bool,
    /// Mirror child stderr as well.
    pub stderr_verbose: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_threads: 4,
            timeout: Duration::ZERO,
            stdout_dir: None,
            stderr_dir: None,
            print_out: false,
            stdout_buffer: false,
            stderr_buffer: true,
            stderr_verbose: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Cancelled,
}

#[derive(Debug)]
struct Pending {
    torrent: String,
    media: String,
    command: ExternalCommand,
    state: TaskState,
}

/// A child that ran (or failed to start) and was reaped.
#[derive(Debug)]
struct Finished {
    torrent: String,
    media: String,
    outcome: CommandOutcome,
}

pub struct ProcessManager {
    options: ProcessOptions,
    stdout_sink: SinkConfig,
    stderr_sink: SinkConfig,
    pending: VecDeque<Pending>,
    interrupt: CancellationToken,
}

impl ProcessManager {
    pub fn new(options: ProcessOptions, interrupt: CancellationToken) -> Result<Self, ProcessError> {
        if options.max_threads == 0 {
            return Err(ProcessError::NoWorkers);
        }
        for dir in [&options.stdout_dir, &options.stderr_dir].into_iter().flatten() {
            std::fs::create_dir_all(dir).map_err(|source| ProcessError::OutputDir {
                path: dir.display().to_string(),
                source,
            })?;
        }

        let stdout_sink = SinkConfig {
            buffer: options.stdout_buffer,
            directory: options.stdout_dir.clone(),
            mirror: options.print_out,
        };
        let stderr_sink = SinkConfig {
            buffer: options.stderr_buffer,
            directory: options.stderr_dir.clone(),
            mirror: options.stderr_verbose,
        };

        Ok(Self {
            options,
            stdout_sink,
            stderr_sink,
            pending: VecDeque::new(),
            interrupt,
        })
    }

    pub fn add_task(
        &mut self,
        torrent: impl Into<String>,
        media: impl Into<String>,
        command: ExternalCommand,
    ) -> Result<(), ProcessError> {
        let (torrent, media) = (torrent.into(), media.into());
        if self
            .pending
            .iter()
            .any(|task| task.torrent == torrent && task.media == media)
        {
            return Err(ProcessError::DuplicateTask { torrent, media });
        }
        self.pending.push_back(Pending {
            torrent,
            media,
            command,
            state: TaskState::Pending,
        });
        Ok(())
    }

    /// Marks a queued task cancelled; it will never start. Returns whether
    /// a pending task matched.
    pub fn cancel(&mut self, torrent: &str, media: &str) -> bool {
        match self.pending.iter_mut().find(|task| {
            task.torrent == torrent && task.media == media && task.state == TaskState::Pending
        }) {
            Some(task) => {
                task.state = TaskState::Cancelled;
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|task| task.state == TaskState::Pending)
            .count()
    }

    /// Runs every queued task, calling `on_complete` as each child is
    /// reaped. A panicking callback is logged and the run continues.
    pub async fn run<F>(&mut self, mut on_complete: F) -> ProcessReport
    where
        F: FnMut(&str, &str, &CommandOutcome),
    {
        let mut report = ProcessReport::new();
        let mut running = FuturesUnordered::new();

        loop {
            if self.interrupt.is_cancelled() {
                self.cancel_pending();
            }
            while running.len() < self.options.max_threads {
                let Some(task) = self.next_pending() else {
                    break;
                };
                running.push(self.start(task));
            }

            let Some(finished) = running.next().await else {
                break;
            };
            let Finished {
                torrent,
                media,
                outcome,
            } = finished;

            if panic::catch_unwind(AssertUnwindSafe(|| on_complete(&torrent, &media, &outcome)))
                .is_err()
            {
                error!(torrent = %torrent, media = %media, "completion callback panicked");
            }
            report
                .entry(torrent)
                .or_default()
                .push((media, outcome.exit_status));
        }
        report
    }

    fn next_pending(&mut self) -> Option<Pending> {
        while let Some(task) = self.pending.pop_front() {
            match task.state {
                TaskState::Pending => return Some(task),
                TaskState::Cancelled => {
                    debug!(torrent = %task.torrent, media = %task.media, "skipping cancelled task")
                }
            }
        }
        None
    }

    fn cancel_pending(&mut self) {
        for task in self.pending.iter_mut() {
            task.state = TaskState::Cancelled;
        }
    }

    fn start(&self, task: Pending) -> impl std::future::Future<Output = Finished> {
        let key = format!("{}.{}", task.torrent, task.media);
        let stdout = Channel::new("stdout", &key, &self.stdout_sink);
        let stderr = Channel::new("stderr", &key, &self.stderr_sink);
        let timeout = self.options.timeout;
        let interrupt = self.interrupt.clone();

        async move {
            let started = Instant::now();
            let outcome = match spawn(&task.command) {
                Ok(child) => {
                    info!(torrent = %task.torrent, media = %task.media, command = %task.command, "started");
                    supervise(child, stdout, stderr, timeout, interrupt, started).await
                }
                Err(err) => {
                    warn!(torrent = %task.torrent, media = %task.media, command = %task.command, error = %err, "could not start");
                    CommandOutcome {
                        exit_status: SPAWN_FAILED,
                        stderr: String::new(),
                        failures: vec![format!("cannot run {}: {err}", task.command.program)],
                        elapsed: started.elapsed(),
                    }
                }
            };
            Finished {
                torrent: task.torrent,
                media: task.media,
                outcome,
            }
        }
    }
}

fn spawn(command: &ExternalCommand) -> io::Result<Child> {
    Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signalled {
    No,
    Terminated,
    Killed,
}

async fn supervise(
    mut child: Child,
    mut stdout_sink: Channel,
    mut stderr_sink: Channel,
    timeout: Duration,
    interrupt: CancellationToken,
    started: Instant,
) -> CommandOutcome {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];
    let mut failures = Vec::new();
    let mut signalled = Signalled::No;

    let group = child.id();
    let mut deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);
    let mut exited: Option<io::Result<ExitStatus>> = None;
    let mut drain_until = None;

    let status = loop {
        if stdout.is_none() && stderr.is_none() {
            if let Some(status) = exited.take() {
                break status;
            }
        }
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf) => {
                pump(read, &mut stdout, &out_buf, &mut stdout_sink, &mut failures).await;
            }
            read = read_chunk(&mut stderr, &mut err_buf) => {
                pump(read, &mut stderr, &err_buf, &mut stderr_sink, &mut failures).await;
            }
            status = child.wait(), if exited.is_none() => {
                exited = Some(status);
                drain_until = Some(tokio::time::Instant::now() + PIPE_DRAIN);
            }
            _ = sleep_until(drain_until) => {
                // Descendants still hold the pipes open.
                debug!(pid = ?group, "child exited, closing pipes left open");
                stdout = None;
                stderr = None;
                drain_until = None;
            }
            _ = sleep_until(deadline), if exited.is_none() => {
                match signalled {
                    Signalled::No => {
                        failures.push(TIMED_OUT.to_string());
                        signal_group(group, libc::SIGTERM);
                        signalled = Signalled::Terminated;
                        deadline = Some(tokio::time::Instant::now() + KILL_GRACE);
                    }
                    _ => {
                        signal_group(group, libc::SIGKILL);
                        signalled = Signalled::Killed;
                        deadline = None;
                    }
                }
            }
            _ = interrupt.cancelled(), if exited.is_none() && signalled == Signalled::No => {
                failures.push(INTERRUPTED.to_string());
                signal_group(group, libc::SIGTERM);
                signalled = Signalled::Terminated;
                deadline = Some(tokio::time::Instant::now() + KILL_GRACE);
            }
        }
    };

    for sink in [&mut stdout_sink, &mut stderr_sink] {
        if let Err(err) = sink.finish().await {
            failures.push(format!("{} capture: {err}", sink.label()));
        }
    }

    let exit_status = match status {
        Ok(status) => exit_status_of(status),
        Err(err) => {
            failures.push(format!("wait failed: {err}"));
            -libc::SIGKILL
        }
    };

    CommandOutcome {
        exit_status,
        stderr: stderr_sink.contents(),
        failures,
        elapsed: started.elapsed(),
    }
}

async fn read_chunk<R>(pipe: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe.as_mut() {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Routes a read result; EOF and hard errors close the channel.
async fn pump<R>(
    read: io::Result<usize>,
    pipe: &mut Option<R>,
    buf: &[u8],
    sink: &mut Channel,
    failures: &mut Vec<String>,
) {
    match read {
        Ok(0) => *pipe = None,
        Ok(n) => {
            if let Err(err) = sink.write(&buf[..n]).await {
                failures.push(format!("{} capture: {err}", sink.label()));
            }
        }
        Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
        Err(err) => {
            failures.push(format!("{} read: {err}", sink.label()));
            *pipe = None;
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn signal_group(group: Option<u32>, signal: libc::c_int) {
    let Some(pid) = group else {
        return;
    };
    // The child leads its own process group, so its pid is the group id.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, signal) };
    if rc != 0 {
        debug!(pid, signal, error = %io::Error::last_os_error(), "killpg failed");
    }
}

/// `0` success, `N` exit code, `-N` killed by signal N.
fn exit_status_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        (None, None) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn sh(script: &str) -> ExternalCommand {
        ExternalCommand::new("sh").arg("-c").arg(script)
    }

    fn manager(options: ProcessOptions) -> ProcessManager {
        ProcessManager::new(options, CancellationToken::new()).unwrap()
    }

    type Seen = Arc<Mutex<Vec<(String, CommandOutcome)>>>;

    fn recorder() -> (Seen, impl FnMut(&str, &str, &CommandOutcome)) {
        let seen: Seen = Arc::default();
        let sink = Arc::clone(&seen);
        (seen, move |_torrent: &str, media: &str, outcome: &CommandOutcome| {
            sink.lock().unwrap().push((media.to_string(), outcome.clone()));
        })
    }

    #[tokio::test]
    async fn stderr_on_success_is_kept() {
        let mut manager = manager(ProcessOptions::default());
        manager
            .add_task("t", "a.mkv", sh("echo warming up >&2; exit 0"))
            .unwrap();
        let (seen, callback) = recorder();

        let report = manager.run(callback).await;
        assert_eq!(report["t"], vec![("a.mkv".to_string(), 0)]);

        let seen = seen.lock().unwrap();
        assert!(seen[0].1.success());
        assert_eq!(seen[0].1.stderr, "warming up\n");
    }

    #[tokio::test]
    async fn exit_codes_and_signals_are_classified() {
        let mut manager = manager(ProcessOptions::default());
        manager.add_task("t", "code", sh("exit 3")).unwrap();
        manager.add_task("t", "signal", sh("kill -9 $$")).unwrap();
        let (seen, callback) = recorder();
        manager.run(callback).await;

        let seen = seen.lock().unwrap();
        let by_media: HashMap<_, _> = seen.iter().cloned().collect();
        assert_eq!(by_media["code"].exit_status, 3);
        assert_eq!(by_media["code"].describe(), "Exited with error code 3");
        assert_eq!(by_media["signal"].exit_status, -9);
        assert_eq!(by_media["signal"].describe(), "Killed by signal 9");
    }

    #[tokio::test]
    async fn quota_limits_live_children() {
        let mut manager = manager(ProcessOptions {
            max_threads: 2,
            ..ProcessOptions::default()
        });
        for media in ["a", "b", "c"] {
            manager.add_task("t", media, sh("sleep 0.3")).unwrap();
        }
        let started = Instant::now();
        let report = manager.run(|_, _, _| {}).await;

        assert!(started.elapsed() >= Duration::from_millis(550));
        assert_eq!(report["t"].len(), 3);
        assert!(report["t"].iter().all(|(_, status)| *status == 0));
    }

    #[tokio::test]
    async fn zero_timeout_never_fires() {
        let mut manager = manager(ProcessOptions::default());
        manager.add_task("t", "slow", sh("sleep 0.2")).unwrap();
        let report = manager.run(|_, _, _| {}).await;
        assert_eq!(report["t"], vec![("slow".to_string(), 0)]);
    }

    #[tokio::test]
    async fn background_descendant_does_not_hold_the_child() {
        let mut manager = manager(ProcessOptions::default());
        manager
            .add_task("t", "forks", sh("echo parting words >&2; sleep 5 &"))
            .unwrap();
        let (seen, callback) = recorder();
        let started = Instant::now();
        let report = manager.run(callback).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(report["t"], vec![("forks".to_string(), 0)]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1.stderr, "parting words\n");
        assert!(seen[0].1.failures.is_empty());
    }

    #[tokio::test]
    async fn timeout_terminates_the_group() {
        let mut manager = manager(ProcessOptions {
            timeout: Duration::from_millis(200),
            ..ProcessOptions::default()
        });
        manager.add_task("t", "hung", sh("sleep 30")).unwrap();
        let (seen, callback) = recorder();
        let started = Instant::now();
        manager.run(callback).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        let seen = seen.lock().unwrap();
        let outcome = &seen[0].1;
        assert_eq!(outcome.failures, vec![TIMED_OUT.to_string()]);
        assert_eq!(outcome.exit_status, -libc::SIGTERM);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn cancelled_pending_task_never_starts() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let mut manager = manager(ProcessOptions::default());
        manager.add_task("t", "keep", sh("true")).unwrap();
        manager
            .add_task("t", "drop", sh(&format!("touch {}", marker.display())))
            .unwrap();

        assert!(manager.cancel("t", "drop"));
        assert!(!manager.cancel("t", "unknown"));
        assert_eq!(manager.pending_count(), 1);

        let (seen, callback) = recorder();
        let report = manager.run(callback).await;
        assert_eq!(report["t"], vec![("keep".to_string(), 0)]);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn interrupt_stops_running_and_pending() {
        let token = CancellationToken::new();
        let mut manager = ProcessManager::new(
            ProcessOptions {
                max_threads: 1,
                ..ProcessOptions::default()
            },
            token.clone(),
        )
        .unwrap();
        manager.add_task("t", "running", sh("sleep 30")).unwrap();
        manager.add_task("t", "queued", sh("true")).unwrap();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let (seen, callback) = recorder();
        let report = manager.run(callback).await;
        assert_eq!(report["t"].len(), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "running");
        assert_eq!(seen[0].1.failures, vec![INTERRUPTED.to_string()]);
    }

    #[tokio::test]
    async fn output_is_captured_per_task() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut manager = manager(ProcessOptions {
            stdout_dir: Some(dir.path().join("out")),
            stdout_buffer: true,
            ..ProcessOptions::default()
        });
        manager.add_task("t", "a.mkv", sh("echo sent")).unwrap();
        manager.run(|_, _, _| {}).await;

        let captured = std::fs::read_to_string(dir.path().join("out").join("t.a.mkv")).unwrap();
        assert_eq!(captured, "sent\n");
    }

    #[tokio::test]
    async fn missing_program_is_a_failed_task() {
        let mut manager = manager(ProcessOptions::default());
        manager
            .add_task("t", "a", ExternalCommand::new("/nonexistent/seedmgr-rsync"))
            .unwrap();
        let (seen, callback) = recorder();
        manager.run(callback).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1.exit_status, SPAWN_FAILED);
        assert!(!seen[0].1.success());
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_the_loop() {
        let mut manager = manager(ProcessOptions {
            max_threads: 1,
            ..ProcessOptions::default()
        });
        manager.add_task("t", "first", sh("true")).unwrap();
        manager.add_task("t", "second", sh("true")).unwrap();
        let report = manager
            .run(|_, media, _| {
                if media == "first" {
                    panic!("callback bug");
                }
            })
            .await;
        assert_eq!(report["t"].len(), 2);
    }

    #[test]
    fn setup_errors() {
        assert!(matches!(
            ProcessManager::new(
                ProcessOptions {
                    max_threads: 0,
                    ..ProcessOptions::default()
                },
                CancellationToken::new()
            ),
            Err(ProcessError::NoWorkers)
        ));
        let mut manager = manager(ProcessOptions::default());
        manager.add_task("t", "a", sh("true")).unwrap();
        assert!(matches!(
            manager.add_task("t", "a", sh("true")),
            Err(ProcessError::DuplicateTask { .. })
        ));
    }
}
