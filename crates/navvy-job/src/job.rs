//! External process jobs with buffered or streamed output capture.
//!
//! A [`Job`] wraps one OS process behind a cheap-clone handle. `start` spawns
//! the process and wires up to three helper tasks: one reader per output pipe
//! and an optional stdin writer. A supervisor task waits for the exit, drains
//! the readers, finalizes line buffers, records the exit exactly once, marks
//! the job done and resumes everyone blocked in [`Job::wait`].
//!
//! ```text
//!   start ──▶ spawn ──▶ stdout reader ──┐
//!                       stderr reader ──┼──▶ supervisor ──▶ waiters, exit hooks
//!                       stdin writer ───┘
//! ```
//!
//! Handles stay valid across runs: once a run finished, `start` resets the
//! run state and launches the process again. Output can be consumed three
//! ways: recorded line vectors, per-line hooks, or a [`ListStream`] that the
//! supervisor closes at exit.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use navvy_core::runtime::{self, TaskHandle};
use navvy_core::stream::ListStream;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use crate::config::{JobConfig, OutputMode, StdinPayload, DEFAULT_SYNC_TIMEOUT};
use crate::line::{split_lines, LineBuffer};

/// How often [`Job::sync`] and the exit supervisor poll for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signal delivered by [`Job::kill`]: SIGKILL.
const HARD_KILL_SIGNAL: i32 = 9;

/// Final result of one process run.
///
/// Immutable once recorded: either the supervisor derives it from the OS
/// exit status, or [`Job::kill`] pre-records the caller's values and the
/// supervisor keeps them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Exit {
    /// Exit code; `-1` when the process died without one.
    pub code: i32,
    /// Terminating signal, when known.
    pub signal: Option<i32>,
}

impl Exit {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal {
            Some(signal) => write!(f, "code {} (signal {})", self.code, signal),
            None => write!(f, "code {}", self.code),
        }
    }
}

/// Errors surfaced by job control.
///
/// Output pipe read/write failures are not errors: they are logged and the
/// affected pipe is treated as closed.
#[derive(Debug, Error)]
pub enum JobError {
    /// The process could not be spawned.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    /// `start` or `reset` was called while a run is still in flight.
    #[error("job '{label}' is already running")]
    AlreadyRunning { label: String },
    /// A synchronous wait outlived its budget.
    #[error("job '{label}' did not finish within {budget:?}")]
    Timeout { label: String, budget: Duration },
    /// The interrupt token fired during a synchronous wait.
    #[error("wait for job '{label}' was interrupted")]
    Interrupted { label: String },
}

type ExitHook = Box<dyn FnMut(&Exit) + Send>;
type LineHook = Box<dyn FnMut(&str) + Send>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    fn name(self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
        }
    }
}

/// Mutable state of the current (or last) run.
#[derive(Default)]
struct RunState {
    started: bool,
    done: bool,
    pid: Option<u32>,
    exit: Option<Exit>,
    stdout_lines: Vec<String>,
    stderr_lines: Vec<String>,
    waiters: Vec<oneshot::Sender<Exit>>,
}

impl RunState {
    /// Clear the previous run's results. Waiters registered before the run
    /// are kept; they resolve at this run's exit.
    fn reset_run(&mut self) {
        self.done = false;
        self.pid = None;
        self.exit = None;
        self.stdout_lines.clear();
        self.stderr_lines.clear();
    }
}

#[derive(Default)]
struct Listeners {
    exit: Vec<ExitHook>,
    stdout: Vec<LineHook>,
    stderr: Vec<LineHook>,
}

/// Output streams attached to the run in flight. The supervisor takes and
/// closes them at exit; `finished` tells late requests to replay instead.
#[derive(Default)]
struct ChannelStreams {
    stdout: Option<ListStream<String>>,
    stderr: Option<ListStream<String>>,
    finished: bool,
}

struct JobInner {
    config: JobConfig,
    state: Mutex<RunState>,
    listeners: Mutex<Listeners>,
    streams: Mutex<ChannelStreams>,
    child: Mutex<Option<Child>>,
}

impl JobInner {
    fn label(&self) -> &str {
        self.config.label.as_deref().unwrap_or(&self.config.command)
    }
}

/// Cheap-clone handle to one external process job.
///
/// All clones share the same run state, listener registry and child process,
/// so a job can be started from one task, observed from another and killed
/// from a third.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub fn new(config: JobConfig) -> Self {
        Self {
            inner: Arc::new(JobInner {
                config,
                state: Mutex::new(RunState::default()),
                listeners: Mutex::new(Listeners::default()),
                streams: Mutex::new(ChannelStreams::default()),
                child: Mutex::new(None),
            }),
        }
    }

    /// Launch the process.
    ///
    /// Resets any prior finished run, spawns the child with piped stdio and
    /// wires the reader, writer and supervisor tasks. Fails with
    /// [`JobError::AlreadyRunning`] while a run is in flight and with
    /// [`JobError::Spawn`] when the OS refuses the process; a spawn failure
    /// leaves the job unstarted so a later retry can call `start` again.
    pub async fn start(&self) -> Result<(), JobError> {
        {
            let mut st = lock(&self.inner.state);
            if st.started && !st.done {
                return Err(JobError::AlreadyRunning {
                    label: self.label().to_string(),
                });
            }
            st.reset_run();
            st.started = true;
        }
        lock(&self.inner.streams).finished = false;

        let config = &self.inner.config;
        let mut command = Command::new(&config.command);
        command.args(&config.args);
        if let Some(dir) = &config.cwd {
            command.current_dir(dir);
        }
        if config.clear_env {
            command.env_clear();
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }
        command
            .stdin(if config.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let mut st = lock(&self.inner.state);
                st.started = false;
                return Err(JobError::Spawn {
                    command: config.command.clone(),
                    source: err,
                });
            }
        };

        let pid = child.id();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdin_pipe = child.stdin.take();

        lock(&self.inner.state).pid = pid;
        *lock(&self.inner.child) = Some(child);

        tracing::debug!(target: "navvy::job", job = %self.label(), pid = ?pid, "job started");

        let label = self.label();
        let stdout_task = spawn_reader(self.inner.clone(), stdout_pipe, Channel::Stdout);
        let stderr_task = spawn_reader(self.inner.clone(), stderr_pipe, Channel::Stderr);
        let stdin_task = match (stdin_pipe, config.stdin.clone()) {
            (Some(pipe), Some(payload)) => Some(runtime::spawn(
                format!("job:{label}:stdin"),
                feed_stdin(self.inner.clone(), pipe, payload),
            )),
            _ => None,
        };

        runtime::spawn(
            format!("job:{label}:supervisor"),
            supervise(self.inner.clone(), stdout_task, stderr_task, stdin_task),
        );
        Ok(())
    }

    /// Resolve once the process exits.
    ///
    /// Waiting before `start` is fine: the waiter resolves at the next run's
    /// exit. Waiting on a finished run returns its exit immediately.
    pub async fn wait(&self) -> Exit {
        let rx = {
            let mut st = lock(&self.inner.state);
            if st.done {
                if let Some(exit) = st.exit.clone() {
                    return exit;
                }
            }
            let (tx, rx) = oneshot::channel();
            st.waiters.push(tx);
            rx
        };
        match rx.await {
            Ok(exit) => exit,
            // Supervisor dropped during runtime teardown.
            Err(_) => self.exit().unwrap_or(Exit {
                code: -1,
                signal: None,
            }),
        }
    }

    /// Start-then-wait convenience.
    pub async fn run(&self) -> Result<Exit, JobError> {
        self.start().await?;
        Ok(self.wait().await)
    }

    /// Synchronous-style wait with the default 30s budget.
    ///
    /// See [`Job::sync_within`].
    pub async fn sync(&self) -> Result<(Vec<String>, i32, Vec<String>), JobError> {
        self.sync_within(DEFAULT_SYNC_TIMEOUT).await
    }

    /// Start the job if it never ran, then poll for completion, yielding to
    /// the runtime between polls. Returns `(stdout lines, exit code, stderr
    /// lines)` on completion, [`JobError::Timeout`] once `budget` is spent,
    /// or [`JobError::Interrupted`] when the configured interrupt token
    /// fires during the wait. The process itself is left running in both
    /// error cases.
    pub async fn sync_within(
        &self,
        budget: Duration,
    ) -> Result<(Vec<String>, i32, Vec<String>), JobError> {
        if !self.is_started() {
            self.start().await?;
        }
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if self.is_done() {
                break;
            }
            if let Some(token) = &self.inner.config.interrupt {
                if token.is_cancelled() {
                    return Err(JobError::Interrupted {
                        label: self.label().to_string(),
                    });
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(JobError::Timeout {
                    label: self.label().to_string(),
                    budget,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        let st = lock(&self.inner.state);
        let code = st.exit.as_ref().map_or(-1, |exit| exit.code);
        Ok((st.stdout_lines.clone(), code, st.stderr_lines.clone()))
    }

    /// Forcibly terminate the process, recording `code` as the exit code and
    /// SIGKILL as the signal. No-op once the job exited.
    pub fn kill(&self, code: i32) {
        self.kill_with_signal(code, HARD_KILL_SIGNAL);
    }

    /// Like [`Job::kill`] with an explicit signal number.
    ///
    /// The given `(code, signal)` pair becomes the job's final exit values;
    /// the supervisor keeps them even after the OS reports its own status.
    /// On unix the signal is delivered as-is; elsewhere, and for signal
    /// numbers the platform rejects, termination falls back to the runtime's
    /// hard kill.
    pub fn kill_with_signal(&self, code: i32, signal: i32) {
        {
            let mut st = lock(&self.inner.state);
            if !st.started || st.done {
                return;
            }
            if st.exit.is_none() {
                st.exit = Some(Exit {
                    code,
                    signal: Some(signal),
                });
            }
        }
        let mut slot = lock(&self.inner.child);
        if let Some(child) = slot.as_mut() {
            terminate(child, signal, self.label());
        }
    }

    /// Return to the unstarted state, clearing recorded results.
    /// Refused while a run is in flight.
    pub fn reset(&self) -> Result<(), JobError> {
        let mut st = lock(&self.inner.state);
        if st.started && !st.done {
            return Err(JobError::AlreadyRunning {
                label: self.label().to_string(),
            });
        }
        st.started = false;
        st.reset_run();
        Ok(())
    }

    /// Register an exit hook, fired after every run completes.
    ///
    /// Hooks run on the supervisor task in insertion order. A hook must not
    /// register further listeners on the same job.
    pub fn on_exit(&self, hook: impl FnMut(&Exit) + Send + 'static) {
        lock(&self.inner.listeners).exit.push(Box::new(hook));
    }

    /// Register a per-line stdout hook. Fires in
    /// [`OutputMode::Streamed`] mode only, as lines complete.
    pub fn on_stdout_line(&self, hook: impl FnMut(&str) + Send + 'static) {
        lock(&self.inner.listeners).stdout.push(Box::new(hook));
    }

    /// Register a per-line stderr hook. Fires in
    /// [`OutputMode::Streamed`] mode only.
    pub fn on_stderr_line(&self, hook: impl FnMut(&str) + Send + 'static) {
        lock(&self.inner.listeners).stderr.push(Box::new(hook));
    }

    /// Live stdout as a [`ListStream`], closed by the exit supervisor.
    ///
    /// In streamed mode lines arrive as they complete; in buffered mode the
    /// whole line list arrives at exit, just before the close. Repeated
    /// calls during one run share a single stream. Requested after the run
    /// finished, the stream replays the recorded lines and closes.
    pub fn stdout_stream(&self) -> ListStream<String> {
        self.channel_stream(Channel::Stdout)
    }

    /// Live stderr as a [`ListStream`]. See [`Job::stdout_stream`].
    pub fn stderr_stream(&self) -> ListStream<String> {
        self.channel_stream(Channel::Stderr)
    }

    fn channel_stream(&self, channel: Channel) -> ListStream<String> {
        {
            let mut streams = lock(&self.inner.streams);
            if !streams.finished {
                let slot = match channel {
                    Channel::Stdout => &mut streams.stdout,
                    Channel::Stderr => &mut streams.stderr,
                };
                return slot.get_or_insert_with(ListStream::new).clone();
            }
        }
        // The supervisor already detached this run's streams; hand out a
        // replay of the recorded lines instead.
        let stream = ListStream::new();
        let replay = stream.clone();
        let lines = match channel {
            Channel::Stdout => self.stdout_lines(),
            Channel::Stderr => self.stderr_lines(),
        };
        runtime::spawn(
            format!("job:{}:{}:replay", self.label(), channel.name()),
            async move {
                replay.push_all(lines).await;
                replay.close().await;
            },
        );
        stream
    }

    pub fn config(&self) -> &JobConfig {
        &self.inner.config
    }

    pub fn label(&self) -> &str {
        self.inner.label()
    }

    /// Stdout captured so far. In buffered mode this is populated at exit;
    /// in streamed mode it grows as lines complete.
    pub fn stdout_lines(&self) -> Vec<String> {
        lock(&self.inner.state).stdout_lines.clone()
    }

    pub fn stderr_lines(&self) -> Vec<String> {
        lock(&self.inner.state).stderr_lines.clone()
    }

    pub fn exit(&self) -> Option<Exit> {
        lock(&self.inner.state).exit.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.inner.state).pid
    }

    pub fn is_started(&self) -> bool {
        lock(&self.inner.state).started
    }

    pub fn is_done(&self) -> bool {
        lock(&self.inner.state).done
    }

    pub fn has_output(&self) -> bool {
        !lock(&self.inner.state).stdout_lines.is_empty()
    }

    /// Start every not-yet-started job, then await all exits concurrently.
    ///
    /// The start loop aborts on the first spawn failure; jobs started before
    /// the failure keep running and stay observable through their handles.
    pub async fn join(jobs: &[Job]) -> Result<Vec<Exit>, JobError> {
        for job in jobs {
            if !job.is_started() {
                job.start().await?;
            }
        }
        Ok(futures::future::join_all(jobs.iter().map(|job| job.wait())).await)
    }

    /// Run jobs strictly one after another in list order, starting each as
    /// needed.
    pub async fn chain(jobs: &[Job]) -> Result<Vec<Exit>, JobError> {
        let mut exits = Vec::with_capacity(jobs.len());
        for job in jobs {
            if !job.is_started() {
                job.start().await?;
            }
            exits.push(job.wait().await);
        }
        Ok(exits)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("Job")
            .field("label", &self.label())
            .field("started", &st.started)
            .field("done", &st.done)
            .field("pid", &st.pid)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_reader<R>(
    inner: Arc<JobInner>,
    pipe: Option<R>,
    channel: Channel,
) -> TaskHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let label = format!("job:{}:{}", inner.label(), channel.name());
    match pipe {
        Some(pipe) => runtime::spawn(label, drain_pipe(inner, pipe, channel)),
        None => runtime::spawn(label, std::future::ready(Vec::new())),
    }
}

/// Read one output pipe to EOF. Buffered mode returns the raw bytes for the
/// supervisor to split; streamed mode assembles lines as chunks arrive,
/// fires the per-line hooks and feeds any attached stream, returning
/// nothing.
async fn drain_pipe<R>(inner: Arc<JobInner>, mut pipe: R, channel: Channel) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let streamed = inner.config.mode == OutputMode::Streamed;
    let mut raw = Vec::new();
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if streamed {
                    for line in lines.push(&buf[..n]) {
                        emit_line(&inner, channel, line).await;
                    }
                } else {
                    raw.extend_from_slice(&buf[..n]);
                }
            }
            Err(err) => {
                // Non-fatal: a failed pipe reads as closed.
                tracing::warn!(
                    target: "navvy::job",
                    job = %inner.label(),
                    channel = channel.name(),
                    "pipe read failed: {err}"
                );
                break;
            }
        }
    }
    if streamed {
        if let Some(tail) = lines.finish() {
            emit_line(&inner, channel, tail).await;
        }
    }
    raw
}

/// Record a completed line, fire the per-line hooks, then feed the attached
/// stream (outside every lock).
async fn emit_line(inner: &JobInner, channel: Channel, line: String) {
    {
        let mut st = lock(&inner.state);
        match channel {
            Channel::Stdout => st.stdout_lines.push(line.clone()),
            Channel::Stderr => st.stderr_lines.push(line.clone()),
        }
    }
    {
        let mut listeners = lock(&inner.listeners);
        let hooks = match channel {
            Channel::Stdout => &mut listeners.stdout,
            Channel::Stderr => &mut listeners.stderr,
        };
        for hook in hooks.iter_mut() {
            hook(&line);
        }
    }
    let attached = {
        let streams = lock(&inner.streams);
        match channel {
            Channel::Stdout => streams.stdout.clone(),
            Channel::Stderr => streams.stderr.clone(),
        }
    };
    if let Some(stream) = attached {
        stream.push(line).await;
    }
}

async fn feed_stdin(inner: Arc<JobInner>, mut pipe: ChildStdin, payload: StdinPayload) {
    let bytes = payload.into_bytes();
    if let Err(err) = pipe.write_all(&bytes).await {
        tracing::warn!(
            target: "navvy::job",
            job = %inner.label(),
            "stdin write failed: {err}"
        );
    }
    // Dropping the pipe sends EOF to the child.
}

/// Exit protocol, in order: wait for the process, drain the readers,
/// finalize buffers, record the exit exactly once, mark done, resume
/// waiters, fire exit hooks, close attached streams.
async fn supervise(
    inner: Arc<JobInner>,
    stdout_task: TaskHandle<Vec<u8>>,
    stderr_task: TaskHandle<Vec<u8>>,
    stdin_task: Option<TaskHandle<()>>,
) {
    let status = wait_for_exit(&inner).await;

    // The exit closed the pipes; the readers finish on their own.
    let stdout_raw = stdout_task.join().await.unwrap_or_default();
    let stderr_raw = stderr_task.join().await.unwrap_or_default();
    if let Some(writer) = stdin_task {
        let _ = writer.join().await;
    }

    *lock(&inner.child) = None;

    let (exit, waiters) = {
        let mut st = lock(&inner.state);
        if inner.config.mode == OutputMode::Buffered {
            st.stdout_lines = split_lines(&stdout_raw);
            st.stderr_lines = split_lines(&stderr_raw);
        }
        let exit = match st.exit.clone() {
            // kill() recorded the exit values first; keep them.
            Some(exit) => exit,
            None => {
                let exit = exit_from_status(status);
                st.exit = Some(exit.clone());
                exit
            }
        };
        st.done = true;
        (exit, std::mem::take(&mut st.waiters))
    };

    tracing::debug!(target: "navvy::job", job = %inner.label(), %exit, "job finished");

    for waiter in waiters {
        let _ = waiter.send(exit.clone());
    }

    {
        let mut listeners = lock(&inner.listeners);
        for hook in listeners.exit.iter_mut() {
            hook(&exit);
        }
    }

    // Detach this run's streams; late requests replay from the record.
    let (stdout_stream, stderr_stream) = {
        let mut streams = lock(&inner.streams);
        streams.finished = true;
        (streams.stdout.take(), streams.stderr.take())
    };
    let buffered = inner.config.mode == OutputMode::Buffered;
    if let Some(stream) = stdout_stream {
        if buffered {
            let lines = lock(&inner.state).stdout_lines.clone();
            stream.push_all(lines).await;
        }
        stream.close().await;
    }
    if let Some(stream) = stderr_stream {
        if buffered {
            let lines = lock(&inner.state).stderr_lines.clone();
            stream.push_all(lines).await;
        }
        stream.close().await;
    }
}

/// Poll the child until the OS reports its exit status.
async fn wait_for_exit(inner: &JobInner) -> Option<std::process::ExitStatus> {
    loop {
        let polled = {
            let mut slot = lock(&inner.child);
            match slot.as_mut() {
                Some(child) => child.try_wait(),
                None => return None,
            }
        };
        match polled {
            Ok(Some(status)) => return Some(status),
            Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(err) => {
                tracing::warn!(target: "navvy::job", job = %inner.label(), "wait failed: {err}");
                return None;
            }
        }
    }
}

fn exit_from_status(status: Option<std::process::ExitStatus>) -> Exit {
    let Some(status) = status else {
        return Exit {
            code: -1,
            signal: None,
        };
    };
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;
    Exit {
        code: status.code().unwrap_or(-1),
        signal,
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child, signal: i32, label: &str) {
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;

    let delivered = match (child.id(), Signal::try_from(signal)) {
        (Some(pid), Ok(sig)) => nix::sys::signal::kill(Pid::from_raw(pid as i32), sig).is_ok(),
        _ => false,
    };
    if !delivered {
        if let Err(err) = child.start_kill() {
            tracing::warn!(target: "navvy::job", job = %label, "kill failed: {err}");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, signal: i32, label: &str) {
    let _ = signal;
    if let Err(err) = child.start_kill() {
        tracing::warn!(target: "navvy::job", job = %label, "kill failed: {err}");
    }
}
