//! Stream job module
//!
//! A [`StreamJob`] owns one transcoder process pulling an RTSP source and
//! writing an HLS playlist. It moves through
//! `Idle -> Preparing -> Starting -> Running -> Stopping -> Terminated`, with
//! `Error` reachable from any non-terminal state. Output lines are classified
//! by reader tasks and consumed by a single monitor task, so every state
//! transition after launch happens on the monitor.

use crate::classify::{classify_line, readiness_path, OutputEvent};
use crate::concurrency::{VendorQuotas, VendorUsage};
use crate::config::Config;
use crate::encode::{
    apply_selection, build_transcode_args, ensure_codecs, select_codecs, AssembleError,
    EncodeConfiguration, SelectError, TranscodeArgs,
};
use crate::gpu::{GpuOracle, Vendor};
use crate::identity::{Credentials, Resolution, StreamIdentity};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Total time a stop spends asking the transcoder to quit before killing it
pub const STOP_BUDGET: Duration = Duration::from_secs(4);

/// Interval between quit requests during a stop
pub const STOP_ATTEMPT_INTERVAL: Duration = Duration::from_secs(1);

/// Time allowed for already-captured output to be consumed after exit
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Keystroke that makes the transcoder finalize its output and exit
const QUIT_COMMAND: &[u8] = b"q";

/// Error type for job operations
#[derive(Debug, Error)]
pub enum JobError {
    /// Output directory could not be prepared
    #[error("Failed to prepare output directory: {0}")]
    Prepare(#[source] std::io::Error),

    /// No usable encoder or decoder
    #[error(transparent)]
    Select(#[from] SelectError),

    /// Command line could not be assembled
    #[error(transparent)]
    Assemble(#[from] AssembleError),

    /// Transcoder process could not be launched
    #[error("Failed to launch transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// Transcoder reported a fatal error before the stream became ready
    #[error("Preload exception: {0}")]
    Startup(String),

    /// Transcoder exited before the stream became ready
    #[error("Transcoder exited before the stream became ready ({0})")]
    Exited(String),

    /// Start was rejected before launch; carries the rejection message
    #[error("Job failed to start: {0}")]
    Rejected(String),

    /// Job was stopped before it became ready
    #[error("Job was stopped before it became ready")]
    Stopped,

    /// Registry is shutting down and admits no new streams
    #[error("Registry is shutting down")]
    Closed,
}

/// Lifecycle state of a stream job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Preparing,
    Starting,
    Running,
    Stopping,
    Terminated,
    Error(String),
}

impl JobState {
    /// Convert state to string for status output
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Idle => "idle",
            JobState::Preparing => "preparing",
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Stopping => "stopping",
            JobState::Terminated => "terminated",
            JobState::Error(_) => "error",
        }
    }

    /// Terminated or Error; no further transitions happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Terminated | JobState::Error(_))
    }
}

/// Why a readiness wait resolved without the stream becoming ready
#[derive(Debug, Clone, PartialEq, Eq)]
enum StartFailure {
    Fatal(String),
    Exited(String),
    Rejected(String),
    Stopped,
}

impl StartFailure {
    fn from_error(err: &JobError) -> Self {
        match err {
            JobError::Stopped => StartFailure::Stopped,
            JobError::Startup(msg) => StartFailure::Fatal(msg.clone()),
            JobError::Exited(msg) => StartFailure::Exited(msg.clone()),
            other => StartFailure::Rejected(other.to_string()),
        }
    }

    fn message(&self) -> String {
        self.clone().into_error().to_string()
    }

    fn into_error(self) -> JobError {
        match self {
            StartFailure::Fatal(msg) => JobError::Startup(msg),
            StartFailure::Exited(msg) => JobError::Exited(msg),
            StartFailure::Rejected(msg) => JobError::Rejected(msg),
            StartFailure::Stopped => JobError::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Failed(StartFailure),
}

/// Callback fired once when a job reaches a terminal state
pub type ExitCallback = Box<dyn FnOnce(&StreamJob) + Send>;

/// Settings shared by every job of a registry
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub base_dir: PathBuf,
    pub program: PathBuf,
    pub global_args: Vec<String>,
    pub segment_duration: u32,
    pub segment_list_size: u32,
    pub intel_fallback_segment_duration: u32,
    pub quotas: VendorQuotas,
}

impl JobSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            base_dir: cfg.stream.base_dir.clone(),
            program: cfg.transcoder.program.clone(),
            global_args: cfg.transcoder.global_args.clone(),
            segment_duration: cfg.stream.segment_duration_secs,
            segment_list_size: cfg.stream.segment_list_size,
            intel_fallback_segment_duration: cfg.stream.intel_fallback_segment_duration_secs,
            quotas: VendorQuotas::derive(&cfg.quotas),
        }
    }
}

/// Inputs of a single start attempt
pub struct StartContext<'a> {
    pub settings: &'a JobSettings,
    pub oracle: Arc<dyn GpuOracle>,
    /// Encoder usage of the other live jobs when this one starts
    pub usage: VendorUsage,
    pub resolution: Resolution,
    pub credentials: Option<Credentials>,
}

/// Point-in-time view of a job for status output
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub identity: StreamIdentity,
    pub state: JobState,
    pub vendor: Option<Vendor>,
    pub pid: Option<u32>,
    pub output_path: PathBuf,
    pub uptime_secs: u64,
}

struct JobInner {
    state: JobState,
    configuration: Option<Arc<EncodeConfiguration>>,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
    exit_callbacks: Vec<ExitCallback>,
    stop_requested: bool,
}

/// One transcoder process producing one HLS stream
pub struct StreamJob {
    id: Uuid,
    identity: StreamIdentity,
    output_path: PathBuf,
    created_at: Instant,
    inner: Mutex<JobInner>,
    ready_tx: watch::Sender<Readiness>,
    terminated_tx: watch::Sender<bool>,
    kill: Notify,
}

impl std::fmt::Debug for StreamJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamJob")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl StreamJob {
    /// Create an idle job writing below `base_dir`
    pub fn new(identity: StreamIdentity, base_dir: &Path) -> Self {
        let output_path = identity.output_path(base_dir);
        let (ready_tx, _) = watch::channel(Readiness::Pending);
        let (terminated_tx, _) = watch::channel(false);

        Self {
            id: Uuid::new_v4(),
            identity,
            output_path,
            created_at: Instant::now(),
            inner: Mutex::new(JobInner {
                state: JobState::Idle,
                configuration: None,
                stdin: None,
                pid: None,
                exit_callbacks: Vec::new(),
                stop_requested: false,
            }),
            ready_tx,
            terminated_tx,
            kill: Notify::new(),
        }
    }

    /// Instance id, distinct for every job ever created
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Playlist path; fixed for the job's lifetime
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn output_dir(&self) -> &Path {
        self.output_path.parent().unwrap_or(&self.output_path)
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().state.clone()
    }

    /// Configuration of the running process, absent outside Starting..Stopping
    pub fn configuration(&self) -> Option<Arc<EncodeConfiguration>> {
        self.inner.lock().configuration.clone()
    }

    /// Encoder vendor held by this job while it is live
    pub fn encoder_vendor(&self) -> Option<Vendor> {
        let inner = self.inner.lock();
        if inner.state.is_terminal() {
            return None;
        }
        inner.configuration.as_ref().map(|cfg| cfg.vendor())
    }

    pub fn status(&self) -> JobStatus {
        let inner = self.inner.lock();
        JobStatus {
            id: self.id,
            identity: self.identity.clone(),
            state: inner.state.clone(),
            vendor: inner.configuration.as_ref().map(|cfg| cfg.vendor()),
            pid: inner.pid,
            output_path: self.output_path.clone(),
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }

    /// Register a callback for the terminal transition
    ///
    /// Runs immediately when the job is already terminal.
    pub fn on_exit(&self, callback: ExitCallback) {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_terminal() {
                inner.exit_callbacks.push(callback);
                return;
            }
        }
        callback(self);
    }

    /// Launch the transcoder and wait until the stream is ready
    ///
    /// A job that already left `Idle` returns immediately. On failure the
    /// job is terminal in `Error` and its exit callbacks have run.
    pub async fn start(self: &Arc<Self>, ctx: StartContext<'_>) -> Result<(), JobError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != JobState::Idle {
                debug!(stream = %self.identity, state = inner.state.as_str(), "Start ignored, job already started");
                return Ok(());
            }
            inner.state = JobState::Preparing;
        }

        let launched = match self.prepare(&ctx).await {
            Ok((cfg, args)) => self.launch(ctx.settings, cfg, args),
            Err(e) => Err(e),
        };

        if let Err(e) = launched {
            let failure = StartFailure::from_error(&e);
            let state = if failure == StartFailure::Stopped {
                info!(stream = %self.identity, "Stream stopped before launch");
                JobState::Terminated
            } else {
                error!(stream = %self.identity, error = %e, "Failed to start stream");
                JobState::Error(e.to_string())
            };
            self.terminate(state, Some(failure));
            return Err(e);
        }

        self.await_ready().await
    }

    /// Build the encode configuration and its command line
    ///
    /// Filesystem work and the device query run on the blocking pool.
    async fn prepare(
        &self,
        ctx: &StartContext<'_>,
    ) -> Result<(EncodeConfiguration, TranscodeArgs), JobError> {
        let output_path = self.output_path.clone();
        let oracle = Arc::clone(&ctx.oracle);
        let devices = tokio::task::spawn_blocking(move || {
            prepare_output(&output_path)?;
            Ok::<_, JobError>(oracle.devices())
        })
        .await
        .map_err(|e| JobError::Prepare(std::io::Error::other(e)))??;

        let settings = ctx.settings;
        let mut cfg = EncodeConfiguration::for_source(self.identity.clone());
        cfg.credentials = ctx.credentials.clone();
        cfg.resolution = Some(ctx.resolution);
        cfg.segment_duration = Some(settings.segment_duration);
        cfg.segment_list_size = Some(settings.segment_list_size);
        cfg.save_path = Some(self.output_path.clone());

        let selection = select_codecs(ctx.resolution.width, &devices, &ctx.usage, &settings.quotas);
        apply_selection(&mut cfg, selection, settings.intel_fallback_segment_duration);
        ensure_codecs(&cfg)?;

        let args = build_transcode_args(&cfg)?;
        Ok((cfg, args))
    }

    /// Spawn the transcoder and hand it to the monitor task
    fn launch(
        self: &Arc<Self>,
        settings: &JobSettings,
        cfg: EncodeConfiguration,
        args: TranscodeArgs,
    ) -> Result<(), JobError> {
        if self.inner.lock().stop_requested {
            return Err(JobError::Stopped);
        }

        info!(
            stream = %self.identity,
            vendor = %cfg.vendor(),
            args = %args.redacted(),
            "Launching transcoder"
        );

        let mut child = Command::new(&settings.program)
            .args(&settings.global_args)
            .args(args.as_slice())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(JobError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        {
            let mut inner = self.inner.lock();
            if inner.stop_requested {
                drop(inner);
                if let Err(e) = child.start_kill() {
                    warn!(stream = %self.identity, error = %e, "Failed to kill transcoder");
                }
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                return Err(JobError::Stopped);
            }
            inner.state = JobState::Starting;
            inner.configuration = Some(Arc::new(cfg));
            inner.stdin = child.stdin.take();
            inner.pid = child.id();
        }

        let expected: Arc<str> =
            Arc::from(readiness_path(&self.output_path.to_string_lossy()).as_str());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = stdout {
            spawn_reader(stdout, Arc::clone(&expected), event_tx.clone());
        }
        if let Some(stderr) = stderr {
            spawn_reader(stderr, expected, event_tx);
        }

        let job = Arc::clone(self);
        tokio::spawn(async move { job.monitor(child, event_rx).await });
        Ok(())
    }

    /// Drive the job from classified output until the process exits
    async fn monitor(self: Arc<Self>, mut child: Child, mut events: mpsc::UnboundedReceiver<OutputEvent>) {
        let mut trail = ErrorTrail::default();
        let mut kill_deadline: Option<tokio::time::Instant> = None;

        let status = loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    if self.handle_event(event, &mut trail) && kill_deadline.is_none() {
                        // Give the transcoder a moment to exit on its own
                        kill_deadline = Some(tokio::time::Instant::now() + STOP_ATTEMPT_INTERVAL);
                    }
                }
                status = child.wait() => break status,
                _ = self.kill.notified() => {
                    break kill_and_wait(&mut child, &self.identity).await;
                }
                _ = sleep_until_deadline(kill_deadline), if kill_deadline.is_some() => {
                    break kill_and_wait(&mut child, &self.identity).await;
                }
            }
        };

        let _ = timeout(OUTPUT_DRAIN_GRACE, async {
            while let Some(event) = events.recv().await {
                self.handle_event(event, &mut trail);
            }
        })
        .await;

        let code = status.as_ref().ok().and_then(|s| s.code());
        let success = status.as_ref().map(|s| s.success()).unwrap_or(false);
        let ready = *self.ready_tx.borrow() == Readiness::Ready;
        let stop_requested = self.inner.lock().stop_requested;

        if !success && trail.startup_failure.is_none() && !stop_requested {
            error!(
                stream = %self.identity,
                code = ?code,
                reason = %trail.summary(code),
                "Transcoder exited unexpectedly"
            );
        } else {
            info!(stream = %self.identity, code = ?code, "Transcoder exited");
        }

        let (state, failure) = if let Some(failure) = trail.startup_failure.take() {
            (JobState::Error(failure.message()), Some(failure))
        } else if ready {
            (JobState::Terminated, None)
        } else if stop_requested {
            (JobState::Terminated, Some(StartFailure::Stopped))
        } else {
            let failure = StartFailure::Exited(trail.summary(code));
            (JobState::Error(failure.message()), Some(failure))
        };

        self.terminate(state, failure);
    }

    /// Apply one output event; returns true when it failed startup
    fn handle_event(&self, event: OutputEvent, trail: &mut ErrorTrail) -> bool {
        let fatal = event.is_fatal();
        match event {
            OutputEvent::Opened => {
                let became_ready = self.ready_tx.send_if_modified(|r| {
                    if *r == Readiness::Pending {
                        *r = Readiness::Ready;
                        true
                    } else {
                        false
                    }
                });
                if became_ready {
                    let mut inner = self.inner.lock();
                    if inner.state == JobState::Starting {
                        inner.state = JobState::Running;
                    }
                    drop(inner);
                    info!(stream = %self.identity, "Stream ready");
                }
                false
            }
            OutputEvent::Error(msg) => {
                warn!(stream = %self.identity, "{}", msg);
                trail.last = Some(msg);
                false
            }
            OutputEvent::InnerError(msg) => {
                warn!(stream = %self.identity, "{}", msg);
                trail.inner = Some(msg);
                false
            }
            OutputEvent::Fatal(msg) | OutputEvent::InnerFatal(msg) => {
                error!(stream = %self.identity, "{}", msg);
                let pending = *self.ready_tx.borrow() == Readiness::Pending;
                let failed_startup = fatal && pending && trail.startup_failure.is_none();
                if failed_startup {
                    trail.startup_failure = Some(StartFailure::Fatal(trail.compose(&msg)));
                }
                trail.last = Some(msg);
                failed_startup
            }
            OutputEvent::Other => false,
        }
    }

    /// Single terminal transition
    ///
    /// Exit callbacks run before a pending readiness wait is failed, so
    /// waiters never observe a job that is still registered.
    fn terminate(&self, state: JobState, failure: Option<StartFailure>) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = state;
            std::mem::take(&mut inner.exit_callbacks)
        };

        for callback in callbacks {
            callback(self);
        }

        {
            let mut inner = self.inner.lock();
            inner.configuration = None;
            inner.stdin = None;
            inner.pid = None;
        }

        if let Some(failure) = failure {
            self.ready_tx.send_if_modified(|r| {
                if *r == Readiness::Pending {
                    *r = Readiness::Failed(failure);
                    true
                } else {
                    false
                }
            });
        }
        self.terminated_tx.send_replace(true);
    }

    /// Wait until the stream is ready or has failed to become ready
    pub async fn await_ready(&self) -> Result<(), JobError> {
        let mut rx = self.ready_tx.subscribe();
        let outcome = rx
            .wait_for(|r| *r != Readiness::Pending)
            .await
            .map(|r| r.clone());

        match outcome {
            Ok(Readiness::Ready) => Ok(()),
            Ok(Readiness::Failed(failure)) => Err(failure.into_error()),
            Ok(Readiness::Pending) | Err(_) => Err(JobError::Stopped),
        }
    }

    /// Wait until the job is terminal
    pub async fn wait_terminated(&self) {
        let mut rx = self.terminated_tx.subscribe();
        let _ = rx.wait_for(|terminated| *terminated).await;
    }

    /// Gracefully stop the transcoder
    ///
    /// Sends the quit keystroke once per second for up to four seconds, then
    /// kills the process. Returns once the job is terminal, or right away when
    /// it never launched or another stop is already escalating.
    pub async fn stop(&self) {
        let plan = {
            let mut inner = self.inner.lock();
            inner.stop_requested = true;
            let state = inner.state.clone();
            match state {
                JobState::Starting | JobState::Running => {
                    inner.state = JobState::Stopping;
                    StopPlan::Escalate(inner.stdin.take())
                }
                JobState::Preparing | JobState::Stopping => StopPlan::Wait,
                JobState::Idle | JobState::Terminated | JobState::Error(_) => StopPlan::Nothing,
            }
        };

        let mut stdin = match plan {
            StopPlan::Escalate(stdin) => stdin,
            StopPlan::Wait => return self.wait_terminated().await,
            StopPlan::Nothing => return,
        };

        info!(stream = %self.identity, "Stopping stream");
        let mut terminated = self.terminated_tx.subscribe();
        let started = Instant::now();

        while started.elapsed() < STOP_BUDGET {
            if let Some(pipe) = stdin.as_mut() {
                if send_quit(pipe).await.is_err() {
                    stdin = None;
                }
            }
            if timeout(STOP_ATTEMPT_INTERVAL, terminated.wait_for(|t| *t))
                .await
                .is_ok()
            {
                return;
            }
        }

        warn!(stream = %self.identity, "Transcoder ignored quit requests, killing");
        self.kill.notify_one();
        let _ = terminated.wait_for(|t| *t).await;
    }
}

enum StopPlan {
    Escalate(Option<ChildStdin>),
    Wait,
    Nothing,
}

/// Resolve a segment file written next to the job's playlist
///
/// Only bare file names are accepted; anything that could leave the output
/// directory yields `None`.
pub fn resolve_segment_path(job: &StreamJob, file_name: &str) -> Option<PathBuf> {
    let invalid = file_name.is_empty()
        || file_name == "."
        || file_name.contains("..")
        || file_name.contains('/')
        || file_name.contains('\\');
    if invalid {
        return None;
    }
    Some(job.output_dir().join(file_name))
}

/// Create the playlist directory or clear a stale playlist from it
fn prepare_output(output_path: &Path) -> Result<(), JobError> {
    match output_path.parent() {
        Some(dir) if !dir.exists() => std::fs::create_dir_all(dir).map_err(JobError::Prepare),
        _ if output_path.exists() => std::fs::remove_file(output_path).map_err(JobError::Prepare),
        _ => Ok(()),
    }
}

/// Captured error lines used to describe a failed process
#[derive(Default)]
struct ErrorTrail {
    last: Option<String>,
    inner: Option<String>,
    startup_failure: Option<StartFailure>,
}

impl ErrorTrail {
    /// Combine the last inner error with `msg`
    fn compose(&self, msg: &str) -> String {
        match &self.inner {
            Some(inner) => format!("{} -> {}", inner, msg),
            None => msg.to_string(),
        }
    }

    fn summary(&self, code: Option<i32>) -> String {
        match (&self.inner, &self.last) {
            (_, Some(last)) => self.compose(last),
            (Some(inner), None) => inner.clone(),
            (None, None) => match code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            },
        }
    }
}

fn spawn_reader<R>(stream: R, expected: Arc<str>, events: mpsc::UnboundedSender<OutputEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Transcoder output closed");
                    break;
                }
            }

            // Source metadata is not always UTF-8
            let line = String::from_utf8_lossy(&buf);
            // Progress updates are separated by carriage returns
            for piece in line.trim_end_matches(['\n', '\r']).split('\r') {
                let event = classify_line(piece, &expected);
                if event != OutputEvent::Other && events.send(event).is_err() {
                    return;
                }
            }
        }
    });
}

async fn send_quit(pipe: &mut ChildStdin) -> std::io::Result<()> {
    pipe.write_all(QUIT_COMMAND).await?;
    pipe.flush().await
}

async fn kill_and_wait(
    child: &mut Child,
    identity: &StreamIdentity,
) -> std::io::Result<std::process::ExitStatus> {
    if let Err(e) = child.start_kill() {
        warn!(stream = %identity, error = %e, "Failed to kill transcoder");
    }
    child.wait().await
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Behaviour of the fake transcoder script
    #[derive(Debug, Clone, Copy)]
    pub enum FakeTranscoder {
        /// Announces the playlist, then exits on the first stdin byte
        Ready,
        /// Prints a fatal line and exits with status 1
        Fatal,
        /// Exits with status 3 without printing anything
        Crash,
        /// Announces the playlist and ignores quit requests
        Stubborn,
        /// Like `Ready`, after a metadata line that is not valid UTF-8
        NonUtf8Metadata,
    }

    impl FakeTranscoder {
        fn body(self) -> &'static str {
            match self {
                FakeTranscoder::Ready => {
                    "for last; do :; done\n\
                     echo \"[hls @ 0x1] Opening '${last}.tmp' for writing\" >&2\n\
                     head -c 1 >/dev/null\n\
                     exit 0\n"
                }
                FakeTranscoder::Fatal => {
                    "echo '[rtsp @ 0x2] [error] method DESCRIBE failed: 401 Unauthorized' >&2\n\
                     echo '[fatal] Invalid data found when processing input' >&2\n\
                     exit 1\n"
                }
                FakeTranscoder::Crash => "exit 3\n",
                FakeTranscoder::Stubborn => {
                    "for last; do :; done\n\
                     echo \"[hls @ 0x1] Opening '${last}.tmp' for writing\" >&2\n\
                     exec sleep 30\n"
                }
                FakeTranscoder::NonUtf8Metadata => {
                    "printf '    title           : \\262\\342\\312\\324\\n' >&2\n\
                     for last; do :; done\n\
                     echo \"[hls @ 0x1] Opening '${last}.tmp' for writing\" >&2\n\
                     head -c 1 >/dev/null\n\
                     exit 0\n"
                }
            }
        }

        /// Write the script into `dir` and return its path; run it through `sh`
        pub fn install(self, dir: &Path) -> PathBuf {
            let script = dir.join("fake-transcoder.sh");
            std::fs::write(&script, format!("#!/bin/sh\n{}", self.body())).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
            script
        }

        /// Install the script and return settings that launch it
        pub fn settings(self, dir: &Path) -> JobSettings {
            let script = self.install(dir);

            JobSettings {
                base_dir: dir.join("hls"),
                program: PathBuf::from("sh"),
                global_args: vec![script.to_string_lossy().to_string()],
                segment_duration: 1,
                segment_list_size: 5,
                intel_fallback_segment_duration: 2,
                quotas: VendorQuotas::default(),
            }
        }
    }
}
