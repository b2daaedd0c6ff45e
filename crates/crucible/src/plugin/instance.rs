//! Plugin Instance - one supervised plugin process
//!
//! An instance owns exactly one OS process plus its channel pair, and walks
//! the lifecycle `Starting → Ready → Draining → Stopped` (`Failed` is
//! reachable only from `Starting`). The process and both sockets are
//! released exactly once, at the `Failed` or `Stopped` transition.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::Router;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::admission::{DrainGate, GateClosed, Permit};
use super::channel::{ChannelPaths, CommandClient};
use super::events::EventLog;
use super::logs::{STREAM_NOTIFY_CAPACITY, StreamId, forward_lines};
use super::{PluginCall, PluginError, PluginReply, PluginResult};

/// Line a plugin prints on its stdout once it is listening and usable.
const READY_SENTINEL: &str = "READY!";

/// Line a plugin prints when it cannot start.
const FAILED_SENTINEL: &str = "Failed";

/// How long teardown waits for each output stream to wind down after the
/// process has been reaped.
const STREAM_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Plugin State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PluginState {
    /// Process spawned, handshake or configuration still in progress
    Starting = 0,
    /// Handshake and configuration succeeded; accepting calls
    Ready = 1,
    /// Unload began; waiting for in-flight calls to complete
    Draining = 2,
    /// Drained and terminated
    Stopped = 3,
    /// Startup failed; process terminated
    Failed = 4,
}

impl PluginState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Starting,
            1 => Self::Ready,
            2 => Self::Draining,
            3 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PluginState::Stopped | PluginState::Failed)
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Starting => write!(f, "starting"),
            PluginState::Ready => write!(f, "ready"),
            PluginState::Draining => write!(f, "draining"),
            PluginState::Stopped => write!(f, "stopped"),
            PluginState::Failed => write!(f, "failed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Launch Inputs
// ─────────────────────────────────────────────────────────────────────────────

/// What to launch: the plugin binary and its configuration.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Registry key; unique among loaded plugins.
    pub name: String,

    /// Path to the plugin executable.
    pub executable: PathBuf,

    /// Parameters handed to the plugin's configuration endpoint.
    pub params: serde_json::Value,

    /// Extra environment entries for the child process.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            params: serde_json::json!({}),
            env: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Shared launch context supplied by the registry.
pub(crate) struct LaunchEnv {
    pub comm_dir: PathBuf,
    pub api_url: String,
    pub fileserver_url: String,
    pub token: String,
    pub callback_router: Router,
}

/// Status snapshot reported over the API.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub name: String,
    pub state: String,
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Instance
// ─────────────────────────────────────────────────────────────────────────────

/// One supervised plugin process with its channels and lifecycle state.
pub struct PluginInstance {
    name: String,
    state: AtomicU8,
    gate: DrainGate,
    client: CommandClient,
    paths: ChannelPaths,
    log: EventLog,

    /// Process handle; taken exactly once at teardown.
    child: tokio::sync::Mutex<Option<Child>>,

    /// Callback listener; taken exactly once at teardown.
    callback: parking_lot::Mutex<Option<super::channel::CallbackServer>>,

    /// Stream-end notifications from the output forwarders.
    stream_done: tokio::sync::Mutex<mpsc::Receiver<StreamId>>,

    /// Forwarder tasks, aborted as a backstop if a stream never closes.
    reader_tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,

    last_error: parking_lot::Mutex<Option<String>>,
}

impl PluginInstance {
    /// Spawn, handshake, and configure a new plugin process.
    ///
    /// The logging capability is passed in explicitly; the instance never
    /// reaches for ambient logging state. On any failure the spawned process
    /// is terminated and both channel resources are released before the
    /// error is returned; a failed load never leaves anything behind.
    pub(crate) async fn launch(
        spec: LaunchSpec,
        env: &LaunchEnv,
        log: EventLog,
    ) -> PluginResult<Self> {
        let paths = ChannelPaths::new(&env.comm_dir, &spec.name);
        debug!(plugin = %spec.name, executable = %spec.executable.display(), "initializing plugin");

        // Host side of the callback channel comes up before the process so
        // the plugin can dial back as soon as it starts.
        let callback = super::channel::CallbackServer::bind(&paths.callback, env.callback_router.clone())?;

        // The plugin binds the command socket itself; clear any stale file.
        if paths.command.exists() {
            let _ = std::fs::remove_file(&paths.command);
        }

        let mut cmd = Command::new(&spec.executable);
        cmd.arg("listen")
            .arg(&paths.command)
            .arg(&paths.callback)
            .env("CRUCIBLE_ENDPOINT", &env.api_url)
            .env("CRUCIBLE_FILESERVER", &env.fileserver_url)
            .env("CRUCIBLE_TOKEN", &env.token)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(PluginError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginError::ChannelSetup("stdout pipe missing".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PluginError::ChannelSetup("stderr pipe missing".to_string()))?;

        let (done_tx, done_rx) = mpsc::channel(STREAM_NOTIFY_CAPACITY);

        let instance = Self {
            client: CommandClient::new(paths.command.clone()),
            name: spec.name.clone(),
            state: AtomicU8::new(PluginState::Starting as u8),
            gate: DrainGate::new(),
            paths,
            log: log.clone(),
            child: tokio::sync::Mutex::new(Some(child)),
            callback: parking_lot::Mutex::new(Some(callback)),
            stream_done: tokio::sync::Mutex::new(done_rx),
            reader_tasks: parking_lot::Mutex::new(Vec::new()),
            last_error: parking_lot::Mutex::new(None),
        };

        // The stderr reader runs for the whole process lifetime and must be
        // up before the startup read, so early diagnostics are not lost.
        instance.start_reader(
            BufReader::new(stderr).lines(),
            StreamId::Stderr,
            done_tx.clone(),
        );

        debug!(plugin = %instance.name, "waiting for plugin readiness");
        let mut stdout_lines = BufReader::new(stdout).lines();
        if let Err(e) = await_ready(&mut stdout_lines, &log).await {
            // Teardown waits for the notification channel to close; this
            // side's sender must not keep it open.
            drop(done_tx);
            instance.fail(&e).await;
            return Err(e);
        }

        // From here on stdout carries ordinary diagnostics.
        instance.start_reader(stdout_lines, StreamId::Stdout, done_tx);

        debug!(plugin = %instance.name, "configuring plugin");
        if let Err(e) = instance.client.configure(&spec.params).await {
            instance.fail(&e).await;
            return Err(e);
        }

        instance.set_state(PluginState::Ready);
        Ok(instance)
    }

    fn start_reader<R>(&self, lines: Lines<R>, stream: StreamId, done: mpsc::Sender<StreamId>)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let task = forward_lines(lines, stream, self.log.clone(), done);
        self.reader_tasks.lock().push(task);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PluginState {
        PluginState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: PluginState) {
        debug!(plugin = %self.name, %state, "plugin state change");
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn status(&self) -> PluginStatus {
        PluginStatus {
            name: self.name.clone(),
            state: self.state().to_string(),
            in_flight: self.gate.inflight(),
            last_error: self.last_error(),
        }
    }

    /// Admit one forwarded call. Fails once unloading has begun.
    pub fn reserve(&self) -> Result<Permit<'_>, GateClosed> {
        self.gate.reserve()
    }

    /// Forward a request over the command channel. The caller must hold a
    /// permit from [`reserve`](Self::reserve) for the duration of the call.
    pub async fn forward(&self, call: &PluginCall) -> PluginResult<PluginReply> {
        self.client.call(call).await
    }

    /// Drain in-flight calls, then terminate and reap the process.
    ///
    /// Blocks for the full drain; callers needing a bound run it under their
    /// own timeout.
    pub async fn unload(&self) {
        self.set_state(PluginState::Draining);
        self.gate.drain().await;
        self.shutdown_process().await;
        self.set_state(PluginState::Stopped);
    }

    async fn fail(&self, error: &PluginError) {
        warn!(plugin = %self.name, %error, "plugin load failed");
        *self.last_error.lock() = Some(error.to_string());
        self.shutdown_process().await;
        self.set_state(PluginState::Failed);
    }

    /// Terminate the process, reap it, and release both channels.
    ///
    /// Safe to reach from both the Failed and Stopped paths; the process
    /// handle and the callback listener are `take`n so release happens once.
    async fn shutdown_process(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(plugin = %self.name, %status, "plugin process already exited");
                }
                _ => {
                    let _ = child.start_kill();
                    match child.wait().await {
                        Ok(status) => {
                            info!(plugin = %self.name, %status, "plugin process terminated");
                        }
                        Err(error) => {
                            warn!(plugin = %self.name, %error, "error reaping plugin process");
                        }
                    }
                }
            }
        }

        // Readers end on stream EOF once the process is gone; wait for their
        // notifications so teardown observes quiescent output.
        {
            let mut done = self.stream_done.lock().await;
            loop {
                match tokio::time::timeout(STREAM_CLOSE_TIMEOUT, done.recv()).await {
                    Ok(Some(stream)) => {
                        debug!(plugin = %self.name, %stream, "plugin output stream drained");
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }
        for task in self.reader_tasks.lock().drain(..) {
            task.abort();
        }

        if let Some(callback) = self.callback.lock().take() {
            callback.shutdown();
        }
        let _ = std::fs::remove_file(&self.paths.command);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// Read the child's stdout until it declares itself ready or failed.
///
/// Sentinels are exact and case-sensitive. Every other line is a startup
/// diagnostic and goes to the log bridge; stream end before either sentinel
/// means the process died (or closed stdout) without coming up.
async fn await_ready<R>(lines: &mut Lines<R>, log: &EventLog) -> PluginResult<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match line.as_str() {
                READY_SENTINEL => return Ok(()),
                FAILED_SENTINEL => {
                    return Err(PluginError::Handshake(
                        "plugin reported startup failure".to_string(),
                    ));
                }
                _ => log.output("startup", &line, super::events::Publish::Suppress),
            },
            Ok(None) => {
                return Err(PluginError::Handshake(
                    "output stream closed before readiness".to_string(),
                ));
            }
            Err(e) => {
                return Err(PluginError::Handshake(format!(
                    "error reading startup output: {e}"
                )));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
