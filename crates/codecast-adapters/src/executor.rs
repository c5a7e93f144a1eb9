//! Session executor for running submitted source.
//!
//! One [`SessionExecutor`] serves one client connection. It attaches to
//! sessions (as the recording owner or as a replay viewer), runs submitted
//! source inside the session's working directory, and streams stdout and
//! stderr back as chunks while the program runs.
//!
//! Compiles for one session id run one at a time in submission order, across
//! every executor sharing the same [`Sandbox`].

use crate::interpreter::Interpreter;
use crate::output::Utf8Chunker;
use crate::workspace::{Workspace, WorkspaceError};
use codecast_core::CodecastConfig;
use codecast_proto::{ExecutionOutputChunk, ExecutionRequest, OutputChannel, ServerMessage, SessionId};
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Size of each read from the interpreter's pipes.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Server environment variables passed through to programs. Anything else
/// (e.g. `PYTHONUNBUFFERED`) would change how programs buffer their output.
const INHERITED_ENV: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "LC_CTYPE", "TMPDIR", "SYSTEMROOT"];

/// Errors raised while attaching or running a program.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("session {0} is not attached; send record or replay first")]
    NotAttached(SessionId),

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error while running program: {0}")]
    Io(#[from] std::io::Error),

    #[error("execution timed out after {}s", .0.as_secs_f32())]
    TimedOut(Duration),
}

/// How a connection is attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// The recording user. The working directory outlives the connection.
    Owner,
    /// A replay viewer. The working directory is removed on disconnect.
    Viewer,
}

impl SessionRole {
    pub fn cleanup_on_disconnect(self) -> bool {
        self == SessionRole::Viewer
    }
}

/// How programs are run.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub interpreter: Interpreter,
    /// Kill a program after this long. `None` means no limit.
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    /// Inherited variables, already filtered by [`INHERITED_ENV`].
    host_env: Vec<(String, String)>,
}

impl ExecutorSettings {
    pub fn new(interpreter: Interpreter) -> Self {
        Self {
            interpreter,
            ..Self::default()
        }
    }

    pub fn from_config(config: &CodecastConfig) -> Self {
        Self {
            interpreter: Interpreter::from_config(&config.interpreter),
            timeout: config.execution.timeout_secs.map(Duration::from_secs),
            kill_grace: Duration::from_millis(config.execution.kill_grace_ms),
            ..Self::default()
        }
    }

    /// Replaces the environment programs inherit. Only allowlisted names
    /// are kept.
    pub fn with_host_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.host_env = vars
            .into_iter()
            .filter(|(name, _)| INHERITED_ENV.contains(&name.as_str()))
            .collect();
        self
    }

    pub fn host_env(&self) -> &[(String, String)] {
        &self.host_env
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            interpreter: Interpreter::default(),
            timeout: None,
            kill_grace: Duration::from_millis(500),
            host_env: Vec::new(),
        }
        .with_host_env(std::env::vars())
    }
}

/// Registry that orders compiles per session id.
///
/// Each reservation is chained behind the previous one for the same id, so
/// turns are granted in reservation order even though the compiles run on
/// separate tasks.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    tails: Arc<Mutex<HashMap<SessionId, watch::Receiver<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next turn for `id`.
    pub fn reserve(&self, id: &SessionId) -> Turn {
        let (done, tail) = watch::channel(());
        let mut tails = self
            .tails
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tails.retain(|_, rx| rx.has_changed().is_ok());
        let previous = tails.insert(id.clone(), tail);
        Turn {
            previous,
            _done: done,
        }
    }

    /// Number of session ids with a turn outstanding.
    pub fn active(&self) -> usize {
        self.tails
            .lock()
            .map(|tails| tails.values().filter(|rx| rx.has_changed().is_ok()).count())
            .unwrap_or(0)
    }
}

/// A reserved place in a session's compile queue. Dropping it hands the turn
/// to the next reservation.
#[derive(Debug)]
pub struct Turn {
    previous: Option<watch::Receiver<()>>,
    _done: watch::Sender<()>,
}

impl Turn {
    /// Waits until every earlier turn for the session has been released.
    ///
    /// Cancel safe: an abandoned wait keeps the turn queued.
    pub async fn wait(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // Nothing is ever sent; this only returns once the sender drops.
            while previous.changed().await.is_ok() {}
        }
        self.previous = None;
    }
}

/// State shared by every executor of one server.
#[derive(Debug)]
pub struct Sandbox {
    workspace: Workspace,
    settings: ExecutorSettings,
    locks: SessionLocks,
}

impl Sandbox {
    pub fn new(workspace: Workspace, settings: ExecutorSettings) -> Self {
        Self {
            workspace,
            settings,
            locks: SessionLocks::new(),
        }
    }

    pub fn from_config(config: &CodecastConfig) -> Self {
        Self::new(
            Workspace::new(&config.workspace.root),
            ExecutorSettings::from_config(config),
        )
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Creates an executor for one connection. Messages for the client are
    /// sent to `outbound`.
    pub fn executor(self: &Arc<Self>, outbound: mpsc::UnboundedSender<ServerMessage>) -> SessionExecutor {
        SessionExecutor {
            sandbox: Arc::clone(self),
            outbound,
            attached: HashMap::new(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }
}

/// Handle to a submitted compile.
#[derive(Debug)]
pub struct CompileHandle {
    task: Option<JoinHandle<()>>,
}

impl CompileHandle {
    fn finished() -> Self {
        Self { task: None }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits until the program has exited and all of its output was sent.
    pub async fn wait(self) {
        if let Some(task) = self.task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Compile task failed");
        }
    }
}

/// Runs programs for one client connection.
#[derive(Debug)]
pub struct SessionExecutor {
    sandbox: Arc<Sandbox>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    attached: HashMap<SessionId, SessionRole>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl SessionExecutor {
    /// Attaches as the recording owner of `id` and acknowledges.
    ///
    /// The working directory is created if missing and survives disconnect.
    pub async fn record(&mut self, id: &SessionId) -> Result<(), ExecutorError> {
        let dir = self.sandbox.workspace.ensure(id).await?;
        self.attached.insert(id.clone(), SessionRole::Owner);
        info!(session = %id, dir = %dir.display(), "Attached as recording owner");
        let _ = self.outbound.send(ServerMessage::Record);
        Ok(())
    }

    /// Attaches as a replay viewer of `id`.
    ///
    /// The working directory is reused if present and removed on disconnect,
    /// unless this connection also owns the recording.
    pub async fn replay(&mut self, id: &SessionId) -> Result<(), ExecutorError> {
        let dir = self.sandbox.workspace.ensure(id).await?;
        let role = *self
            .attached
            .entry(id.clone())
            .or_insert(SessionRole::Viewer);
        info!(session = %id, dir = %dir.display(), ?role, "Attached for replay");
        Ok(())
    }

    pub fn role(&self, id: &SessionId) -> Option<SessionRole> {
        self.attached.get(id).copied()
    }

    /// Runs `request` in the session's working directory.
    ///
    /// Returns immediately; output is streamed to the client as it arrives.
    /// Failures are reported on the `err` channel.
    pub fn compile(&mut self, request: ExecutionRequest) -> CompileHandle {
        let ExecutionRequest {
            session_id: id,
            source_code,
        } = request;

        if !self.attached.contains_key(&id) {
            let err = ExecutorError::NotAttached(id.clone());
            warn!(session = %id, "Compile for unattached session");
            send_chunk(&self.outbound, &id, OutputChannel::Err, format!("{err}\n"));
            return CompileHandle::finished();
        }

        let mut turn = self.sandbox.locks.reserve(&id);
        let job = CompileJob {
            id,
            source: source_code,
            sandbox: Arc::clone(&self.sandbox),
            outbound: self.outbound.clone(),
            cancel: self.cancel.child_token(),
        };
        debug!(session = %job.id, bytes = job.source.len(), "Compile queued");

        let task = self.tasks.spawn(async move {
            tokio::select! {
                biased;
                () = job.cancel.cancelled() => {
                    debug!(session = %job.id, "Compile cancelled while queued");
                    return;
                }
                () = turn.wait() => {}
            }
            if let Err(e) = job.run().await {
                warn!(session = %job.id, error = %e, "Compile failed");
                job.emit(OutputChannel::Err, format!("{e}\n"));
            }
            drop(turn);
        });

        CompileHandle { task: Some(task) }
    }

    /// Cancels queued and running compiles, then removes the working
    /// directories of sessions attached as a viewer.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        for (id, role) in self.attached.drain() {
            if role.cleanup_on_disconnect() {
                self.sandbox.workspace.remove(&id).await;
            } else {
                debug!(session = %id, "Keeping owner's session directory");
            }
        }
        info!("Executor disconnected");
    }
}

impl Drop for SessionExecutor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct CompileJob {
    id: SessionId,
    source: String,
    sandbox: Arc<Sandbox>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
}

impl CompileJob {
    async fn run(&self) -> Result<(), ExecutorError> {
        let settings = &self.sandbox.settings;
        let workspace = &self.sandbox.workspace;
        workspace
            .write_file(&self.id, &settings.interpreter.entrypoint, &self.source)
            .await?;
        let dir = workspace.dir_for(&self.id);

        let (cmd, args) = settings.interpreter.build_command();
        let mut command = Command::new(&cmd);
        command
            .args(&args)
            .env_clear()
            .envs(settings.host_env.iter().map(|(k, v)| (k, v)))
            .envs(&settings.interpreter.env)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Lead a new process group so the whole program tree can be signalled.
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        debug!(session = %self.id, command = %cmd, args = ?args, cwd = ?dir, "Spawning interpreter");
        let mut child = command.spawn().map_err(|source| ExecutorError::Spawn {
            command: cmd.clone(),
            source,
        })?;
        let pid = child.id();
        info!(session = %self.id, pid, "Program started");

        // Read both pipes concurrently so a full stderr buffer cannot stall stdout.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let exited = async {
            let status = child.wait().await;
            // Leftover background children would hold the pipes open and
            // block the session's next compile.
            #[cfg(unix)]
            {
                if let Some(pid) = pid {
                    signal_group(pid, Signal::SIGKILL);
                }
            }
            status
        };
        let streams = async {
            let ((), (), status) = tokio::join!(
                self.pump(stdout, OutputChannel::Out),
                self.pump(stderr, OutputChannel::Err),
                exited
            );
            status
        };
        let deadline = async {
            match settings.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = streams => {
                let status = status?;
                debug!(session = %self.id, pid, code = ?status.code(), "Program exited");
                Ok(())
            }
            () = self.cancel.cancelled() => {
                info!(session = %self.id, pid, "Killing program on disconnect");
                terminate(&mut child, settings.kill_grace).await;
                Ok(())
            }
            () = deadline => {
                let limit = settings.timeout.unwrap_or_default();
                warn!(session = %self.id, pid, timeout_secs = limit.as_secs(), "Execution timeout reached");
                terminate(&mut child, settings.kill_grace).await;
                Err(ExecutorError::TimedOut(limit))
            }
        }
    }

    async fn pump<R>(&self, reader: Option<R>, channel: OutputChannel)
    where
        R: AsyncRead + Unpin,
    {
        let Some(mut reader) = reader else {
            return;
        };
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut chunker = Utf8Chunker::new();
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(text) = chunker.push(&buf[..n]) {
                        self.emit(channel, text);
                    }
                }
                Err(e) => {
                    warn!(session = %self.id, %channel, error = %e, "Failed reading program output");
                    break;
                }
            }
        }
        if let Some(rest) = chunker.finish() {
            self.emit(channel, rest);
        }
    }

    fn emit(&self, channel: OutputChannel, text: String) {
        send_chunk(&self.outbound, &self.id, channel, text);
    }
}

fn send_chunk(
    outbound: &mpsc::UnboundedSender<ServerMessage>,
    id: &SessionId,
    channel: OutputChannel,
    text: String,
) {
    let chunk = ExecutionOutputChunk::new(id.clone(), channel, text);
    // The client may already be gone; output is dropped in that case.
    let _ = outbound.send(chunk.into());
}

/// Terminates the program's process group: SIGTERM, then SIGKILL after
/// `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, Signal::SIGTERM);
            let exited = tokio::time::timeout(grace, child.wait()).await.is_ok();
            // Children of the program may still hold the group alive.
            signal_group(pid, Signal::SIGKILL);
            if exited {
                return;
            }
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let pgid = Pid::from_raw(pid as i32);
    match killpg(pgid, signal) {
        Ok(()) => debug!(%pgid, ?signal, "Signalled process group"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(%pgid, ?signal, error = %e, "Failed to signal process group"),
    }
}
