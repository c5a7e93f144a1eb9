//! Per-session actor.
//!
//! A [`SessionHandle`] feeds commands into a single task that owns the
//! [`SessionState`]. Commands are applied one at a time: each transition and
//! all of its store writes finish before the next command is taken, so no
//! mutation can be in flight when recording starts.
//!
//! The audio device is acquired on a blocking task when the session opens and
//! reports back through the same queue, so editing is never blocked on device
//! setup. The device is released exactly once when the actor tears down.

use crate::audio::{AudioCapture, PendingClip};
use crate::clock::{Clock, MonotonicClock};
use crate::device::{AudioDevice, DeviceError, DeviceLease};
use crate::recorder::{DeviceStatus, Effect, Input, Phase, SessionState, TransitionError, transition};
use codecast_proto::{EventStore, Selection, SessionId, SessionMeta, Snapshot, StoreError, StorePath};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("audio device is not ready yet")]
    NotReady,

    #[error("audio unavailable: {0}")]
    AudioUnavailable(String),

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("recording is finished; session is read-only")]
    Finished,

    #[error("malformed session data: {0}")]
    Malformed(#[from] codecast_proto::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("session actor has shut down")]
    Closed,
}

impl From<TransitionError> for SessionError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotReady => SessionError::NotReady,
            TransitionError::AudioUnavailable(reason) => SessionError::AudioUnavailable(reason),
            TransitionError::AlreadyRecording => SessionError::AlreadyRecording,
            TransitionError::NotRecording => SessionError::NotRecording,
            TransitionError::Finished => SessionError::Finished,
            TransitionError::Encode(message) => SessionError::Store(StoreError::Serialization(message)),
        }
    }
}

/// Settings for opening a session.
#[derive(Clone)]
pub struct SessionOptions {
    /// Identity written to `/sessions/{id}/owner` when recording starts.
    pub owner: String,
    pub clock: Arc<dyn Clock>,
    pub queue_depth: usize,
}

impl SessionOptions {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            clock: Arc::new(MonotonicClock::new()),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Result of stopping a recording.
#[derive(Debug)]
pub struct StopOutcome {
    /// Offset at which the recording stopped.
    pub done_ms: u64,
    /// Audio clip export running in the background.
    pub clip: PendingClip,
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Apply { input: Input, reply: Reply<()> },
    Stop { reply: Reply<StopOutcome> },
    Device(Result<DeviceLease, DeviceError>),
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Loads the session from `store` and starts its actor.
    ///
    /// A session already marked as recorded opens read-only and never
    /// touches `device`. Passing no device makes recording unavailable while
    /// editing keeps working.
    pub async fn open(
        store: Arc<dyn EventStore>,
        id: SessionId,
        device: Option<Box<dyn AudioDevice>>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let node = store.get(&StorePath::session(&id)).await?;
        let meta = SessionMeta::from_node(node.as_ref())?;
        let state = SessionState::restore(id.clone(), options.owner.clone(), &meta);
        info!(session = %id, phase = ?state.phase, "Opening session");

        let (rate, channels) = device
            .as_ref()
            .map_or((DEFAULT_SAMPLE_RATE, 1), |d| (d.sample_rate(), d.channels()));
        let capture = AudioCapture::new(rate, channels);

        let (tx, rx) = mpsc::channel(options.queue_depth.max(1));
        let (state_tx, state_rx) = watch::channel(state.clone());

        if state.phase != Phase::Stopped {
            spawn_acquisition(&id, device, &capture, tx.clone());
        }

        let actor = SessionActor {
            store,
            clock: options.clock,
            state,
            capture,
            lease: None,
            exports: CancellationToken::new(),
            published: state_tx,
        };
        tokio::spawn(actor.run(rx));

        Ok(Self {
            id,
            tx,
            state: state_rx,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Latest committed state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Waits until device acquisition has settled and returns its outcome.
    pub async fn ready(&self) -> Result<DeviceStatus, SessionError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| s.device != DeviceStatus::Pending || s.phase == Phase::Stopped)
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(state.device.clone())
    }

    pub async fn edit(&self, snapshot: Snapshot) -> Result<(), SessionError> {
        self.apply(Input::Edit(snapshot)).await
    }

    pub async fn cursor(&self, selection: Selection) -> Result<(), SessionError> {
        self.apply(Input::Cursor(selection)).await
    }

    pub async fn rename(&self, name: impl Into<String>) -> Result<(), SessionError> {
        self.apply(Input::Rename(name.into())).await
    }

    pub async fn record(&self) -> Result<(), SessionError> {
        self.apply(Input::Record).await
    }

    /// Stops recording and starts exporting the audio clip.
    pub async fn stop(&self) -> Result<StopOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Tears the actor down, releasing the device and cancelling exports.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn apply(&self, input: Input) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Apply { input, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }
}

fn spawn_acquisition(
    id: &SessionId,
    device: Option<Box<dyn AudioDevice>>,
    capture: &AudioCapture,
    tx: mpsc::Sender<Command>,
) {
    let sink = capture.sink();
    let session = id.clone();
    tokio::spawn(async move {
        let result = match device {
            Some(device) => {
                match tokio::task::spawn_blocking(move || DeviceLease::acquire(device, sink)).await {
                    Ok(result) => result,
                    Err(e) => Err(DeviceError::Unavailable(format!("device task failed: {e}"))),
                }
            }
            None => Err(DeviceError::Unavailable("no audio device configured".into())),
        };
        if let Err(e) = &result {
            warn!(session = %session, error = %e, "Audio device acquisition failed");
        }
        // A closed queue drops the lease here, which releases the device.
        let _ = tx.send(Command::Device(result)).await;
    });
}

struct SessionActor {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    state: SessionState,
    capture: AudioCapture,
    lease: Option<DeviceLease>,
    /// Parent of every clip export's cancellation token.
    exports: CancellationToken,
    published: watch::Sender<SessionState>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Apply { input, reply } => {
                    let result = self.apply(input).await;
                    let _ = reply.send(result);
                }
                Command::Stop { reply } => {
                    let result = self.stop().await;
                    let _ = reply.send(result);
                }
                Command::Device(result) => self.on_device(result).await,
                Command::Shutdown { reply } => {
                    self.teardown();
                    let _ = reply.send(());
                    return;
                }
            }
        }
        self.teardown();
    }

    async fn on_device(&mut self, result: Result<DeviceLease, DeviceError>) {
        let input = match result {
            Ok(lease) => {
                self.lease = Some(lease);
                Input::DeviceReady
            }
            Err(e) => Input::DeviceFailed(e.to_string()),
        };
        if let Err(e) = self.apply(input).await {
            warn!(session = %self.state.id, error = %e, "Device notification rejected");
        }
    }

    /// Runs one transition. State is committed only if every effect succeeds.
    async fn apply(&mut self, input: Input) -> Result<(), SessionError> {
        let now = self.clock.now_ms();
        let (next, effects) = transition(&self.state, input, now)?;

        let was_capturing = self.capture.is_recording();
        let mut audio_started = false;
        let mut audio_stopped = false;
        for effect in effects {
            let outcome = match effect {
                Effect::Write { path, value } => {
                    debug!(session = %self.state.id, %path, "Writing session event");
                    self.store.set(&path, value).await
                }
                Effect::StartAudio => {
                    self.capture.clear();
                    self.capture.record();
                    audio_started = true;
                    Ok(())
                }
                Effect::StopAudio => {
                    self.capture.stop();
                    audio_stopped = true;
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                warn!(session = %self.state.id, error = %e, "Transition failed; rolling back");
                if audio_started {
                    self.capture.stop();
                    self.capture.clear();
                } else if audio_stopped && was_capturing {
                    // Still recording; keep the samples gathered so far.
                    self.capture.record();
                }
                return Err(e.into());
            }
        }

        if next.phase != self.state.phase {
            info!(session = %next.id, from = ?self.state.phase, to = ?next.phase, "Session phase changed");
        }
        self.state = next;
        self.published.send_replace(self.state.clone());
        Ok(())
    }

    async fn stop(&mut self) -> Result<StopOutcome, SessionError> {
        self.apply(Input::Stop).await?;
        let done_ms = self.state.done_ms.unwrap_or_default();
        let clip = self.capture.export(self.exports.child_token());
        info!(session = %self.state.id, done_ms, samples = self.capture.sample_count(), "Recording stopped");
        Ok(StopOutcome { done_ms, clip })
    }

    fn teardown(&mut self) {
        self.exports.cancel();
        self.capture.stop();
        if let Some(mut lease) = self.lease.take() {
            lease.release();
        }
        debug!(session = %self.state.id, "Session actor stopped");
    }
}

/// Streams the session's metadata whenever `/sessions/{id}` changes.
///
/// Dropping the stream ends the subscription.
pub fn watch_meta(
    store: &dyn EventStore,
    id: &SessionId,
) -> BoxStream<'static, Result<SessionMeta, codecast_proto::Error>> {
    store
        .subscribe(&StorePath::session(id))
        .map(|node| SessionMeta::from_node(node.as_ref()))
        .boxed()
}
