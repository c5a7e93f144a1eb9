//! Recording state machine.
//!
//! `transition` is a pure function from the current [`SessionState`] and one
//! [`Input`] to the next state plus the [`Effect`]s that must be applied
//! (store writes and audio commands). The session actor applies effects in
//! order and only commits the new state once all of them succeed.
//!
//! ```text
//! Idle ──DeviceReady──▶ Armed ──Record──▶ Recording ──Stop──▶ Stopped
//! ```

use crate::clock::OffsetClock;
use codecast_proto::{Selection, SessionId, SessionMeta, Snapshot, StorePath};
use serde_json::Value;
use thiserror::Error;

/// Lifecycle phase of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No audio device yet.
    Idle,
    /// Device acquired, recording not started.
    Armed,
    /// Events are being captured.
    Recording,
    /// Recording finished. Terminal.
    Stopped,
}

/// State of the audio device acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Pending,
    Ready,
    Failed(String),
}

/// One user interaction or device notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The document changed.
    Edit(Snapshot),
    /// The cursor or selection moved.
    Cursor(Selection),
    /// The session was renamed.
    Rename(String),
    /// The audio device became available.
    DeviceReady,
    /// The audio device could not be acquired or was lost.
    DeviceFailed(String),
    /// Start recording.
    Record,
    /// Stop recording.
    Stop,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write `value` at `path`.
    Write { path: StorePath, value: Value },
    /// Discard buffered audio and start accumulating samples.
    StartAudio,
    /// Stop accumulating samples and export the clip.
    StopAudio,
}

/// Rejected transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
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

    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl From<codecast_proto::Error> for TransitionError {
    fn from(e: codecast_proto::Error) -> Self {
        TransitionError::Encode(e.to_string())
    }
}

/// Explicit session state threaded through [`transition`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub id: SessionId,
    pub owner: String,
    pub name: Option<String>,
    pub phase: Phase,
    pub device: DeviceStatus,
    pub clock: OffsetClock,
    /// Current editor document.
    pub document: Snapshot,
    /// Document state written to `/initial` before recording began.
    pub initial: Snapshot,
    pub done_ms: Option<u64>,
}

impl SessionState {
    /// A fresh, never-recorded session.
    pub fn new(id: SessionId, owner: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            name: None,
            phase: Phase::Idle,
            device: DeviceStatus::Pending,
            clock: OffsetClock::new(),
            document: Snapshot::default(),
            initial: Snapshot::default(),
            done_ms: None,
        }
    }

    /// Restores state from stored metadata.
    ///
    /// A session whose `recording` flag is already set was recorded earlier
    /// and opens read-only in [`Phase::Stopped`].
    pub fn restore(id: SessionId, owner: impl Into<String>, meta: &SessionMeta) -> Self {
        let mut state = Self::new(id, owner);
        state.name = meta.name.clone();
        if let Some(initial) = &meta.initial {
            state.initial = initial.clone();
            state.document = initial.clone();
        }
        if meta.recording {
            state.phase = Phase::Stopped;
            state.done_ms = meta.done;
        }
        state
    }

    pub fn is_recording(&self) -> bool {
        self.phase == Phase::Recording
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Stopped
    }
}

fn write(path: StorePath, value: Value) -> Effect {
    Effect::Write { path, value }
}

/// Computes the next state for `input` observed at `now_ms`.
pub fn transition(
    state: &SessionState,
    input: Input,
    now_ms: u64,
) -> Result<(SessionState, Vec<Effect>), TransitionError> {
    let mut next = state.clone();
    let id = &state.id;

    let effects = match input {
        Input::Edit(snapshot) => match state.phase {
            Phase::Idle | Phase::Armed => {
                let value = snapshot.to_store_value()?;
                next.initial = snapshot.clone();
                next.document = snapshot;
                vec![write(StorePath::session_field(id, "initial"), value)]
            }
            Phase::Recording => {
                let offset = next.clock.offset(now_ms);
                let value = snapshot.to_store_value()?;
                next.document = snapshot;
                vec![write(StorePath::code(id, offset), value)]
            }
            Phase::Stopped => return Err(TransitionError::Finished),
        },

        Input::Cursor(selection) => {
            if state.phase != Phase::Recording {
                return Ok((next, Vec::new()));
            }
            let offset = next.clock.offset(now_ms);
            vec![write(
                StorePath::select(id, offset),
                selection.to_store_value()?,
            )]
        }

        Input::Rename(name) => {
            if state.phase == Phase::Stopped {
                return Err(TransitionError::Finished);
            }
            next.name = Some(name.clone());
            vec![write(StorePath::session_field(id, "name"), Value::String(name))]
        }

        Input::DeviceReady => {
            next.device = DeviceStatus::Ready;
            if state.phase == Phase::Idle {
                next.phase = Phase::Armed;
            }
            Vec::new()
        }

        Input::DeviceFailed(reason) => {
            next.device = DeviceStatus::Failed(reason);
            if state.phase == Phase::Armed {
                next.phase = Phase::Idle;
            }
            Vec::new()
        }

        Input::Record => match state.phase {
            Phase::Armed => {
                next.phase = Phase::Recording;
                next.clock.bind(now_ms);
                next.initial = state.document.clone();
                vec![
                    Effect::StartAudio,
                    write(
                        StorePath::session_field(id, "owner"),
                        Value::String(state.owner.clone()),
                    ),
                    write(
                        StorePath::session_field(id, "initial"),
                        state.document.to_store_value()?,
                    ),
                    write(StorePath::session_field(id, "recording"), Value::Bool(true)),
                ]
            }
            Phase::Idle => {
                return Err(match &state.device {
                    DeviceStatus::Failed(reason) => {
                        TransitionError::AudioUnavailable(reason.clone())
                    }
                    DeviceStatus::Pending | DeviceStatus::Ready => TransitionError::NotReady,
                });
            }
            Phase::Recording => return Err(TransitionError::AlreadyRecording),
            Phase::Stopped => return Err(TransitionError::Finished),
        },

        Input::Stop => {
            if state.phase != Phase::Recording {
                return Err(TransitionError::NotRecording);
            }
            let done = next.clock.offset(now_ms);
            next.phase = Phase::Stopped;
            next.done_ms = Some(done);
            vec![
                Effect::StopAudio,
                write(StorePath::session_field(id, "done"), Value::from(done)),
            ]
        }
    };

    Ok((next, effects))
}
