//! # codecast-core
//!
//! Recording and playback for codecast sessions.
//!
//! This crate provides:
//! - The recorder state machine and the per-session actor that drives it
//! - Audio capture, device leases, and WAV clip export
//! - In-memory, file-journaled, and retrying event stores
//! - Session playback from stored events
//! - Configuration loading

mod audio;
mod clock;
mod config;
mod device;
mod file_store;
mod memory_store;
mod recorder;
mod retry;
mod session;
mod session_player;

pub use audio::{AudioCapture, AudioError, CLIP_MIME, PendingClip, SampleSink, encode_wav};
pub use clock::{Clock, ManualClock, MonotonicClock, OffsetClock};
pub use config::{
    AudioConfig, CodecastConfig, ConfigError, ConfigWarning, ExecutionConfig, InterpreterConfig,
    RecorderConfig, ServerConfig, StoreConfig, WorkspaceConfig,
};
pub use device::{AudioDevice, DeviceError, DeviceLease, GeneratorDevice, GeneratorKind};
pub use file_store::{FileStore, JournalRecord};
pub use memory_store::MemoryStore;
pub use recorder::{
    DeviceStatus, Effect, Input, Phase, SessionState, TransitionError, transition,
};
pub use retry::{RetryPolicy, RetryingStore};
pub use session::{SessionError, SessionHandle, SessionOptions, StopOutcome, watch_meta};
pub use session_player::{PlaybackEvent, PlaybackState, PlayerConfig, SessionPlayer};
