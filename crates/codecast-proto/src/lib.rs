//! # codecast-proto
//!
//! Shared types and contracts for the codecast workspace.
//!
//! This crate provides the foundational abstractions used across all codecast
//! crates, including:
//! - Session identity and stored session metadata
//! - Timed recording events (code snapshots and selections)
//! - The encoded audio clip exchanged at the capture boundary
//! - Wire messages for the execution transport
//! - The `EventStore` contract and its path layout

mod audio;
mod error;
mod event;
mod session;
mod store;
mod wire;

pub use audio::AudioClip;
pub use error::{Error, Result};
pub use event::{Position, Selection, Snapshot, TimedEvent};
pub use session::{SessionId, SessionMeta};
pub use store::{EventStore, StoreEntry, StoreError, StorePath, ValueStream};
pub use wire::{
    ClientMessage, ExecutionOutputChunk, ExecutionRequest, OutputChannel, ServerMessage,
};
