//! The event store contract.
//!
//! The store is an external key-addressable substrate supporting point
//! writes, point reads, child listing, and live subscriptions. Core code
//! depends only on this trait and on the path layout below:
//!
//! ```text
//! /sessions/{id}                 {name, recording, initial, done, owner}
//! /sessions/{id}/code/{offset}   {code, history}
//! /sessions/{id}/select/{offset} "{\"anchor\":{..},\"head\":{..}}"
//! /sessions/{id}/owner           owning identity
//! ```

use crate::SessionId;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lazy sequence of the latest value observed at a path.
///
/// Dropping the stream cancels the subscription.
pub type ValueStream = BoxStream<'static, Option<serde_json::Value>>;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached; the operation may succeed if retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the operation.
    #[error("store rejected operation at {path}: {reason}")]
    Rejected { path: String, reason: String },

    /// A value could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// Backing I/O failed.
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for failures worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            StoreError::Rejected { .. } | StoreError::Serialization(_) => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<crate::Error> for StoreError {
    fn from(e: crate::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// A slash-separated store path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root of the store.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parses `/a/b/c`; empty segments are ignored.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// `/sessions/{id}`
    pub fn session(id: &SessionId) -> Self {
        Self::root().child("sessions").child(id.as_str())
    }

    /// `/sessions/{id}/{field}`
    pub fn session_field(id: &SessionId, field: &str) -> Self {
        Self::session(id).child(field)
    }

    /// `/sessions/{id}/code`
    pub fn code_collection(id: &SessionId) -> Self {
        Self::session_field(id, "code")
    }

    /// `/sessions/{id}/select`
    pub fn select_collection(id: &SessionId) -> Self {
        Self::session_field(id, "select")
    }

    /// `/sessions/{id}/code/{offset}`
    pub fn code(id: &SessionId, offset_ms: u64) -> Self {
        Self::code_collection(id).child(offset_ms.to_string())
    }

    /// `/sessions/{id}/select/{offset}`
    pub fn select(id: &SessionId, offset_ms: u64) -> Self {
        Self::select_collection(id).child(offset_ms.to_string())
    }

    /// Appends one segment. Slashes inside the segment split it further.
    pub fn child(mut self, segment: impl AsRef<str>) -> Self {
        self.segments.extend(
            segment
                .as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// True if `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// True when either path contains the other, i.e. a write at one is
    /// visible to a reader of the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// One child of a store node, with its arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
    /// Child key (last path segment).
    pub key: String,

    /// Current value of the child.
    pub value: serde_json::Value,

    /// Store-wide sequence number of the write that produced `value`.
    /// Higher means later; used to break ties between equal offsets.
    pub seq: u64,
}

/// Key-addressable persistence and subscription substrate.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Writes `value` at `path`, replacing whatever was there.
    async fn set(&self, path: &StorePath, value: serde_json::Value) -> Result<(), StoreError>;

    /// Reads the value at `path`, including nested children.
    async fn get(&self, path: &StorePath) -> Result<Option<serde_json::Value>, StoreError>;

    /// Lists the direct children of `path` in arrival order.
    async fn children(&self, path: &StorePath) -> Result<Vec<StoreEntry>, StoreError>;

    /// Subscribes to the value at `path`.
    ///
    /// The stream yields the current value first, then the latest value after
    /// each write that touches `path` or any of its descendants. Intermediate
    /// values may be skipped if the consumer is slow.
    fn subscribe(&self, path: &StorePath) -> ValueStream;
}

#[async_trait]
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    async fn set(&self, path: &StorePath, value: serde_json::Value) -> Result<(), StoreError> {
        (**self).set(path, value).await
    }

    async fn get(&self, path: &StorePath) -> Result<Option<serde_json::Value>, StoreError> {
        (**self).get(path).await
    }

    async fn children(&self, path: &StorePath) -> Result<Vec<StoreEntry>, StoreError> {
        (**self).children(path).await
    }

    fn subscribe(&self, path: &StorePath) -> ValueStream {
        (**self).subscribe(path)
    }
}
