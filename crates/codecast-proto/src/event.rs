//! Timed recording events.
//!
//! A recording is two interleaved streams that share one start instant:
//! full code snapshots (text plus the serialized edit history, so replay can
//! restore undo/redo state) and compact selection moves.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A zero-based line/column position in the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    /// Column, counted in characters.
    pub ch: u32,
}

impl Position {
    pub fn new(line: u32, ch: u32) -> Self {
        Self { line, ch }
    }
}

/// A selection range; a bare cursor has `anchor == head`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub head: Position,
}

impl Selection {
    pub fn new(anchor: Position, head: Position) -> Self {
        Self { anchor, head }
    }

    /// A collapsed selection at one position.
    pub fn cursor(at: Position) -> Self {
        Self {
            anchor: at,
            head: at,
        }
    }

    /// Encodes the selection as stored under `/select/{offset}`.
    ///
    /// Selections are stored as a serialized JSON string rather than a nested
    /// object to keep each entry a single compact leaf.
    pub fn to_store_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::String(serde_json::to_string(self)?))
    }

    /// Decodes a stored selection.
    ///
    /// Accepts both the serialized-string form and a plain object, since
    /// older writers stored the object directly.
    pub fn from_store_value(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(raw) => Ok(serde_json::from_str(raw)?),
            serde_json::Value::Object(_) => Ok(serde_json::from_value(value.clone())?),
            other => Err(Error::Malformed {
                what: "selection",
                message: format!("expected string or object, got {other}"),
            }),
        }
    }
}

/// Full document state at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Document text.
    pub code: String,

    /// Serialized editor edit-history log (opaque to codecast).
    #[serde(default)]
    pub history: String,
}

impl Snapshot {
    pub fn new(code: impl Into<String>, history: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            history: history.into(),
        }
    }

    pub fn to_store_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_store_value(value: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// One recorded event, tagged with its offset from the recording start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimedEvent {
    /// The document changed.
    Code { offset_ms: u64, snapshot: Snapshot },

    /// The cursor or selection moved.
    Selection { offset_ms: u64, selection: Selection },
}

impl TimedEvent {
    /// Milliseconds since the recording start.
    pub fn offset_ms(&self) -> u64 {
        match self {
            TimedEvent::Code { offset_ms, .. } | TimedEvent::Selection { offset_ms, .. } => {
                *offset_ms
            }
        }
    }

    /// Store child collection this event is written under.
    pub fn collection(&self) -> &'static str {
        match self {
            TimedEvent::Code { .. } => "code",
            TimedEvent::Selection { .. } => "select",
        }
    }

    /// Encodes the event payload (without its offset) for the store.
    pub fn to_store_value(&self) -> Result<serde_json::Value> {
        match self {
            TimedEvent::Code { snapshot, .. } => snapshot.to_store_value(),
            TimedEvent::Selection { selection, .. } => selection.to_store_value(),
        }
    }
}
