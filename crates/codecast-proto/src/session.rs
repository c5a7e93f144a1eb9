//! Session identity and the metadata stored at `/sessions/{id}`.

use crate::event::Snapshot;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one recording/replay session.
///
/// Ids double as directory names under the workspace root, so they are
/// restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Longest accepted id.
    pub const MAX_LEN: usize = 128;

    /// Validates and wraps a session id.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidSessionId {
                id,
                reason: "must not be empty",
            });
        }
        if id.len() > Self::MAX_LEN {
            return Err(Error::InvalidSessionId {
                id,
                reason: "longer than 128 characters",
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidSessionId {
                id,
                reason: "only ASCII letters, digits, '-' and '_' are allowed",
            });
        }
        Ok(Self(id))
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Session-level fields stored under `/sessions/{id}`.
///
/// The `code` and `select` children live under the same node but are read
/// separately by the player, so they are not part of this struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Display name chosen by the recording user.
    #[serde(default)]
    pub name: Option<String>,

    /// True once the recording has been started.
    #[serde(default)]
    pub recording: bool,

    /// Document state at the moment recording began.
    #[serde(default)]
    pub initial: Option<Snapshot>,

    /// Milliseconds between start and stop, set once after stop.
    #[serde(default)]
    pub done: Option<u64>,

    /// Identity of the recording user.
    #[serde(default)]
    pub owner: Option<String>,
}

impl SessionMeta {
    /// Decodes session metadata from a stored `/sessions/{id}` node.
    ///
    /// Unknown children (`code`, `select`) are ignored. A missing node decodes
    /// to the default (a fresh, never-recorded session).
    pub fn from_node(node: Option<&serde_json::Value>) -> Result<Self> {
        match node {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_simple_ids() {
        assert!(SessionId::parse("s1").is_ok());
        assert!(SessionId::parse("-Kx_9aZ").is_ok());
    }

    #[test]
    fn test_parse_rejects_path_segments() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("..").is_err());
        assert!(SessionId::parse("a/b").is_err());
        assert!(SessionId::parse("a b").is_err());
        assert!(SessionId::parse("x".repeat(129)).is_err());
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(SessionId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: std::result::Result<SessionId, _> = serde_json::from_str("\"abc\"");
        assert!(ok.is_ok());
        let bad: std::result::Result<SessionId, _> = serde_json::from_str("\"../etc\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_meta_ignores_children() {
        let node = serde_json::json!({
            "name": "demo",
            "recording": true,
            "initial": {"code": "x = 1", "history": "{}"},
            "code": {"10": {"code": "x = 2", "history": "{}"}},
            "select": {}
        });
        let meta = SessionMeta::from_node(Some(&node)).unwrap();
        assert_eq!(meta.name.as_deref(), Some("demo"));
        assert!(meta.recording);
        assert_eq!(meta.initial.unwrap().code, "x = 1");
        assert_eq!(meta.done, None);
    }

    #[test]
    fn test_meta_missing_node_is_default() {
        assert_eq!(SessionMeta::from_node(None).unwrap(), SessionMeta::default());
    }
}
