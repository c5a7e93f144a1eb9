//! Error types shared across codecast crates.

use thiserror::Error;

/// Errors raised while constructing or decoding shared protocol values.
#[derive(Debug, Error)]
pub enum Error {
    /// A session id failed validation.
    #[error("invalid session id {id:?}: {reason}")]
    InvalidSessionId { id: String, reason: &'static str },

    /// A stored or transmitted value could not be decoded.
    #[error("malformed {what}: {message}")]
    Malformed { what: &'static str, message: String },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results carrying a protocol [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
