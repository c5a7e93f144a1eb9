//! Messages exchanged with the execution server.
//!
//! The transport is asynchronous and has no acknowledgement contract beyond
//! the `record` ack. Every message is a single JSON object tagged by `type`.

use crate::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client → server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Attach as the recording owner of `id`.
    Record { id: SessionId },

    /// Attach as a replay viewer of `id`.
    Replay { id: SessionId },

    /// Run `source` as the entrypoint of `id`.
    Compile { id: SessionId, source: String },
}

/// Server → client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Acknowledges a `record` request.
    Record,

    /// A chunk of interpreter stdout.
    Out { chunk: String },

    /// A chunk of interpreter stderr, or an executor failure report.
    Err { chunk: String },
}

/// Which interpreter stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannel {
    Out,
    Err,
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputChannel::Out => f.write_str("out"),
            OutputChannel::Err => f.write_str("err"),
        }
    }
}

/// Code submitted for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub session_id: SessionId,
    pub source_code: String,
}

/// One incremental piece of interpreter output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutputChunk {
    pub session_id: SessionId,
    pub channel: OutputChannel,
    pub text: String,
}

impl ExecutionOutputChunk {
    pub fn new(session_id: SessionId, channel: OutputChannel, text: impl Into<String>) -> Self {
        Self {
            session_id,
            channel,
            text: text.into(),
        }
    }
}

impl From<ExecutionOutputChunk> for ServerMessage {
    fn from(chunk: ExecutionOutputChunk) -> Self {
        match chunk.channel {
            OutputChannel::Out => ServerMessage::Out { chunk: chunk.text },
            OutputChannel::Err => ServerMessage::Err { chunk: chunk.text },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let json = r#"{"type":"compile","id":"s1","source":"print(1)"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Compile {
                id: SessionId::parse("s1").unwrap(),
                source: "print(1)".to_string(),
            }
        );
    }

    #[test]
    fn test_client_message_rejects_bad_id() {
        let json = r#"{"type":"record","id":"../../tmp"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn test_server_message_wire_format() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::Record).unwrap(),
            r#"{"type":"record"}"#
        );
        let out = ServerMessage::Out {
            chunk: "hi\n".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"{"type":"out","chunk":"hi\n"}"#
        );
    }

    #[test]
    fn test_chunk_into_server_message() {
        let id = SessionId::parse("s1").unwrap();
        let msg: ServerMessage = ExecutionOutputChunk::new(id, OutputChannel::Err, "boom").into();
        assert_eq!(
            msg,
            ServerMessage::Err {
                chunk: "boom".to_string()
            }
        );
    }
}
