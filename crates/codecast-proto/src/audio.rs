//! Encoded audio clip exchanged at the capture boundary.

use serde::{Deserialize, Serialize};

/// One encoded recording clip.
///
/// The encoded bytes are stored as base64 so the clip can travel through
/// JSON stores and transports without escaping issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClip {
    /// MIME type of the encoded bytes (e.g. `audio/wav`).
    pub mime: String,

    /// Base64-encoded clip bytes.
    pub data: String,

    /// Number of interleaved samples the clip covers.
    pub samples: u64,

    /// Clip length in milliseconds.
    pub duration_ms: u64,
}

impl AudioClip {
    /// Wraps encoded bytes.
    pub fn new(mime: impl Into<String>, encoded: &[u8], samples: u64, duration_ms: u64) -> Self {
        use base64::Engine;
        Self {
            mime: mime.into(),
            data: base64::engine::general_purpose::STANDARD.encode(encoded),
            samples,
            duration_ms,
        }
    }

    /// Decodes the base64 payload back to the encoded bytes.
    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.decode(&self.data)
    }

    /// Renders the clip as a `data:` URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }

    /// True when the clip carries no encoded bytes at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
