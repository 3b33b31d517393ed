//! Transport codec for binary audio carried inside JSON text frames.
//!
//! The realtime wire protocol is JSON over a text WebSocket, so PCM chunks
//! travel as standard base64 in string fields (`audio` outbound, `delta`
//! inbound).

use base64::prelude::*;

use super::{AudioError, AudioResult};

/// Encode raw bytes for embedding in a JSON text frame.
pub fn to_transport(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode transport text back into raw bytes.
///
/// Fails with [`AudioError::MalformedEncoding`] on invalid input.
pub fn from_transport(text: &str) -> AudioResult<Vec<u8>> {
    BASE64_STANDARD
        .decode(text)
        .map_err(|e| AudioError::MalformedEncoding(e.to_string()))
}
