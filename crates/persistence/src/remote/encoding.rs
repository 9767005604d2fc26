//! Transport encoding for file content.
//!
//! Content travels as standard base64 over the UTF-8 bytes of the JSON text,
//! so any Unicode string survives the round trip. Remote APIs commonly wrap
//! the encoded payload at fixed widths; decoding ignores ASCII whitespace.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{BackendError, StorageError};

/// Encodes `content` for transport.
pub fn encode_content(content: &str) -> String {
    STANDARD.encode(content.as_bytes())
}

/// Decodes a transport payload back into text.
pub fn decode_content(encoded: &str) -> Result<String, StorageError> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD.decode(compact.as_bytes()).map_err(|e| {
        StorageError::Backend(BackendError::Encoding {
            message: format!("invalid base64 payload: {e}"),
        })
    })?;

    String::from_utf8(bytes).map_err(|e| {
        StorageError::Backend(BackendError::Encoding {
            message: format!("payload is not valid UTF-8: {e}"),
        })
    })
}
