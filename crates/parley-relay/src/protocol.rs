//! Chat wire protocol. One WebSocket message carries one JSON chat frame.
//!
//! Inbound frames must be objects with string `sender` and `text` fields;
//! anything else on the object is ignored. Outbound frames carry exactly
//! those two fields.

use parley_common::DecodeError;
use serde::{Deserialize, Serialize};

use crate::queue::Frame;

/// A decoded chat message. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Decode a raw inbound payload, rejecting anything over `max_len` bytes.
    pub fn decode(raw: &[u8], max_len: usize) -> Result<Self, DecodeError> {
        if raw.len() > max_len {
            return Err(DecodeError::TooLarge {
                len: raw.len(),
                max: max_len,
            });
        }
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as an outbound frame, shared by every recipient.
    pub fn encode(&self) -> serde_json::Result<Frame> {
        serde_json::to_string(self).map(Frame::from)
    }
}
