//! Frame decoding.
//!
//! Frames are decoded from bytes so text and binary WebSocket frames share
//! one path. Two shapes are understood: the current [`ChatMessage`] object
//! and the legacy `{id, text, isDoctor, timestamp}` object the portal's chat
//! panel produced before roles and opaque payloads were introduced.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::envelope::{ChatMessage, SenderRole, string_or_number};

/// Why an inbound frame could not become a [`ChatMessage`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyFrame {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    text: String,
    #[serde(default)]
    is_doctor: bool,
    timestamp: DateTime<Utc>,
}

impl LegacyFrame {
    fn into_message(self) -> Result<ChatMessage, serde_json::Error> {
        let role = if self.is_doctor {
            SenderRole::Doctor
        } else {
            SenderRole::Patient
        };
        ChatMessage::from_parts(self.id, role, &self.text, self.timestamp)
    }
}

/// Decodes one frame, rejecting anything larger than `limit` bytes.
pub fn decode_frame(bytes: &[u8], limit: usize) -> Result<ChatMessage, FrameError> {
    if bytes.len() > limit {
        return Err(FrameError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }

    match serde_json::from_slice::<ChatMessage>(bytes) {
        Ok(msg) => Ok(msg),
        Err(primary) => match serde_json::from_slice::<LegacyFrame>(bytes) {
            Ok(legacy) => Ok(legacy.into_message()?),
            // Report the error against the current shape, not the fallback.
            Err(_) => Err(FrameError::Malformed(primary)),
        },
    }
}
