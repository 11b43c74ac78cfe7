//! Wire protocol for the CareLink chat channel.
//!
//! Chat traffic is a stream of JSON objects, one per WebSocket frame.
//! [`envelope::ChatMessage`] is the unit of exchange; [`frame`] turns raw
//! frame bytes back into messages, including the shape emitted by the
//! first generation of the web portal.

pub mod constants;
pub mod envelope;
pub mod frame;

pub use envelope::{ChatMessage, SenderRole, UnknownRole};
pub use frame::{FrameError, decode_frame};
