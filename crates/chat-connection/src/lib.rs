//! Messaging client for the CareLink chat channel.
//!
//! Keeps one WebSocket session to the chat broker alive across network
//! failures, buffers outbound messages while offline, and hands inbound
//! messages to subscribers in arrival order.

pub mod client;
pub mod config;
pub mod credentials;
mod pumps;
pub mod queue;
pub(crate) mod reconnection;
pub(crate) mod session;
pub mod subscribers;
pub mod types;

pub use carelink_protocol::{ChatMessage, SenderRole};
pub use client::{ClientError, MessagingClient};
pub use config::{ClientConfig, ConfigError, HeartbeatConfig, QueueConfig};
pub use credentials::{CredentialProvider, StaticToken, TokenFile};
pub use queue::OverflowPolicy;
pub use session::WsError;
pub use subscribers::SubscriptionId;
pub use types::{ConnectionEvent, ConnectionSnapshot, ConnectionState, ReconnectConfig, SendStatus};
