//! Public types for the messaging client.

use std::time::Duration;

use rand::Rng;

/// Lifecycle state of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, `connect` never called.
    Idle,
    /// WebSocket handshake in progress.
    Connecting,
    /// Handshake complete; sends go straight to the wire.
    Open,
    /// Caller-initiated shutdown in progress.
    Closing,
    /// Not connected. A retry may be pending unless the caller disconnected.
    Closed,
}

impl ConnectionState {
    /// Connecting or open; `connect` has nothing to do.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

/// Events emitted by the messaging client.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection moved to a new state.
    StateChanged(ConnectionState),
    /// A reconnect attempt has been scheduled.
    Reconnecting { attempt: u32, next_retry_secs: f64 },
    /// The endpoint refused the credential. Retries stop until `connect`
    /// is called again, ideally after refreshing the token.
    AuthRejected { reason: String },
    /// The attempt limit was reached; retries stop.
    GaveUp { attempts: u32 },
    /// An inbound frame could not be decoded and was dropped.
    MalformedFrame { reason: String },
    /// An outbound message was discarded by the queue overflow policy.
    MessageDropped { id: String },
    /// Buffered messages were handed to a freshly opened session.
    QueueFlushed { count: usize },
}

/// Point-in-time view of the connection, for status indicators.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub endpoint: String,
    /// Consecutive reconnect attempts since the last successful open.
    pub attempt: u32,
    pub last_error: Option<String>,
    pub auth_rejected: bool,
    /// Messages waiting in the outbound queue.
    pub queued: usize,
}

/// What happened to a message handed to `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the live session's writer.
    Sent,
    /// Buffered until the next successful open.
    Queued,
    /// Discarded by the overflow policy.
    Dropped,
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Consecutive attempts before giving up. Zero retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }

    /// Returns `true` once `attempt` exceeds the configured limit.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }
}
