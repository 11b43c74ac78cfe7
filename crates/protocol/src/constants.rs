//! Protocol constants shared by clients and test servers.

use std::time::Duration;

/// Endpoint used when neither configuration nor environment names one.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:5000";

/// Largest frame accepted from the wire.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Close code sent by the broker when the bearer token is revoked or invalid.
pub const WS_CLOSE_TOKEN_REVOKED: u16 = 4001;

/// Interval between keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(25);

/// Silence longer than this means the peer is gone.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Upper bound on the opening handshake.
pub const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
