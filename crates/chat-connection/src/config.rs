//! Client configuration.
//!
//! Defaults are compiled in. An optional JSON file overrides them
//! (`<config dir>/carelink/chat.json`), and `CARELINK_WS_URL` overrides the
//! endpoint for a given deployment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::debug;

use carelink_protocol::constants::{
    DEFAULT_ENDPOINT, WS_HANDSHAKE_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT,
};

use crate::queue::OverflowPolicy;
use crate::types::ReconnectConfig;

/// Environment variable that overrides the endpoint.
pub const ENDPOINT_ENV: &str = "CARELINK_WS_URL";

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Outbound queue limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum messages buffered while disconnected. Zero disables buffering.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Keepalive settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub ping_period: Duration,
    /// Inbound silence after which the session is considered dead.
    pub idle_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_period: WS_PING_PERIOD,
            idle_timeout: WS_PONG_WAIT,
        }
    }
}

/// Everything the messaging client needs besides credentials.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `ws://` or `wss://` address of the chat broker.
    pub endpoint: String,
    pub reconnect: ReconnectConfig,
    pub queue: QueueConfig,
    pub heartbeat: HeartbeatConfig,
    pub handshake_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            reconnect: ReconnectConfig::default(),
            queue: QueueConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            handshake_timeout: WS_HANDSHAKE_TIMEOUT,
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

/// On-disk shape. Every field is optional; durations are milliseconds.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigFile {
    endpoint: Option<String>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_backoff_factor: Option<f64>,
    reconnect_max_attempts: Option<u32>,
    queue_capacity: Option<usize>,
    queue_overflow: Option<OverflowPolicy>,
    ping_period_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    max_message_size: Option<usize>,
}

impl ClientConfig {
    /// Creates a default configuration pointing at `endpoint`.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Loads the default config file (if present) and applies environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Loads an explicit config file and applies environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&content)?;
        debug!(path = %path.display(), "loaded chat client config");
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document on top of the defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let mut config = Self::default();

        if let Some(endpoint) = file.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(ms) = file.reconnect_initial_delay_ms {
            config.reconnect.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.reconnect_max_delay_ms {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(factor) = file.reconnect_backoff_factor {
            config.reconnect.backoff_factor = factor;
        }
        if let Some(n) = file.reconnect_max_attempts {
            config.reconnect.max_attempts = n;
        }
        if let Some(n) = file.queue_capacity {
            config.queue.capacity = n;
        }
        if let Some(policy) = file.queue_overflow {
            config.queue.overflow = policy;
        }
        if let Some(ms) = file.ping_period_ms {
            config.heartbeat.ping_period = Duration::from_millis(ms);
        }
        if let Some(ms) = file.idle_timeout_ms {
            config.heartbeat.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.handshake_timeout_ms {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = file.max_message_size {
            config.max_message_size = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Applies deployment overrides from a key lookup (normally the process
    /// environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            debug!(endpoint = %endpoint, "endpoint overridden from {ENDPOINT_ENV}");
            self.endpoint = endpoint.trim().to_string();
        }
    }

    /// Checks the settings the client cannot recover from at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.endpoint)?;

        let r = &self.reconnect;
        if r.initial_delay.is_zero() {
            return Err(ConfigError::Invalid {
                field: "reconnect.initial_delay",
                reason: "must be greater than zero".into(),
            });
        }
        if r.max_delay < r.initial_delay {
            return Err(ConfigError::Invalid {
                field: "reconnect.max_delay",
                reason: "must not be shorter than the initial delay".into(),
            });
        }
        if !(r.backoff_factor >= 1.0 && r.backoff_factor.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "reconnect.backoff_factor",
                reason: format!("{} is not a finite value >= 1.0", r.backoff_factor),
            });
        }
        if self.heartbeat.ping_period.is_zero() || self.heartbeat.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "heartbeat",
                reason: "intervals must be greater than zero".into(),
            });
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "handshake_timeout",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_size",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };
    let uri: Uri = endpoint.parse().map_err(|_| invalid("not a valid URI"))?;
    match uri.scheme_str() {
        Some("ws") | Some("wss") => {}
        Some(_) => return Err(invalid("scheme must be ws or wss")),
        None => return Err(invalid("missing scheme")),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}

/// Returns the default config file path.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("carelink").join("chat.json"))
}

/// Returns the platform-specific config directory.
pub(crate) fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint, "ws://localhost:5000");
        assert_eq!(config.queue.capacity, 256);
        config.validate().unwrap();
    }

    #[test]
    fn json_overrides_defaults() {
        let config = ClientConfig::from_json(
            r#"{
                "endpoint": "wss://chat.example.org/ws",
                "reconnectInitialDelayMs": 100,
                "reconnectMaxDelayMs": 5000,
                "reconnectMaxAttempts": 7,
                "queueCapacity": 10,
                "queueOverflow": "dropNewest"
            }"#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "wss://chat.example.org/ws");
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(100));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.queue.capacity, 10);
        assert_eq!(config.queue.overflow, OverflowPolicy::DropNewest);
        // Untouched fields keep their defaults.
        assert_eq!(config.heartbeat, HeartbeatConfig::default());
    }

    #[test]
    fn empty_object_is_default() {
        let config = ClientConfig::from_json("{}").unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn env_override_replaces_endpoint() {
        let mut config = ClientConfig::default();
        config.apply_overrides(|key| {
            (key == ENDPOINT_ENV).then(|| " ws://broker.internal:9000 ".to_string())
        });
        assert_eq!(config.endpoint, "ws://broker.internal:9000");
    }

    #[test]
    fn blank_env_override_is_ignored() {
        let mut config = ClientConfig::default();
        config.apply_overrides(|_| Some("   ".into()));
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn rejects_non_websocket_endpoints() {
        for bad in ["http://localhost:5000", "localhost:5000", "not a uri", "ws://"] {
            let err = ClientConfig::with_endpoint(bad).validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidEndpoint { .. }),
                "{bad} should be rejected, got {err}"
            );
        }
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut config = ClientConfig::default();
        config.reconnect.backoff_factor = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "reconnect.backoff_factor",
                ..
            })
        ));
    }

    #[test]
    fn rejects_max_delay_below_initial() {
        let mut config = ClientConfig::default();
        config.reconnect.max_delay = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ClientConfig::load_from(&tmp.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn load_from_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chat.json");
        std::fs::write(&path, r#"{"endpoint":"ws://127.0.0.1:7000","queueCapacity":3}"#).unwrap();
        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.queue.capacity, 3);
    }

    #[test]
    fn malformed_file_is_json_error() {
        let err = ClientConfig::from_json("{ endpoint: ").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
