//! Bearer credentials attached to the WebSocket handshake.
//!
//! The client asks its provider for a token on every connection attempt,
//! so a refreshed token is picked up by the next `connect` after an
//! authentication rejection.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Supplies the opaque bearer token for a connection attempt.
pub trait CredentialProvider: Send + Sync {
    /// Returns the current token, or `None` if no credential is available.
    fn token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A token fixed at construction.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// A token kept in a file, written by the portal's sign-in flow.
///
/// The file is re-read on every call so rotations take effect without
/// restarting the client.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the token. A missing or blank file yields `Ok(None)`.
    pub fn read(&self) -> std::io::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let token = data.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    /// Writes a new token, creating parent directories as needed.
    pub fn save(&self, token: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token.trim())?;
        debug!(path = %self.path.display(), "persisted chat token");
        Ok(())
    }

    /// Deletes the token file if it exists.
    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl CredentialProvider for TokenFile {
    fn token(&self) -> Option<String> {
        match self.read() {
            Ok(token) => token,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read token file");
                None
            }
        }
    }
}

/// Returns the default token file path.
pub fn default_token_path() -> Option<PathBuf> {
    crate::config::config_dir().map(|d| d.join("carelink").join("token"))
}
