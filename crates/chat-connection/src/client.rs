//! The messaging client: one logical connection to the chat broker.
//!
//! Owns the connection state, the outbound queue and the subscriber list,
//! and runs a driver task that opens sessions and reconnects after
//! failures until the caller disconnects.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use carelink_protocol::ChatMessage;

use crate::config::{ClientConfig, ConfigError};
use crate::credentials::CredentialProvider;
use crate::queue::{PushOutcome, QueuedFrame};
use crate::reconnection::{ClientContext, cancel_driver, run_connection};
use crate::subscribers::SubscriptionId;
use crate::types::{ConnectionEvent, ConnectionSnapshot, ConnectionState, SendStatus};

/// Synchronous errors from constructing or starting the client.
///
/// Transport failures are never returned here; they drive the reconnect
/// loop and show up as [`ConnectionEvent`]s.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no credential available")]
    MissingCredential,

    #[error("connect must be called from within a Tokio runtime")]
    NoRuntime,
}

/// Messaging client for the chat broker.
pub struct MessagingClient {
    ctx: Arc<ClientContext>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl MessagingClient {
    /// Creates a client in the `Idle` state. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(
        config: ClientConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(64);
        Ok(Self {
            ctx: Arc::new(ClientContext::new(config, credentials, events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Starts connecting. A no-op while already connecting or open.
    ///
    /// Calling this while a reconnect is pending retries immediately, and
    /// calling it after an authentication rejection clears the rejection.
    pub fn connect(&self) -> Result<(), ClientError> {
        let state = self.state();
        if state.is_active() {
            debug!(?state, "connect ignored, already active");
            return Ok(());
        }

        // Providers may block or call back into the client; ask before locking.
        if let Some(provider) = &self.ctx.credentials
            && provider.token().is_none()
        {
            return Err(ClientError::MissingCredential);
        }
        let handle = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut core = self.ctx.lock();
        if core.state.is_active() {
            debug!(state = ?core.state, "connect ignored, already active");
            return Ok(());
        }
        cancel_driver(&mut core);
        let cancel = CancellationToken::new();
        core.driver = Some(cancel.clone());
        core.auth_rejected = false;
        core.attempt = 0;
        self.ctx.transition(&mut core, ConnectionState::Connecting);
        drop(core);

        handle.spawn(run_connection(self.ctx.clone(), cancel));
        Ok(())
    }

    /// Sends a message, or buffers it while the connection is not open.
    ///
    /// Never blocks and never fails; the returned status says whether the
    /// message went to the wire, was buffered, or was dropped.
    pub fn send(&self, msg: &ChatMessage) -> SendStatus {
        let text = match msg.to_frame() {
            Ok(text) => text,
            Err(e) => {
                warn!(id = %msg.id(), "failed to encode message: {e}");
                return SendStatus::Dropped;
            }
        };

        let mut core = self.ctx.lock();
        let text = match (&core.session, core.state) {
            (Some(session), ConnectionState::Open) => match session.send_text(text.clone()) {
                Ok(()) => return SendStatus::Sent,
                Err(_) => {
                    debug!(id = %msg.id(), "writer gone, queueing instead");
                    text
                }
            },
            _ => text,
        };

        let frame = QueuedFrame {
            id: msg.id().to_string(),
            text,
        };
        match core.queue.push(frame) {
            PushOutcome::Queued => SendStatus::Queued,
            PushOutcome::Evicted(old) => {
                warn!(dropped = %old.id, "outbound queue full, dropped oldest message");
                self.ctx.emit(ConnectionEvent::MessageDropped { id: old.id });
                SendStatus::Queued
            }
            PushOutcome::Rejected(new) => {
                warn!(dropped = %new.id, "outbound queue full, dropped message");
                self.ctx.emit(ConnectionEvent::MessageDropped { id: new.id });
                SendStatus::Dropped
            }
        }
    }

    /// Registers a callback for inbound messages.
    ///
    /// Callbacks run on the session's read task, one message at a time, in
    /// arrival order. They may call back into the client.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.ctx.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.ctx.subscribers.unsubscribe(id)
    }

    /// Closes the connection and stops reconnecting until the next
    /// [`connect`](Self::connect). Queued messages are kept.
    pub fn disconnect(&self) {
        let mut core = self.ctx.lock();
        cancel_driver(&mut core);

        match core.state {
            ConnectionState::Idle | ConnectionState::Closing => {}
            ConnectionState::Closed if core.session.is_none() => {
                debug!("disconnect: pending reconnect cancelled");
            }
            _ => {
                self.ctx.transition(&mut core, ConnectionState::Closing);
                if let Some(session) = core.session.take() {
                    session.close();
                }
                self.ctx.transition(&mut core, ConnectionState::Closed);
                info!(endpoint = %self.ctx.config.endpoint, "disconnected");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.lock().state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.ctx.snapshot()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state_tx.subscribe()
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }
}

impl Drop for MessagingClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for MessagingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingClient")
            .field("endpoint", &self.ctx.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
