//! Session driver: opens sessions and reconnects with exponential backoff.
//!
//! Contains the shared [`ClientContext`], the locked [`Core`] state, and the
//! driver loop spawned by `MessagingClient::connect`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::credentials::CredentialProvider;
use crate::queue::OutboundQueue;
use crate::session::{CloseReason, WsSession};
use crate::subscribers::SubscriberRegistry;
use crate::types::{ConnectionEvent, ConnectionSnapshot, ConnectionState};

/// Mutable connection state. Guarded by a blocking mutex that is never
/// held across an `.await`.
pub(crate) struct Core {
    pub(crate) state: ConnectionState,
    pub(crate) attempt: u32,
    pub(crate) last_error: Option<String>,
    pub(crate) auth_rejected: bool,
    pub(crate) queue: OutboundQueue,
    pub(crate) session: Option<WsSession>,
    /// Cancel token of the running driver, if any.
    pub(crate) driver: Option<CancellationToken>,
}

/// State shared between the client handle and its driver task.
pub(crate) struct ClientContext {
    pub(crate) config: ClientConfig,
    pub(crate) credentials: Option<Arc<dyn CredentialProvider>>,
    pub(crate) core: Mutex<Core>,
    pub(crate) subscribers: Arc<SubscriberRegistry>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
}

impl ClientContext {
    pub(crate) fn new(
        config: ClientConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
        events_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let queue = OutboundQueue::new(config.queue.capacity, config.queue.overflow);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            credentials,
            core: Mutex::new(Core {
                state: ConnectionState::Idle,
                attempt: 0,
                last_error: None,
                auth_rejected: false,
                queue,
                session: None,
                driver: None,
            }),
            subscribers: Arc::new(SubscriberRegistry::new()),
            events_tx,
            state_tx,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emits an event without blocking. A full channel drops the event.
    pub(crate) fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!("connection event not delivered: {e}");
        }
    }

    /// Moves `core` to `state`, notifying watchers and the event channel.
    pub(crate) fn transition(&self, core: &mut Core, state: ConnectionState) {
        if core.state == state {
            return;
        }
        debug!(from = ?core.state, to = ?state, "connection state changed");
        core.state = state;
        self.state_tx.send_replace(state);
        self.emit(ConnectionEvent::StateChanged(state));
    }

    pub(crate) fn snapshot(&self) -> ConnectionSnapshot {
        let core = self.lock();
        ConnectionSnapshot {
            state: core.state,
            endpoint: self.config.endpoint.clone(),
            attempt: core.attempt,
            last_error: core.last_error.clone(),
            auth_rejected: core.auth_rejected,
            queued: core.queue.len(),
        }
    }
}

/// Cancels the running driver, if any, and forgets its token.
pub(crate) fn cancel_driver(core: &mut Core) {
    if let Some(token) = core.driver.take() {
        token.cancel();
    }
}

/// How a connection attempt or session ended.
struct Failure {
    reason: String,
    auth: bool,
}

/// Drives the connection until cancelled, rejected, or out of attempts.
///
/// Each iteration opens one session. When it fails or ends, exactly one
/// retry is scheduled after the backoff delay for the current attempt.
pub(crate) async fn run_connection(ctx: Arc<ClientContext>, cancel: CancellationToken) {
    loop {
        let token = match &ctx.credentials {
            Some(provider) => match provider.token() {
                Some(token) => Some(token),
                None => {
                    reject(&ctx, &cancel, "no credential available".into());
                    return;
                }
            },
            None => None,
        };

        info!(endpoint = %ctx.config.endpoint, "connecting");
        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("connect cancelled");
                return;
            }
            r = WsSession::open(
                &ctx.config,
                token.as_deref(),
                ctx.subscribers.clone(),
                ctx.events_tx.clone(),
            ) => r,
        };

        let failure = match opened {
            Ok((session, closed_rx)) => {
                if !promote_open(&ctx, &cancel, session) {
                    return;
                }
                let reason = tokio::select! {
                    _ = cancel.cancelled() => return,
                    r = closed_rx => r.unwrap_or(CloseReason::StreamEnded),
                };
                Failure {
                    auth: reason.is_auth_revoked(),
                    reason: reason.to_string(),
                }
            }
            Err(e) => Failure {
                auth: e.is_auth_rejection(),
                reason: e.to_string(),
            },
        };

        if failure.auth {
            reject(&ctx, &cancel, failure.reason);
            return;
        }

        let Some(delay) = schedule_retry(&ctx, &cancel, failure.reason) else {
            return;
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        {
            let mut core = ctx.lock();
            if cancel.is_cancelled() {
                return;
            }
            ctx.transition(&mut core, ConnectionState::Connecting);
        }
    }
}

/// Installs a freshly opened session and flushes the queue into it.
///
/// Runs under the core lock so a concurrent `disconnect` either sees the
/// open session or cancels the driver before it is installed. Returns
/// `false` if the driver was cancelled meanwhile.
fn promote_open(ctx: &ClientContext, cancel: &CancellationToken, session: WsSession) -> bool {
    let mut core = ctx.lock();
    if cancel.is_cancelled() {
        session.close();
        return false;
    }

    let mut flushed = 0usize;
    while let Some(frame) = core.queue.pop_front() {
        let id = frame.id.clone();
        if session.send_text(frame.text.clone()).is_err() {
            core.queue.push_front(frame);
            break;
        }
        trace!(%id, "flushed queued message");
        flushed += 1;
    }

    core.session = Some(session);
    core.attempt = 0;
    core.last_error = None;
    ctx.transition(&mut core, ConnectionState::Open);
    if flushed > 0 {
        ctx.emit(ConnectionEvent::QueueFlushed { count: flushed });
    }
    info!(endpoint = %ctx.config.endpoint, flushed, "connected");
    true
}

/// Records a failure and returns the backoff delay, or `None` if the
/// driver should stop.
fn schedule_retry(
    ctx: &ClientContext,
    cancel: &CancellationToken,
    reason: String,
) -> Option<std::time::Duration> {
    let mut core = ctx.lock();
    if cancel.is_cancelled() {
        return None;
    }
    core.session = None;
    core.last_error = Some(reason.clone());
    ctx.transition(&mut core, ConnectionState::Closed);

    core.attempt = core.attempt.saturating_add(1);
    let attempt = core.attempt;
    if ctx.config.reconnect.exhausted(attempt) {
        warn!(attempts = attempt - 1, error = %reason, "giving up on reconnecting");
        ctx.emit(ConnectionEvent::GaveUp {
            attempts: attempt - 1,
        });
        core.driver = None;
        return None;
    }

    let delay = ctx.config.reconnect.delay_for_attempt(attempt);
    let delay_secs = delay.as_secs_f64();
    warn!(
        attempt,
        delay_secs = format_args!("{delay_secs:.2}"),
        error = %reason,
        "connection lost, reconnecting"
    );
    ctx.emit(ConnectionEvent::Reconnecting {
        attempt,
        next_retry_secs: delay_secs,
    });
    Some(delay)
}

/// Stops the driver after the endpoint refused the credential.
fn reject(ctx: &ClientContext, cancel: &CancellationToken, reason: String) {
    let mut core = ctx.lock();
    if cancel.is_cancelled() {
        return;
    }
    warn!(error = %reason, "credential rejected, not reconnecting");
    core.session = None;
    core.last_error = Some(reason.clone());
    core.auth_rejected = true;
    core.driver = None;
    ctx.transition(&mut core, ConnectionState::Closed);
    ctx.emit(ConnectionEvent::AuthRejected { reason });
}
