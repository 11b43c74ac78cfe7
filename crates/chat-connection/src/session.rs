//! A single WebSocket session to the chat broker.
//!
//! One session corresponds to one connection epoch. It owns three pumps
//! (read, write, ping) and reports why it ended through a oneshot channel.
//! Reconnecting means opening a new session; a session is never reused.

use std::fmt;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use carelink_protocol::constants::WS_CLOSE_TOKEN_REVOKED;

use crate::config::ClientConfig;
use crate::pumps::read::ReadContext;
use crate::subscribers::SubscriberRegistry;
use crate::types::ConnectionEvent;

/// Errors from opening or using a session.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("handshake timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("endpoint rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("token is not a valid header value")]
    InvalidToken,
}

impl WsError {
    /// Whether retrying with the same credential is pointless.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, WsError::Unauthorized(_) | WsError::InvalidToken)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// The broker sent a close frame.
    Remote { code: Option<u16>, reason: String },
    /// The transport failed.
    Error(String),
    /// The stream ended without a close frame.
    StreamEnded,
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
    /// The session was closed locally.
    Cancelled,
}

impl CloseReason {
    pub(crate) fn is_auth_revoked(&self) -> bool {
        matches!(self, CloseReason::Remote { code: Some(code), .. } if *code == WS_CLOSE_TOKEN_REVOKED)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Remote { code: Some(code), reason } if reason.is_empty() => {
                write!(f, "closed by peer (code {code})")
            }
            CloseReason::Remote { code: Some(code), reason } => {
                write!(f, "closed by peer (code {code}: {reason})")
            }
            CloseReason::Remote { code: None, .. } => f.write_str("closed by peer"),
            CloseReason::Error(e) => write!(f, "transport error: {e}"),
            CloseReason::StreamEnded => f.write_str("connection dropped"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
            CloseReason::Cancelled => f.write_str("closed locally"),
        }
    }
}

/// Live WebSocket session.
///
/// Dropping the session cancels its pumps; the write pump still gets to
/// send a close frame on the way out.
pub(crate) struct WsSession {
    write_tx: mpsc::UnboundedSender<tungstenite::Message>,
    cancel: CancellationToken,
}

impl WsSession {
    /// Connects to `config.endpoint` and starts the pumps.
    ///
    /// The returned receiver resolves once the session ends.
    pub(crate) async fn open(
        config: &ClientConfig,
        token: Option<&str>,
        subscribers: Arc<SubscriberRegistry>,
        events_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Result<(Self, oneshot::Receiver<CloseReason>), WsError> {
        let mut request = config.endpoint.as_str().into_client_request()?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| WsError::InvalidToken)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_size);
        ws_config.max_frame_size = Some(config.max_message_size);

        let handshake = tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false);
        let (ws_stream, _) = tokio::time::timeout(config.handshake_timeout, handshake)
            .await
            .map_err(|_| WsError::Timeout)?
            .map_err(classify_handshake_error)?;
        let (write, read) = ws_stream.split();

        Ok(Self::start(write, read, config, subscribers, events_tx))
    }

    /// Spawns the pumps over an already established stream.
    pub(crate) fn start<W, R>(
        write: W,
        read: R,
        config: &ClientConfig,
        subscribers: Arc<SubscriberRegistry>,
        events_tx: mpsc::Sender<ConnectionEvent>,
    ) -> (Self, oneshot::Receiver<CloseReason>)
    where
        W: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin + Send + 'static,
        R: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin + Send + 'static,
    {
        let (write_tx, write_rx) = mpsc::unbounded_channel::<tungstenite::Message>();
        let (closed_tx, closed_rx) = oneshot::channel();
        let (failed_tx, mut failed_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
            failed_tx,
        ));

        {
            let ctx = ReadContext {
                subscribers,
                events_tx,
                write_tx: write_tx.clone(),
                max_message_size: config.max_message_size,
                idle_timeout: config.heartbeat.idle_timeout,
            };
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut reason = crate::pumps::read::read_pump(read, ctx, cancel).await;
                if reason == CloseReason::Cancelled
                    && let Ok(write_failure) = failed_rx.try_recv()
                {
                    reason = write_failure;
                }
                debug!(reason = %reason, "read pump finished");
                let _ = closed_tx.send(reason);
            });
        }

        tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            config.heartbeat.ping_period,
            cancel.clone(),
        ));

        (Self { write_tx, cancel }, closed_rx)
    }

    /// Queues a text frame on the writer. Fails only if the writer is gone.
    pub(crate) fn send_text(&self, text: String) -> Result<(), WsError> {
        self.write_tx
            .send(tungstenite::Message::Text(text.into()))
            .map_err(|_| WsError::Closed)
    }

    /// Sends a normal close frame and stops the pumps.
    pub(crate) fn close(&self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        let _ = self.write_tx.send(tungstenite::Message::Close(Some(frame)));
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<tungstenite::Message>) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        (
            Self {
                write_tx,
                cancel: CancellationToken::new(),
            },
            write_rx,
        )
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn classify_handshake_error(err: tungstenite::Error) -> WsError {
    if let tungstenite::Error::Http(ref response) = err {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return WsError::Unauthorized(status);
        }
    }
    WsError::Ws(err)
}
