//! WebSocket read pump: decodes frames and dispatches them to subscribers.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use carelink_protocol::decode_frame;

use crate::session::CloseReason;
use crate::subscribers::SubscriberRegistry;
use crate::types::ConnectionEvent;

/// Everything the read pump needs besides the stream itself.
pub(crate) struct ReadContext {
    pub(crate) subscribers: Arc<SubscriberRegistry>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    pub(crate) write_tx: mpsc::UnboundedSender<tungstenite::Message>,
    pub(crate) max_message_size: usize,
    pub(crate) idle_timeout: Duration,
}

/// Reads frames until the session ends and returns why it ended.
///
/// Frames are dispatched one at a time on this task, so subscribers see
/// them in wire order. Any inbound frame resets the idle deadline; if
/// nothing arrives within `idle_timeout` the peer is considered gone.
pub(crate) async fn read_pump<S>(mut read: S, ctx: ReadContext, cancel: CancellationToken) -> CloseReason
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let idle_deadline = tokio::time::sleep(ctx.idle_timeout);
    tokio::pin!(idle_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return CloseReason::Cancelled,

            () = &mut idle_deadline => {
                warn!(timeout_secs = ctx.idle_timeout.as_secs_f64(), "no traffic from broker, closing");
                return CloseReason::IdleTimeout;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        return CloseReason::Error(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return CloseReason::StreamEnded;
                    }
                };

                idle_deadline.as_mut().reset(tokio::time::Instant::now() + ctx.idle_timeout);

                match msg {
                    tungstenite::Message::Text(text) => {
                        handle_frame(text.as_str().as_bytes(), &ctx);
                    }
                    tungstenite::Message::Binary(data) => {
                        handle_frame(&data, &ctx);
                    }
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = ctx.write_tx.send(tungstenite::Message::Pong(data));
                    }
                    tungstenite::Message::Pong(_) => {
                        trace!("received pong");
                    }
                    tungstenite::Message::Close(frame) => {
                        debug!(?frame, "received close frame");
                        return match frame {
                            Some(f) => CloseReason::Remote {
                                code: Some(u16::from(f.code)),
                                reason: f.reason.as_str().to_string(),
                            },
                            None => CloseReason::Remote { code: None, reason: String::new() },
                        };
                    }
                    tungstenite::Message::Frame(_) => {}
                }
            }
        }
    }
}

/// Decodes one frame and hands it to subscribers. Bad frames are dropped.
fn handle_frame(bytes: &[u8], ctx: &ReadContext) {
    let msg = match decode_frame(bytes, ctx.max_message_size) {
        Ok(m) => m,
        Err(e) => {
            warn!(len = bytes.len(), "dropping inbound frame: {e}");
            let _ = ctx.events_tx.try_send(ConnectionEvent::MalformedFrame {
                reason: e.to_string(),
            });
            return;
        }
    };

    trace!(id = %msg.id(), role = %msg.sender_role(), "received message");

    if ctx.subscribers.dispatch(&msg) == 0 {
        debug!(id = %msg.id(), "no subscribers, message discarded");
    }
}
