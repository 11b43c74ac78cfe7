//! WebSocket write pump: serialises outbound frames.

use futures_util::SinkExt;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::session::CloseReason;

/// Writes frames to the WebSocket in channel order.
///
/// On cancellation, frames already handed to the channel are still written
/// before the closing handshake, so a graceful disconnect does not lose
/// messages that were accepted as sent.
///
/// A failed write ends the whole session: the error is reported on `failed`
/// before `cancel` fires, so the read side can surface it as the close reason.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::UnboundedReceiver<tungstenite::Message>,
    cancel: CancellationToken,
    failed: oneshot::Sender<CloseReason>,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            msg = write_rx.recv() => {
                match msg {
                    Some(m) => {
                        let closing = matches!(m, tungstenite::Message::Close(_));
                        if let Err(e) = write.send(m).await {
                            error!("WebSocket write error: {e}");
                            let _ = failed.send(CloseReason::Error(e.to_string()));
                            cancel.cancel();
                            return;
                        }
                        if closing {
                            debug!("close frame written");
                            return;
                        }
                    }
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    while let Ok(m) = write_rx.try_recv() {
        let closing = matches!(m, tungstenite::Message::Close(_));
        if write.send(m).await.is_err() || closing {
            return;
        }
    }
    let _ = write.send(tungstenite::Message::Close(None)).await;
}
