//! In-process chat broker for integration tests.
//!
//! Listens on an ephemeral local port, records every text frame a client
//! sends, and lets tests push frames, drop connections or send close codes
//! through a [`Peer`] handle per accepted session.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use carelink_chat_connection::{
    ChatMessage, ClientConfig, ConnectionEvent, ConnectionState, ReconnectConfig,
};

pub const WAIT: Duration = Duration::from_secs(5);

enum PeerCommand {
    Text(String),
    Drop,
    Close(u16, String),
}

/// Control handle for one accepted session.
#[derive(Clone)]
pub struct Peer {
    tx: mpsc::UnboundedSender<PeerCommand>,
}

impl Peer {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.tx.send(PeerCommand::Text(text.into()));
    }

    pub fn send_message(&self, msg: &ChatMessage) {
        self.send_text(msg.to_frame().unwrap());
    }

    /// Drops the TCP connection without a closing handshake.
    pub fn drop_connection(&self) {
        let _ = self.tx.send(PeerCommand::Drop);
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(PeerCommand::Close(code, reason.to_string()));
    }
}

#[derive(Default)]
struct BrokerState {
    accepting: AtomicBool,
    echo: AtomicBool,
    required_token: Mutex<Option<String>>,
    last_authorization: Mutex<Option<String>>,
    connection_attempts: AtomicUsize,
    sessions: AtomicUsize,
}

pub struct TestBroker {
    pub url: String,
    state: Arc<BrokerState>,
    received_rx: mpsc::UnboundedReceiver<String>,
    peers_rx: mpsc::UnboundedReceiver<Peer>,
    cancel: CancellationToken,
}

impl TestBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(BrokerState::default());
        state.accepting.store(true, Ordering::SeqCst);

        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let st = state.clone();
        let c = cancel.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = c.cancelled() => return,
                    r = listener.accept() => match r {
                        Ok((stream, _)) => stream,
                        Err(_) => continue,
                    },
                };
                st.connection_attempts.fetch_add(1, Ordering::SeqCst);
                if !st.accepting.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                tokio::spawn(serve(
                    stream,
                    st.clone(),
                    received_tx.clone(),
                    peers_tx.clone(),
                    c.clone(),
                ));
            }
        });

        Self {
            url: format!("ws://127.0.0.1:{port}"),
            state,
            received_rx,
            peers_rx,
            cancel,
        }
    }

    /// Client config pointing at this broker, with fast backoff.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::with_endpoint(self.url.clone());
        config.reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            ..ReconnectConfig::default()
        };
        config
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.state.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn set_echo(&self, echo: bool) {
        self.state.echo.store(echo, Ordering::SeqCst);
    }

    pub fn require_token(&self, token: &str) {
        *self.state.required_token.lock().unwrap() = Some(token.to_string());
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }

    /// TCP connections accepted, including rejected ones.
    pub fn connection_attempts(&self) -> usize {
        self.state.connection_attempts.load(Ordering::SeqCst)
    }

    /// Completed WebSocket handshakes.
    pub fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    pub async fn next_peer(&mut self) -> Peer {
        tokio::time::timeout(WAIT, self.peers_rx.recv())
            .await
            .expect("timed out waiting for a session")
            .expect("broker stopped")
    }

    pub async fn next_frame(&mut self) -> ChatMessage {
        let text = tokio::time::timeout(WAIT, self.received_rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("broker stopped");
        serde_json::from_str(&text).expect("client sent a valid frame")
    }

    pub fn try_next_frame(&mut self) -> Option<String> {
        self.received_rx.try_recv().ok()
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    state: Arc<BrokerState>,
    received_tx: mpsc::UnboundedSender<String>,
    peers_tx: mpsc::UnboundedSender<Peer>,
    cancel: CancellationToken,
) {
    let st = state.clone();
    let check_auth = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let auth = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *st.last_authorization.lock().unwrap() = auth.clone();

        let required = st.required_token.lock().unwrap().clone();
        match required {
            Some(token) if auth.as_deref() != Some(format!("Bearer {token}").as_str()) => {
                let mut err = ErrorResponse::new(Some("unauthorized".into()));
                *err.status_mut() = StatusCode::UNAUTHORIZED;
                Err(err)
            }
            _ => Ok(resp),
        }
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, check_auth).await else {
        return;
    };
    state.sessions.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut source) = ws.split();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let _ = peers_tx.send(Peer { tx: cmd_tx });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            Some(cmd) = cmd_rx.recv() => match cmd {
                PeerCommand::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                PeerCommand::Drop => return,
                PeerCommand::Close(code, reason) => {
                    let frame = CloseFrame {
                        code: code.into(),
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    return;
                }
            },
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = received_tx.send(text.as_str().to_string());
                    if state.echo.load(Ordering::SeqCst)
                        && sink.send(Message::Text(text)).await.is_err()
                    {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Waits for the first event matching `pred`, discarding the rest.
pub async fn wait_for<F>(events: &mut mpsc::Receiver<ConnectionEvent>, mut pred: F) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(ev) if pred(&ev) => return ev,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_for_state(events: &mut mpsc::Receiver<ConnectionEvent>, state: ConnectionState) {
    wait_for(events, |ev| *ev == ConnectionEvent::StateChanged(state)).await;
}

/// Collects every event that arrives within `window`.
pub async fn collect_for(
    events: &mut mpsc::Receiver<ConnectionEvent>,
    window: Duration,
) -> Vec<ConnectionEvent> {
    let mut out = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(ev)) = tokio::time::timeout_at(deadline, events.recv()).await {
        out.push(ev);
    }
    out
}

/// A local address with nothing listening on it.
pub async fn unused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("ws://127.0.0.1:{port}")
}
