//! CareLink terminal chat client.
//!
//! Connects to the chat broker, prints inbound messages and sends each line
//! typed on stdin. Lines starting with `/` are local commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use carelink_chat_connection::credentials::default_token_path;
use carelink_chat_connection::{
    ChatMessage, ClientConfig, ConnectionEvent, CredentialProvider, MessagingClient, SendStatus,
    SenderRole, StaticToken, TokenFile,
};

#[derive(Parser, Debug)]
#[command(name = "carelink-chat", version, about = "CareLink terminal chat client")]
struct Cli {
    /// Config file (defaults to <config dir>/carelink/chat.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broker endpoint; overrides the config file and CARELINK_WS_URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Role attached to outgoing messages.
    #[arg(long, default_value = "patient")]
    role: SenderRole,

    /// Bearer token for the handshake.
    #[arg(long, env = "CARELINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File holding the bearer token, re-read on every connection attempt.
    /// Ignored when a token is given directly.
    #[arg(long)]
    token_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting CareLink chat");

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ClientConfig::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            ClientConfig::default()
        }),
    };
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }

    let client = MessagingClient::new(config, credentials(cli.token, cli.token_file))
        .context("invalid client configuration")?;
    tracing::info!(endpoint = %client.config().endpoint, role = %cli.role, "configuration loaded");

    client.subscribe(|msg| println!("{}", render(msg)));

    if let Some(mut events) = client.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    client.connect().context("failed to start connection")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/status" => {
                let snap = client.snapshot();
                println!(
                    "state={:?} attempt={} queued={} auth_rejected={} last_error={}",
                    snap.state,
                    snap.attempt,
                    snap.queued,
                    snap.auth_rejected,
                    snap.last_error.as_deref().unwrap_or("-"),
                );
            }
            "/connect" => {
                if let Err(e) = client.connect() {
                    tracing::error!(error = %e, "connect failed");
                }
            }
            "/disconnect" => client.disconnect(),
            text => {
                let msg = ChatMessage::new(cli.role, text).context("failed to build message")?;
                match client.send(&msg) {
                    SendStatus::Sent => {}
                    SendStatus::Queued => println!("(queued until reconnected)"),
                    SendStatus::Dropped => println!("(not sent: outbound queue full)"),
                }
            }
        }
    }

    client.disconnect();
    tracing::info!("bye");
    Ok(())
}

fn credentials(
    token: Option<String>,
    token_file: Option<PathBuf>,
) -> Option<Arc<dyn CredentialProvider>> {
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        return Some(Arc::new(StaticToken::new(token.trim())));
    }
    let file = TokenFile::new(token_file.or_else(|| default_token_path().filter(|p| p.exists()))?);
    if !file.path().exists() {
        tracing::warn!(path = %file.path().display(), "token file does not exist yet");
    }
    tracing::debug!(path = %file.path().display(), "using token file");
    Some(Arc::new(file))
}

fn render(msg: &ChatMessage) -> String {
    let body = msg
        .parse_payload::<String>()
        .unwrap_or_else(|_| msg.payload().get().to_string());
    format!(
        "[{} {}] {}",
        msg.timestamp().format("%H:%M:%S"),
        msg.sender_role(),
        body
    )
}

fn log_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::StateChanged(state) => tracing::info!(?state, "connection state"),
        ConnectionEvent::Reconnecting {
            attempt,
            next_retry_secs,
        } => tracing::info!(
            attempt,
            delay_secs = format_args!("{next_retry_secs:.1}"),
            "reconnecting"
        ),
        ConnectionEvent::AuthRejected { reason } => tracing::error!(
            %reason,
            "credential rejected; refresh the token and type /connect"
        ),
        ConnectionEvent::GaveUp { attempts } => {
            tracing::error!(attempts, "gave up reconnecting; type /connect to retry")
        }
        ConnectionEvent::MalformedFrame { reason } => {
            tracing::warn!(%reason, "ignored malformed frame")
        }
        ConnectionEvent::MessageDropped { id } => tracing::warn!(%id, "message dropped"),
        ConnectionEvent::QueueFlushed { count } => tracing::info!(count, "sent queued messages"),
    }
}
