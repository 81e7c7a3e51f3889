//! WebSocket front door: one inspector session per UI connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use spyglass_config::Config;
use spyglass_inspector::Session;
use spyglass_v8dp::ConnectionRegistry;

/// Debuggees are always reached on the loopback interface.
pub const DEBUGGEE_HOST: &str = "127.0.0.1";

/// Accept UI connections until the listener fails.
pub async fn serve(config: Arc<Config>) -> Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.web_port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to listen on {address}"))?;
    info!(
        "visit ws://{}/?port={} from the DevTools front-end",
        address, config.server.debug_port
    );
    run(listener, config).await
}

/// Accept loop over an already bound listener.
pub async fn run(listener: TcpListener, config: Arc<Config>) -> Result<()> {
    let registry = ConnectionRegistry::new();
    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        debug!(%peer, "UI connected");
        let config = config.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, config, registry).await {
                warn!(%peer, "UI connection ended: {e:#}");
            }
        });
    }
}

/// The debuggee port named by a `?port=N` query, if any.
pub fn debuggee_port(query: Option<&str>) -> Option<u16> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "port")
        .and_then(|(_, value)| value.parse().ok())
}

async fn handle_connection(
    stream: TcpStream,
    config: Arc<Config>,
    registry: ConnectionRegistry,
) -> Result<()> {
    let mut requested = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        requested = debuggee_port(request.uri().query());
        Ok(response)
    };
    let socket = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .context("WebSocket handshake failed")?;
    let port = requested.unwrap_or(config.server.debug_port);

    let (session, mut outbound) = Session::start(config, &registry, DEBUGGEE_HOST, port)
        .context("failed to start inspector session")?;
    info!(port, "inspector session started");

    let (mut sink, mut incoming) = socket.split();
    let outcome = loop {
        tokio::select! {
            message = incoming.next() => match message {
                Some(Ok(Message::Text(text))) => session.handle_message(&text),
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(anyhow::Error::from(e).context("WebSocket read failed")),
            },
            value = outbound.recv() => {
                let Some(value) = value else { break Ok(()) };
                if let Err(e) = sink.send(Message::Text(value.to_string())).await {
                    error!("failed to send to UI: {e}");
                    break Ok(());
                }
            }
        }
    };

    session.close().await;
    outcome
}
