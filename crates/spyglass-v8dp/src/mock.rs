//! Scripted mock debuggee for tests.
//!
//! Listens on an ephemeral local port, greets each connection with the V8
//! handshake header, answers every request through a caller-supplied
//! handler, and lets the test push events or sever connections at will.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::transport::{encode_frame, FrameDecoder};

const HANDSHAKE: &[u8] =
    b"Type: connect\r\nV8-Version: 3.28.71.19\r\nProtocol-Version: 1\r\nEmbedding-Host: node v0.12.7\r\nContent-Length: 0\r\n\r\n";

/// How the mock answers one request.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// `success: true` with a body, optional refs and running flag.
    Success {
        /// Response body.
        body: Value,
        /// Object mirrors for `refs`.
        refs: Vec<Value>,
        /// `running` flag, omitted when `None`.
        running: Option<bool>,
    },
    /// `success: false` with a message.
    Failure(String),
    /// Held until [`MockDebuggee::release_held`].
    Held(Box<MockResponse>),
    /// No response at all.
    Silent,
}

impl MockResponse {
    /// Successful response with `body`.
    pub fn ok(body: Value) -> Self {
        MockResponse::Success {
            body,
            refs: Vec::new(),
            running: None,
        }
    }

    /// Failed response.
    pub fn fail(message: impl Into<String>) -> Self {
        MockResponse::Failure(message.into())
    }

    /// Attach `refs` to a successful response.
    pub fn with_refs(self, new_refs: Vec<Value>) -> Self {
        match self {
            MockResponse::Success { body, running, .. } => MockResponse::Success {
                body,
                refs: new_refs,
                running,
            },
            other => other,
        }
    }

    /// Attach a `running` flag to a successful response.
    pub fn running(self, flag: bool) -> Self {
        match self {
            MockResponse::Success { body, refs, .. } => MockResponse::Success {
                body,
                refs,
                running: Some(flag),
            },
            other => other,
        }
    }

    /// Hold this response until released.
    pub fn held(self) -> Self {
        MockResponse::Held(Box::new(self))
    }
}

/// Request handler: `(command, arguments) -> response`.
pub type MockHandler = Box<dyn Fn(&str, &Value) -> MockResponse + Send + Sync>;

struct Peer {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

struct State {
    handler: MockHandler,
    requests: Mutex<Vec<(String, Value)>>,
    peers: Mutex<HashMap<usize, Peer>>,
    next_peer: AtomicUsize,
    held: Mutex<Vec<(usize, Vec<u8>)>>,
}

/// A running mock debuggee.
pub struct MockDebuggee {
    port: u16,
    state: Arc<State>,
    accept: JoinHandle<()>,
}

impl MockDebuggee {
    /// Start listening on `127.0.0.1` with an ephemeral port.
    pub async fn start<F>(handler: F) -> std::io::Result<Self>
    where
        F: Fn(&str, &Value) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(State {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            peers: Mutex::new(HashMap::new()),
            next_peer: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
        });

        let accept = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    serve(stream, state.clone()).await;
                }
            }
        });

        Ok(Self {
            port,
            state,
            accept,
        })
    }

    /// Port the mock listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<(String, Value)> {
        self.state.requests.lock().await.clone()
    }

    /// Command names received so far, in arrival order.
    pub async fn commands(&self) -> Vec<String> {
        self.requests()
            .await
            .into_iter()
            .map(|(command, _)| command)
            .collect()
    }

    /// Arguments of every request for `command`.
    pub async fn requests_for(&self, command: &str) -> Vec<Value> {
        self.requests()
            .await
            .into_iter()
            .filter(|(c, _)| c == command)
            .map(|(_, args)| args)
            .collect()
    }

    /// Wait until at least `count` requests for `command` have arrived.
    ///
    /// Panics after five seconds; this is test support.
    pub async fn wait_for(&self, command: &str, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let seen = self.requests_for(command).await;
            if seen.len() >= count {
                return seen;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {count} `{command}` requests, saw {seen:?}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Number of open client connections.
    pub async fn connection_count(&self) -> usize {
        self.state.peers.lock().await.len()
    }

    /// Push an event to every connected client.
    pub async fn emit_event(&self, event: &str, body: Value) {
        let frame = encode_frame(&json!({
            "seq": 0,
            "type": "event",
            "event": event,
            "body": body,
        }));
        for peer in self.state.peers.lock().await.values() {
            let _ = peer.tx.send(frame.clone());
        }
    }

    /// Send held responses, most recent first.
    pub async fn release_held(&self) {
        let held = std::mem::take(&mut *self.state.held.lock().await);
        let peers = self.state.peers.lock().await;
        for (peer, frame) in held.into_iter().rev() {
            if let Some(peer) = peers.get(&peer) {
                let _ = peer.tx.send(frame);
            }
        }
    }

    /// Close every client connection; the listener stays up.
    pub async fn drop_connections(&self) {
        self.state.peers.lock().await.clear();
    }
}

impl Drop for MockDebuggee {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<State>) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let index = state.next_peer.fetch_add(1, Ordering::Relaxed);
    state
        .peers
        .lock()
        .await
        .insert(index, Peer { tx: tx.clone() });
    let _ = tx.send(HANDSHAKE.to_vec());
    drop(tx);

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            decoder.push(&buf[..n]);
            while let Some(frame) = decoder.next_frame() {
                let Ok(request) = frame else { continue };
                answer(&state, index, request).await;
            }
        }
        state.peers.lock().await.remove(&index);
    });
}

async fn answer(state: &State, peer: usize, request: Value) {
    let command = request["command"].as_str().unwrap_or_default().to_string();
    let arguments = request.get("arguments").cloned().unwrap_or(Value::Null);
    state
        .requests
        .lock()
        .await
        .push((command.clone(), arguments.clone()));

    let mut response = (state.handler)(&command, &arguments);
    let mut hold = false;
    while let MockResponse::Held(inner) = response {
        hold = true;
        response = *inner;
    }

    let mut frame = json!({
        "seq": 0,
        "type": "response",
        "request_seq": request["seq"],
        "command": command,
    });
    match response {
        MockResponse::Success {
            body,
            refs,
            running,
        } => {
            frame["success"] = json!(true);
            frame["body"] = body;
            if !refs.is_empty() {
                frame["refs"] = Value::Array(refs);
            }
            if let Some(running) = running {
                frame["running"] = json!(running);
            }
        }
        MockResponse::Failure(message) => {
            frame["success"] = json!(false);
            frame["message"] = json!(message);
        }
        MockResponse::Silent | MockResponse::Held(_) => return,
    }

    let bytes = encode_frame(&frame);
    if hold {
        state.held.lock().await.push((peer, bytes));
        return;
    }
    if let Some(peer) = state.peers.lock().await.get(&peer) {
        let _ = peer.tx.send(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DebuggeeClient;
    use crate::registry::ConnectionRegistry;

    #[tokio::test]
    async fn mock_answers_and_records() {
        let mock = MockDebuggee::start(|command, _| match command {
            "version" => MockResponse::ok(json!({"V8Version": "3.28.71.19"})).running(true),
            _ => MockResponse::fail("unknown command"),
        })
        .await
        .unwrap();

        let registry = ConnectionRegistry::new();
        let (client, _events) = DebuggeeClient::new(registry.acquire("127.0.0.1", mock.port()), 50);
        let reply = client.request("version", json!({})).await.unwrap();
        assert_eq!(reply.body["V8Version"], "3.28.71.19");
        assert!(client.running());

        let err = client.request("bogus", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "bogus failed: unknown command");
        assert_eq!(mock.commands().await, vec!["version", "bogus"]);
    }

    #[tokio::test]
    async fn held_responses_release_in_reverse() {
        let mock = MockDebuggee::start(|_, args| MockResponse::ok(args.clone()).held())
            .await
            .unwrap();
        let registry = ConnectionRegistry::new();
        let (client, _events) = DebuggeeClient::new(registry.acquire("127.0.0.1", mock.port()), 50);

        let calls: Vec<_> = (0..3)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.request("evaluate", json!({ "n": i })).await })
            })
            .collect();
        mock.wait_for("evaluate", 3).await;
        mock.release_held().await;

        for (i, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await.unwrap().unwrap().body["n"], i as i64);
        }
    }
}
