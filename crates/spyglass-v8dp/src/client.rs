//! Debuggee client: the semantic façade over a shared connection.
//!
//! Each client owns a private pending-request store. It subscribes to the
//! shared [`Connection`], resolves the responses that belong to it, and
//! forwards debuggee events to its owner through an unbounded channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio::task::JoinHandle;

use crate::connection::{Connection, Inbound};
use crate::correlation::Correlation;
use crate::error::V8Error;
use crate::protocol::{Event, Reply, Request};
use crate::registry::ConnectionLease;

/// Expression evaluated once to learn about the debuggee process.
const ENVIRONMENT_EXPRESSION: &str = "JSON.stringify({\
pid: process.pid, \
cwd: process.cwd(), \
filename: process.mainModule ? process.mainModule.filename : process.argv[1], \
nodeVersion: process.version})";

/// Reason used when the client itself is closed.
pub const CLIENT_CLOSED: &str = "debuggee client closed";

/// Something the owner of a client must react to.
#[derive(Debug, Clone)]
pub enum DebuggeeEvent {
    /// A V8DP event such as `break` or `afterCompile`.
    Event(Event),
    /// The connection is gone; always the last item.
    Detached(String),
}

/// Facts about the debuggee process, learned by [`DebuggeeClient::ready`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggeeInfo {
    /// Process id.
    pub pid: u32,
    /// Working directory.
    pub cwd: String,
    /// Main module path, if known.
    #[serde(default)]
    pub filename: Option<String>,
    /// Runtime version string (`v0.12.7`).
    pub node_version: String,
}

struct ClientInner {
    lease: ConnectionLease,
    max_string_length: i64,
    connection: OnceCell<Result<Connection, String>>,
    correlation: Arc<Mutex<Correlation>>,
    events_tx: mpsc::UnboundedSender<DebuggeeEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
    info: OnceCell<DebuggeeInfo>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.try_lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

/// Handle to one debuggee, cheap to clone.
#[derive(Clone)]
pub struct DebuggeeClient {
    inner: Arc<ClientInner>,
}

impl DebuggeeClient {
    /// Create a client over `lease`.
    ///
    /// Returns the client and the receiver its events arrive on. Nothing is
    /// connected until the first request or [`connected`](Self::connected).
    pub fn new(
        lease: ConnectionLease,
        max_string_length: i64,
    ) -> (Self, mpsc::UnboundedReceiver<DebuggeeEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            lease,
            max_string_length,
            connection: OnceCell::new(),
            correlation: Arc::new(Mutex::new(Correlation::new())),
            events_tx,
            pump: Mutex::new(None),
            info: OnceCell::new(),
        });
        (Self { inner }, events_rx)
    }

    /// Debug port this client targets.
    pub fn port(&self) -> u16 {
        self.inner.lease.port()
    }

    /// Connect if not yet connected. Concurrent callers share one attempt.
    ///
    /// # Errors
    ///
    /// Returns `V8Error::Disconnected` with the cached reason when the
    /// connect failed.
    pub async fn connected(&self) -> Result<Connection, V8Error> {
        let result = self
            .inner
            .connection
            .get_or_init(|| async {
                match self.inner.lease.connection().await {
                    Ok(conn) => {
                        let handle = tokio::spawn(pump(
                            conn.subscribe(),
                            self.inner.correlation.clone(),
                            self.inner.events_tx.clone(),
                        ));
                        *self.inner.pump.lock().await = Some(handle);
                        Ok(conn)
                    }
                    Err(e) => {
                        let reason = match e {
                            V8Error::Disconnected(reason) => reason,
                            other => other.to_string(),
                        };
                        tracing::warn!(port = self.port(), %reason, "debuggee connect failed");
                        self.inner.correlation.lock().await.reject_all(&reason);
                        let _ = self
                            .inner
                            .events_tx
                            .send(DebuggeeEvent::Detached(reason.clone()));
                        Err(reason)
                    }
                }
            })
            .await;
        result.clone().map_err(V8Error::Disconnected)
    }

    /// Learn pid, working directory, main module and runtime version.
    ///
    /// The first successful answer is cached; failures are not.
    ///
    /// # Errors
    ///
    /// Propagates request failures, or `InvalidResponse` when the
    /// result cannot be parsed.
    pub async fn ready(&self) -> Result<DebuggeeInfo, V8Error> {
        self.inner
            .info
            .get_or_try_init(|| async {
                let reply = self
                    .request(
                        "evaluate",
                        json!({
                            "expression": ENVIRONMENT_EXPRESSION,
                            "global": true,
                            "maxStringLength": -1,
                        }),
                    )
                    .await?;
                let text = reply
                    .body
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        V8Error::InvalidResponse("environment query returned no string value".into())
                    })?;
                let info: DebuggeeInfo = serde_json::from_str(text)
                    .map_err(|e| V8Error::InvalidResponse(format!("environment query result: {e}")))?;
                tracing::info!(pid = info.pid, version = %info.node_version, "debuggee ready");
                Ok(info)
            })
            .await
            .cloned()
    }

    /// Cached process info, if [`ready`](Self::ready) has succeeded.
    pub fn info(&self) -> Option<DebuggeeInfo> {
        self.inner.info.get().cloned()
    }

    /// Whether the debuggee last reported itself as running.
    pub fn running(&self) -> bool {
        match self.inner.connection.get() {
            Some(Ok(conn)) => conn.running(),
            _ => false,
        }
    }

    /// Whether the debuggee is connected and paused.
    pub fn paused(&self) -> bool {
        match self.inner.connection.get() {
            Some(Ok(conn)) => conn.is_connected() && !conn.running(),
            _ => false,
        }
    }

    /// Send `command` and wait for its reply.
    ///
    /// Object arguments get `maxStringLength` unless they set it. Replies
    /// carry their `refs` as a handle-keyed lookup.
    ///
    /// # Errors
    ///
    /// `Disconnected` when the connection is gone, `Protocol` when the
    /// debuggee answers `success: false`.
    pub async fn request(&self, command: &str, arguments: Value) -> Result<Reply, V8Error> {
        let conn = self.connected().await?;

        let mut arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        if let Some(object) = arguments.as_object_mut() {
            object
                .entry("maxStringLength")
                .or_insert_with(|| json!(self.inner.max_string_length));
        }

        let seq = conn.next_seq();
        let rx = self.inner.correlation.lock().await.register(seq, command)?;
        if let Err(e) = conn.write(&Request::new(seq, command, Some(&arguments))).await {
            self.inner.correlation.lock().await.cancel(seq);
            return Err(e);
        }

        rx.await
            .map_err(|_| V8Error::Disconnected(CLIENT_CLOSED.to_string()))?
    }

    /// Number of requests awaiting a reply.
    pub async fn pending_count(&self) -> usize {
        self.inner.correlation.lock().await.pending_count()
    }

    /// Reject everything in flight and stop listening.
    ///
    /// The shared socket stays open for other clients; it closes when the
    /// last lease on it is dropped.
    pub async fn close(&self) {
        self.inner.correlation.lock().await.reject_all(CLIENT_CLOSED);
        if let Some(handle) = self.inner.pump.lock().await.take() {
            handle.abort();
        }
    }
}

async fn pump(
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    correlation: Arc<Mutex<Correlation>>,
    events_tx: mpsc::UnboundedSender<DebuggeeEvent>,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            Inbound::Response(response) => {
                correlation.lock().await.resolve(response);
            }
            Inbound::Event(event) => {
                let _ = events_tx.send(DebuggeeEvent::Event(event));
            }
            Inbound::Unreadable {
                request_seq,
                reason,
            } => {
                correlation
                    .lock()
                    .await
                    .reject(request_seq, V8Error::InvalidResponse(reason));
            }
            Inbound::Closed(reason) => {
                correlation.lock().await.reject_all(&reason);
                let _ = events_tx.send(DebuggeeEvent::Detached(reason));
                return;
            }
        }
    }
}
