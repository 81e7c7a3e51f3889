//! Runtime code injection.
//!
//! V8DP has no command for loading code into the debuggee, so the injector
//! bootstraps one. It evaluates a statement that registers a one-shot
//! handler for a private marker and fires it synchronously; the handler
//! stops on a `debugger` statement, so the break's top frame invocation text
//! is exactly [`SENTINEL_INVOCATION`]. When that break arrives the injector
//! evaluates the injector server in the paused frame, learns the server's
//! port, connects a second V8DP client to it and resumes the debuggee. From then on agents load their payloads through that client and
//! receive the events their payloads emit.
//!
//! Injections requested before the server is live are queued and loaded in
//! request order once it is.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{json, Value};
use spyglass_v8dp::{ConnectionRegistry, DebuggeeClient, DebuggeeEvent, Event};
use tokio::sync::{mpsc, oneshot, watch, Mutex, OnceCell};

use crate::error::InspectorError;

/// Name of the one-shot handler the handshake breaks in.
pub const SENTINEL_FUNCTION: &str = "spyglassInjectorHandshake";

/// Invocation text V8 reports for the handshake break's top frame. The
/// handler runs as a `process` listener, so `process` is the receiver.
pub const SENTINEL_INVOCATION: &str = "#<process>.spyglassInjectorHandshake()";

const HANDSHAKE_EVENT: &str = "spyglass:injector-handshake";

const SERVER_SOURCE: &str = include_str!("../injections/injector_server.js");

/// Statement that triggers the handshake break.
pub fn handshake_expression() -> String {
    format!(
        "process.once('{HANDSHAKE_EVENT}', function {SENTINEL_FUNCTION}() {{\n  debugger;\n}});\n\
         process.emit('{HANDSHAKE_EVENT}');"
    )
}

/// Expression that starts the injector server and evaluates to its port.
pub fn server_expression() -> String {
    format!(
        "({})(typeof require === 'function' ? require : \
         process.mainModule.require.bind(process.mainModule))",
        SERVER_SOURCE.trim_end().trim_end_matches(';')
    )
}

/// Whether a `break` event body stopped on the handshake sentinel.
pub fn is_sentinel(break_body: &Value) -> bool {
    break_body.get("invocationText").and_then(Value::as_str) == Some(SENTINEL_INVOCATION)
}

/// A payload an agent loads into the debuggee.
#[derive(Debug, Clone)]
pub struct Injection {
    /// Domain whose commands depend on the payload.
    pub domain: &'static str,
    /// Unique payload name.
    pub name: &'static str,
    /// JavaScript function expression `(require, debug, options) => ...`.
    pub source: &'static str,
    /// Options handed to the payload.
    pub options: Value,
}

/// Lifecycle of the injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectorState {
    /// No handshake attempted yet.
    Idle,
    /// Waiting for the sentinel break.
    Handshaking,
    /// The injector server is connected.
    Ready,
    /// The handshake failed; carries the reason.
    Failed(String),
    /// Injection is switched off.
    Disabled,
}

type LoadResult = Result<(), String>;

/// Per-session injector.
pub struct Injector {
    host: String,
    state: watch::Sender<InjectorState>,
    queue: Mutex<VecDeque<(Injection, oneshot::Sender<LoadResult>)>>,
    loads: Mutex<HashMap<&'static str, Arc<OnceCell<LoadResult>>>>,
    client: Mutex<Option<DebuggeeClient>>,
    registry: ConnectionRegistry,
    events_tx: mpsc::UnboundedSender<Event>,
}

impl Injector {
    /// Create an injector that connects to injector servers on `host`.
    ///
    /// Events emitted by loaded payloads are delivered on `events_tx`.
    pub fn new(enabled: bool, host: &str, events_tx: mpsc::UnboundedSender<Event>) -> Self {
        let initial = if enabled {
            InjectorState::Idle
        } else {
            InjectorState::Disabled
        };
        let (state, _) = watch::channel(initial);
        Self {
            host: host.to_string(),
            state,
            queue: Mutex::new(VecDeque::new()),
            loads: Mutex::new(HashMap::new()),
            client: Mutex::new(None),
            registry: ConnectionRegistry::new(),
            events_tx,
        }
    }

    /// Current state.
    pub fn state(&self) -> InjectorState {
        self.state.borrow().clone()
    }

    /// Begin the handshake unless it has already begun.
    ///
    /// # Errors
    ///
    /// `InjectionDisabled` when switched off; request failures are recorded
    /// as [`InjectorState::Failed`] and returned.
    pub async fn start(&self, debuggee: &DebuggeeClient) -> Result<(), InspectorError> {
        let began = self.state.send_if_modified(|state| {
            if *state == InjectorState::Idle {
                *state = InjectorState::Handshaking;
                true
            } else {
                false
            }
        });
        if !began {
            return match self.state() {
                InjectorState::Disabled => Err(InspectorError::InjectionDisabled("Injector".into())),
                _ => Ok(()),
            };
        }

        tracing::debug!("starting injector handshake");
        let handshake = debuggee
            .request(
                "evaluate",
                json!({ "expression": handshake_expression(), "global": true }),
            )
            .await;
        if let Err(e) = handshake {
            let reason = format!("handshake failed: {e}");
            self.fail(&reason).await;
            return Err(InspectorError::InjectionFailed {
                domain: "Injector".into(),
                reason,
            });
        }
        Ok(())
    }

    /// Whether a sentinel break belongs to this injector's handshake.
    pub fn awaiting_sentinel(&self) -> bool {
        self.state() == InjectorState::Handshaking
    }

    /// Finish the handshake from the sentinel break, then resume the
    /// debuggee. Does nothing unless a handshake is in progress.
    pub async fn on_sentinel(&self, debuggee: &DebuggeeClient) {
        if !self.awaiting_sentinel() {
            tracing::debug!("ignoring sentinel break started by another session");
            return;
        }

        let connected = self.connect_server(debuggee).await;

        if let Err(e) = debuggee.request("continue", json!({})).await {
            tracing::warn!("cannot resume after injector handshake: {e}");
        }

        match connected {
            Ok(client) => self.go_live(client).await,
            Err(reason) => self.fail(&reason).await,
        }
    }

    async fn connect_server(&self, debuggee: &DebuggeeClient) -> Result<DebuggeeClient, String> {
        let reply = debuggee
            .request(
                "evaluate",
                json!({
                    "expression": server_expression(),
                    "frame": 0,
                    "disable_break": true,
                    "maxStringLength": -1,
                }),
            )
            .await
            .map_err(|e| format!("cannot start injector server: {e}"))?;

        let port = reply
            .body
            .get("value")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| format!("injector server returned no port: {}", reply.body))?;

        let (client, mut events) = DebuggeeClient::new(self.registry.acquire(&self.host, port), -1);
        client
            .connected()
            .await
            .map_err(|e| format!("cannot reach injector server on port {port}: {e}"))?;
        tracing::info!(port, "injector server connected");

        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    DebuggeeEvent::Event(event) => {
                        if events_tx.send(event).is_err() {
                            return;
                        }
                    }
                    DebuggeeEvent::Detached(reason) => {
                        tracing::warn!(%reason, "injector server disconnected");
                        return;
                    }
                }
            }
        });
        Ok(client)
    }

    async fn go_live(&self, client: DebuggeeClient) {
        *self.client.lock().await = Some(client.clone());
        let pending: Vec<_> = {
            let mut queue = self.queue.lock().await;
            self.state.send_replace(InjectorState::Ready);
            queue.drain(..).collect()
        };
        for (injection, tx) in pending {
            let _ = tx.send(load(&client, &injection).await);
        }
    }

    async fn fail(&self, reason: &str) {
        tracing::error!(%reason, "code injection failed");
        let pending: Vec<_> = {
            let mut queue = self.queue.lock().await;
            self.state
                .send_replace(InjectorState::Failed(reason.to_string()));
            queue.drain(..).collect()
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// Make sure `injection` is loaded, starting the handshake if needed.
    ///
    /// Each payload is loaded once; every later call returns the cached
    /// outcome.
    ///
    /// # Errors
    ///
    /// `InjectionDisabled` when switched off, `InjectionFailed` when the
    /// handshake or the payload failed.
    pub async fn require(
        &self,
        debuggee: &DebuggeeClient,
        injection: &Injection,
    ) -> Result<(), InspectorError> {
        if self.state() == InjectorState::Disabled {
            return Err(InspectorError::InjectionDisabled(injection.domain.to_string()));
        }

        let cell = self
            .loads
            .lock()
            .await
            .entry(injection.name)
            .or_default()
            .clone();

        let outcome = cell
            .get_or_init(|| async {
                let rx = {
                    let mut queue = self.queue.lock().await;
                    match self.state() {
                        InjectorState::Ready => None,
                        InjectorState::Failed(reason) => return Err(reason),
                        InjectorState::Disabled => return Err("injection is disabled".into()),
                        InjectorState::Idle | InjectorState::Handshaking => {
                            let (tx, rx) = oneshot::channel();
                            queue.push_back((injection.clone(), tx));
                            Some(rx)
                        }
                    }
                };
                match rx {
                    None => match self.client.lock().await.clone() {
                        Some(client) => load(&client, injection).await,
                        None => Err("injector server is not connected".into()),
                    },
                    Some(rx) => {
                        if let Err(e) = self.start(debuggee).await {
                            return Err(e.to_string());
                        }
                        rx.await
                            .unwrap_or_else(|_| Err("injector was dropped".to_string()))
                    }
                }
            })
            .await;

        outcome
            .clone()
            .map_err(|reason| InspectorError::InjectionFailed {
                domain: injection.domain.to_string(),
                reason,
            })
    }

    /// Send a command to the injector server.
    ///
    /// # Errors
    ///
    /// `InjectionFailed` when the server is not connected; otherwise the
    /// server's own failure.
    pub async fn request(&self, command: &str, params: Value) -> Result<Value, InspectorError> {
        let client = self.client.lock().await.clone().ok_or_else(|| {
            InspectorError::InjectionFailed {
                domain: command.split('.').next().unwrap_or(command).to_string(),
                reason: "injector server is not connected".into(),
            }
        })?;
        let params = if params.is_null() { json!({}) } else { params };
        Ok(client.request(command, params).await?.body)
    }

    /// Disconnect from the injector server.
    pub async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
        }
    }
}

async fn load(client: &DebuggeeClient, injection: &Injection) -> LoadResult {
    tracing::debug!(name = injection.name, "loading injection");
    client
        .request(
            "injection",
            json!({
                "name": injection.name,
                "source": injection.source,
                "options": injection.options,
            }),
        )
        .await
        .map(|_| ())
        .map_err(|e| format!("cannot load {}: {e}", injection.name))
}
