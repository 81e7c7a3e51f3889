//! One UI connection bound to one debuggee.
//!
//! A session owns a [`DebuggeeClient`], its scripts, its injector and its
//! pause state. Commands are dispatched concurrently, each in its own task;
//! debuggee and injector events are handled in order by a single event task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use spyglass_config::Config;
use spyglass_platform::HidePatterns;
use spyglass_v8dp::{ConnectionRegistry, DebuggeeClient, DebuggeeEvent, Event};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::break_handler::{self, PauseState};
use crate::cdp::{Command, Frontend};
use crate::dispatch::Dispatcher;
use crate::error::InspectorError;
use crate::injector::Injector;
use crate::live_edit::ScriptFileStorage;
use crate::scripts::{self, Script, ScriptManager};

/// State shared by every agent of one session.
pub struct SessionContext {
    /// Effective configuration.
    pub config: Arc<Config>,
    /// The debuggee.
    pub debuggee: DebuggeeClient,
    /// Scripts known to this session.
    pub scripts: Mutex<ScriptManager>,
    /// Code injection into the debuggee.
    pub injector: Injector,
    /// Pause bookkeeping.
    pub pause: PauseState,
    /// Live-edit persistence.
    pub storage: ScriptFileStorage,
    /// Outbound channel to the UI.
    pub frontend: Frontend,
    debugger_enabled: AtomicBool,
}

impl SessionContext {
    /// Whether the UI has enabled the Debugger domain.
    pub fn debugger_enabled(&self) -> bool {
        self.debugger_enabled.load(Ordering::Acquire)
    }

    /// Record the Debugger domain being enabled or disabled.
    pub fn set_debugger_enabled(&self, enabled: bool) {
        self.debugger_enabled.store(enabled, Ordering::Release);
    }

    /// Tell the UI about a script unless it is hidden or the Debugger
    /// domain is off.
    pub fn announce(&self, script: &Script) {
        if script.hidden || !self.debugger_enabled() {
            return;
        }
        self.frontend
            .emit("Debugger.scriptParsed", script.parsed_params());
    }

    /// Find a script by id, fetching and announcing it when new.
    ///
    /// # Errors
    ///
    /// Propagates debuggee request failures.
    pub async fn script(&self, id: &str) -> Result<Option<Script>, InspectorError> {
        let found = scripts::lookup_script(&self.debuggee, &self.scripts, id).await?;
        Ok(found.map(|(script, newly_added)| {
            if newly_added {
                self.announce(&script);
            }
            script
        }))
    }

    /// Find a script by id or fail with `UnknownScript`.
    ///
    /// # Errors
    ///
    /// `UnknownScript` when neither the session nor the debuggee knows it.
    pub async fn require_script(&self, id: &str) -> Result<Script, InspectorError> {
        self.script(id)
            .await?
            .ok_or_else(|| InspectorError::UnknownScript(id.to_string()))
    }

    /// Send `continue` with `arguments` and tell the UI the debuggee resumed.
    ///
    /// # Errors
    ///
    /// Propagates the `continue` failure.
    pub async fn resume(&self, arguments: Value) -> Result<Value, InspectorError> {
        self.debuggee.request("continue", arguments).await?;
        self.pause.clear_last_paused().await;
        self.frontend.emit("Debugger.resumed", json!({}));
        Ok(json!({}))
    }
}

/// A live UI session.
pub struct Session {
    ctx: Arc<SessionContext>,
    dispatcher: Arc<Dispatcher>,
    events: JoinHandle<()>,
}

impl Session {
    /// Start a session against the debuggee at `host:port`.
    ///
    /// Returns the session and the receiver of messages for the UI. The
    /// debuggee connection is opened in the background; a failure shows up
    /// as a single `Inspector.detached` notification.
    ///
    /// # Errors
    ///
    /// `InvalidParams` when a hide pattern does not compile.
    pub fn start(
        config: Arc<Config>,
        registry: &ConnectionRegistry,
        host: &str,
        port: u16,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Value>), InspectorError> {
        let hide = HidePatterns::new(&config.debugger.hidden)
            .map_err(|e| InspectorError::InvalidParams(e.to_string()))?;
        let (debuggee, debuggee_events) =
            DebuggeeClient::new(registry.acquire(host, port), config.debugger.max_string_length);
        let (injected_tx, injected_rx) = mpsc::unbounded_channel();
        let (frontend, outbound) = Frontend::channel();

        let ctx = Arc::new(SessionContext {
            injector: Injector::new(config.inject.enabled, host, injected_tx),
            config,
            debuggee,
            scripts: Mutex::new(ScriptManager::new(hide)),
            pause: PauseState::new(),
            storage: ScriptFileStorage::new(),
            frontend,
            debugger_enabled: AtomicBool::new(false),
        });
        let dispatcher = Arc::new(Dispatcher::new(&ctx.config));

        let events = tokio::spawn(run_events(
            ctx.clone(),
            dispatcher.clone(),
            debuggee_events,
            injected_rx,
        ));

        tokio::spawn({
            let ctx = ctx.clone();
            async move {
                if ctx.debuggee.connected().await.is_ok() {
                    tracing::info!(port = ctx.debuggee.port(), "session attached to debuggee");
                }
            }
        });

        Ok((
            Self {
                ctx,
                dispatcher,
                events,
            },
            outbound,
        ))
    }

    /// Shared state, for tests and the server.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Handle one text frame from the UI.
    ///
    /// The command runs in its own task; its response goes out through the
    /// session's outbound channel.
    pub fn handle_message(&self, text: &str) {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(e) => {
                match Command::id_of(text) {
                    Some(id) => {
                        tracing::warn!(id, "rejecting malformed UI command: {e}");
                        self.ctx.frontend.respond(id, Err(e));
                    }
                    None => tracing::warn!("dropping unparseable UI message: {e}"),
                }
                return;
            }
        };
        let ctx = self.ctx.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let Command { id, method, params } = command;
            let outcome = dispatcher.dispatch(&ctx, &method, params).await;
            ctx.frontend.respond(id, outcome);
        });
    }

    /// Tear the session down: stop event handling and disconnect.
    pub async fn close(self) {
        self.events.abort();
        self.ctx.injector.close().await;
        self.ctx.debuggee.close().await;
        tracing::info!(port = self.ctx.debuggee.port(), "session closed");
    }
}

async fn run_events(
    ctx: Arc<SessionContext>,
    dispatcher: Arc<Dispatcher>,
    mut debuggee_events: mpsc::UnboundedReceiver<DebuggeeEvent>,
    mut injected_events: mpsc::UnboundedReceiver<Event>,
) {
    loop {
        tokio::select! {
            Some(event) = debuggee_events.recv() => match event {
                DebuggeeEvent::Event(event) => on_debuggee_event(&ctx, &dispatcher, event).await,
                DebuggeeEvent::Detached(reason) => {
                    tracing::info!(%reason, "debuggee detached");
                    ctx.frontend.emit("Inspector.detached", json!({ "reason": reason }));
                    return;
                }
            },
            Some(event) = injected_events.recv() => {
                if !dispatcher.route_event(&ctx, &event).await {
                    tracing::debug!(event = %event.event, "unrouted injected event");
                }
            }
            else => return,
        }
    }
}

async fn on_debuggee_event(ctx: &SessionContext, dispatcher: &Dispatcher, event: Event) {
    if event.is_pause() {
        match break_handler::handle_pause_event(ctx, &event).await {
            Ok(outcome) => tracing::debug!(?outcome, "pause handled"),
            Err(e) => tracing::warn!(event = %event.event, "pause handling failed: {e}"),
        }
        return;
    }
    if !dispatcher.route_event(ctx, &event).await {
        tracing::trace!(event = %event.event, "ignoring debuggee event");
    }
}
