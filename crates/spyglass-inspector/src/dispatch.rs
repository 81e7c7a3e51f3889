//! Routing of UI commands and debuggee events to agents.

use std::collections::HashMap;

use serde_json::{json, Value};
use spyglass_config::Config;
use spyglass_v8dp::Event;

use crate::agents::Agent;
use crate::cdp::split_method;
use crate::error::InspectorError;
use crate::session::SessionContext;

/// Canned answer for methods the UI calls but a Node debuggee has no use
/// for. Checked before any agent.
pub fn noop_result(method: &str) -> Option<Value> {
    let result = match method {
        "Page.canScreencast"
        | "Page.canEmulate"
        | "Worker.canInspectWorkers"
        | "Network.canEmulateNetworkConditions"
        | "Network.canClearBrowserCache"
        | "Network.canClearBrowserCookies"
        | "Emulation.canEmulate" => json!({ "result": false }),
        "Page.addScriptToEvaluateOnLoad" => json!({ "identifier": "0" }),
        "CSS.enable"
        | "Database.enable"
        | "DOMStorage.enable"
        | "IndexedDB.enable"
        | "IndexedDB.requestDatabaseNames"
        | "Inspector.enable"
        | "Timeline.enable"
        | "Worker.enable"
        | "Console.setMonitoringXHREnabled"
        | "Debugger.setAsyncCallStackDepth"
        | "Debugger.setOverlayMessage"
        | "Debugger.skipStackFrames"
        | "Page.setShowViewportSizeOnResize"
        | "Page.setOverlayMessage"
        | "Page.removeScriptToEvaluateOnLoad"
        | "Runtime.run"
        | "Runtime.setCustomObjectFormatterEnabled"
        | "Rendering.setShowFPSCounter"
        | "Emulation.setEmulatedMedia"
        | "HeapProfiler.disable" => json!({}),
        _ => return None,
    };
    Some(result)
}

/// Domain and event routing tables for one session.
pub struct Dispatcher {
    agents: Vec<Agent>,
    by_domain: HashMap<&'static str, usize>,
    by_event: HashMap<&'static str, usize>,
}

impl Dispatcher {
    /// Build the agents for `config`.
    pub fn new(config: &Config) -> Self {
        let agents = Agent::all(config);
        let mut by_domain = HashMap::new();
        let mut by_event = HashMap::new();
        for (index, agent) in agents.iter().enumerate() {
            by_domain.insert(agent.domain(), index);
            for event in agent.events() {
                by_event.insert(*event, index);
            }
        }
        Self {
            agents,
            by_domain,
            by_event,
        }
    }

    /// The agent serving `domain`.
    pub fn agent(&self, domain: &str) -> Option<&Agent> {
        self.by_domain.get(domain).map(|&index| &self.agents[index])
    }

    /// Run one UI command.
    ///
    /// # Errors
    ///
    /// `NotImplemented` for unknown domains or methods; otherwise whatever
    /// the agent fails with.
    pub async fn dispatch(
        &self,
        ctx: &SessionContext,
        method: &str,
        params: Value,
    ) -> Result<Value, InspectorError> {
        if let Some(result) = noop_result(method) {
            tracing::trace!(method, "answered without a handler");
            return Ok(result);
        }
        let agent = split_method(method).and_then(|(domain, name)| Some((self.agent(domain)?, name)));
        let Some((agent, name)) = agent else {
            tracing::warn!(method, "no handler for UI command");
            return Err(InspectorError::NotImplemented(method.to_string()));
        };

        tracing::debug!(method, "dispatching");
        let outcome = agent.handle(ctx, name, params).await;
        match &outcome {
            Err(InspectorError::NotImplemented(_)) => {
                tracing::warn!(method, "no handler for UI command");
            }
            Err(e) => tracing::debug!(method, "command failed: {e}"),
            Ok(_) => {}
        }
        outcome
    }

    /// Hand an event to the agent that consumes it.
    ///
    /// Returns whether any agent did.
    pub async fn route_event(&self, ctx: &SessionContext, event: &Event) -> bool {
        let Some(&index) = self.by_event.get(event.event.as_str()) else {
            return false;
        };
        self.agents[index].on_event(ctx, event).await;
        true
    }
}
