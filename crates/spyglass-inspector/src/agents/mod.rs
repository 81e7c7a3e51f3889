//! Per-domain command handlers.
//!
//! Each CDP domain the bridge serves is one [`Agent`]. Debugger, Runtime and
//! Page translate commands into V8DP requests; Console, Network, Profiler
//! and HeapProfiler are served by payloads injected into the debuggee.

pub mod console;
pub mod debugger;
pub mod heap_profiler;
mod injected;
pub mod network;
pub mod page;
pub mod profiler;
pub mod runtime;

use serde_json::Value;
use spyglass_config::Config;
use spyglass_v8dp::Event;

use crate::error::InspectorError;
use crate::injector::Injection;
use crate::session::SessionContext;

pub use console::ConsoleAgent;
pub use debugger::DebuggerAgent;
pub use heap_profiler::HeapProfilerAgent;
pub use network::NetworkAgent;
pub use page::PageAgent;
pub use profiler::ProfilerAgent;
pub use runtime::RuntimeAgent;

/// A domain handler.
pub enum Agent {
    /// `Debugger.*`
    Debugger(DebuggerAgent),
    /// `Runtime.*`
    Runtime(RuntimeAgent),
    /// `Page.*`
    Page(PageAgent),
    /// `Console.*`
    Console(ConsoleAgent),
    /// `Network.*`
    Network(NetworkAgent),
    /// `Profiler.*`
    Profiler(ProfilerAgent),
    /// `HeapProfiler.*`
    HeapProfiler(HeapProfilerAgent),
}

impl Agent {
    /// One agent per served domain.
    pub fn all(config: &Config) -> Vec<Agent> {
        vec![
            Agent::Debugger(DebuggerAgent::new()),
            Agent::Runtime(RuntimeAgent::new()),
            Agent::Page(PageAgent::new()),
            Agent::Console(ConsoleAgent::new(config)),
            Agent::Network(NetworkAgent::new(config)),
            Agent::Profiler(ProfilerAgent::new(config)),
            Agent::HeapProfiler(HeapProfilerAgent::new(config)),
        ]
    }

    /// CDP domain name.
    pub fn domain(&self) -> &'static str {
        match self {
            Agent::Debugger(_) => "Debugger",
            Agent::Runtime(_) => "Runtime",
            Agent::Page(_) => "Page",
            Agent::Console(_) => "Console",
            Agent::Network(_) => "Network",
            Agent::Profiler(_) => "Profiler",
            Agent::HeapProfiler(_) => "HeapProfiler",
        }
    }

    /// Payload the agent needs in the debuggee, if any.
    pub fn injection(&self) -> Option<&Injection> {
        match self {
            Agent::Console(agent) => Some(agent.injection()),
            Agent::Network(agent) => Some(agent.injection()),
            Agent::Profiler(agent) => Some(agent.injection()),
            Agent::HeapProfiler(agent) => Some(agent.injection()),
            Agent::Debugger(_) | Agent::Runtime(_) | Agent::Page(_) => None,
        }
    }

    /// Debuggee or injected event names the agent consumes.
    pub fn events(&self) -> &'static [&'static str] {
        match self {
            Agent::Debugger(_) => DebuggerAgent::EVENTS,
            Agent::Console(_) => ConsoleAgent::EVENTS,
            Agent::Network(_) => NetworkAgent::EVENTS,
            Agent::Profiler(_) => ProfilerAgent::EVENTS,
            Agent::HeapProfiler(_) => HeapProfilerAgent::EVENTS,
            Agent::Runtime(_) | Agent::Page(_) => &[],
        }
    }

    /// Handle `<domain>.<method>`.
    ///
    /// # Errors
    ///
    /// `NotImplemented` for methods the agent does not serve, otherwise the
    /// agent's own failure.
    pub async fn handle(
        &self,
        ctx: &SessionContext,
        method: &str,
        params: Value,
    ) -> Result<Value, InspectorError> {
        match self {
            Agent::Debugger(agent) => agent.handle(ctx, method, params).await,
            Agent::Runtime(agent) => agent.handle(ctx, method, params).await,
            Agent::Page(agent) => agent.handle(ctx, method, params).await,
            Agent::Console(agent) => agent.handle(ctx, method, params).await,
            Agent::Network(agent) => agent.handle(ctx, method, params).await,
            Agent::Profiler(agent) => agent.handle(ctx, method, params).await,
            Agent::HeapProfiler(agent) => agent.handle(ctx, method, params).await,
        }
    }

    /// React to an event listed in [`events`](Self::events).
    pub async fn on_event(&self, ctx: &SessionContext, event: &Event) {
        match self {
            Agent::Debugger(agent) => agent.on_event(ctx, event).await,
            Agent::Console(_) | Agent::Network(_) | Agent::Profiler(_) | Agent::HeapProfiler(_) => {
                injected::forward(ctx, event)
            }
            Agent::Runtime(_) | Agent::Page(_) => {}
        }
    }
}
