//! CPU profiling through an injected payload backed by `v8-profiler`.

use serde_json::{json, Value};
use spyglass_config::Config;

use super::injected;
use crate::error::InspectorError;
use crate::injector::Injection;
use crate::session::SessionContext;

const METHODS: &[&str] = &["enable", "disable", "setSamplingInterval", "start", "stop"];

/// Handler for `Profiler.*`.
pub struct ProfilerAgent {
    injection: Injection,
    allowed: bool,
}

impl ProfilerAgent {
    /// Events the payload emits.
    pub const EVENTS: &'static [&'static str] = &[
        "Profiler.consoleProfileStarted",
        "Profiler.consoleProfileFinished",
    ];

    pub fn new(config: &Config) -> Self {
        Self {
            injection: Injection {
                domain: "Profiler",
                name: "profiler",
                source: include_str!("../../injections/profiler.js"),
                options: json!({}),
            },
            allowed: config.inject.enabled && config.inject.profiles,
        }
    }

    pub fn injection(&self) -> &Injection {
        &self.injection
    }

    pub async fn handle(
        &self,
        ctx: &SessionContext,
        method: &str,
        params: Value,
    ) -> Result<Value, InspectorError> {
        injected::ensure_served(METHODS, "Profiler", method)?;
        injected::call(ctx, &self.injection, self.allowed, method, params).await
    }
}
