//! Console domain, served by an injected payload that wraps `console.*`.

use serde_json::{json, Value};
use spyglass_config::Config;

use super::injected;
use crate::error::InspectorError;
use crate::injector::Injection;
use crate::session::SessionContext;

const METHODS: &[&str] = &["enable", "disable", "clearMessages"];

/// Handler for `Console.*`.
pub struct ConsoleAgent {
    injection: Injection,
    allowed: bool,
}

impl ConsoleAgent {
    /// Events the payload emits.
    pub const EVENTS: &'static [&'static str] =
        &["Console.messageAdded", "Console.messagesCleared"];

    pub fn new(config: &Config) -> Self {
        Self {
            injection: Injection {
                domain: "Console",
                name: "console",
                source: include_str!("../../injections/console.js"),
                options: json!({}),
            },
            allowed: config.inject.enabled && config.inject.console,
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
        injected::ensure_served(METHODS, "Console", method)?;
        injected::call(ctx, &self.injection, self.allowed, method, params).await
    }
}
