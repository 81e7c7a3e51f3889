//! Network domain, served by an injected payload that wraps `http.request`.

use serde_json::{json, Value};
use spyglass_config::Config;

use super::injected;
use crate::error::InspectorError;
use crate::injector::Injection;
use crate::session::SessionContext;

const METHODS: &[&str] = &[
    "enable",
    "disable",
    "getResponseBody",
    "setUserAgentOverride",
    "setCacheDisabled",
];

/// Handler for `Network.*`.
pub struct NetworkAgent {
    injection: Injection,
    allowed: bool,
}

impl NetworkAgent {
    /// Events the payload emits.
    pub const EVENTS: &'static [&'static str] = &[
        "Network.requestWillBeSent",
        "Network.responseReceived",
        "Network.dataReceived",
        "Network.loadingFinished",
        "Network.loadingFailed",
    ];

    pub fn new(config: &Config) -> Self {
        Self {
            injection: Injection {
                domain: "Network",
                name: "network",
                source: include_str!("../../injections/network.js"),
                options: json!({}),
            },
            allowed: config.inject.enabled && config.inject.network,
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
        injected::ensure_served(METHODS, "Network", method)?;
        injected::call(ctx, &self.injection, self.allowed, method, params).await
    }
}
