//! Plumbing shared by the agents whose domain lives in an injected payload.

use serde_json::Value;
use spyglass_v8dp::Event;

use crate::error::InspectorError;
use crate::injector::Injection;
use crate::session::SessionContext;

/// Load `injection` if needed and forward `Domain.method` to it.
pub(crate) async fn call(
    ctx: &SessionContext,
    injection: &Injection,
    allowed: bool,
    method: &str,
    params: Value,
) -> Result<Value, InspectorError> {
    if !allowed {
        return Err(InspectorError::InjectionDisabled(injection.domain.to_string()));
    }
    ctx.injector.require(&ctx.debuggee, injection).await?;
    ctx.injector
        .request(&format!("{}.{method}", injection.domain), params)
        .await
}

/// Payload events already carry CDP names and parameters.
pub(crate) fn forward(ctx: &SessionContext, event: &Event) {
    ctx.frontend.emit(&event.event, event.body.clone());
}

/// Reject methods the payload does not serve before anything is injected.
pub(crate) fn ensure_served(
    methods: &[&str],
    domain: &str,
    method: &str,
) -> Result<(), InspectorError> {
    if methods.contains(&method) {
        Ok(())
    } else {
        Err(InspectorError::NotImplemented(format!("{domain}.{method}")))
    }
}
