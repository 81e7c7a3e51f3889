//! Debugger domain: breakpoints, stepping, sources and live edit.

use std::path::Path;

use regex::RegexBuilder;
use serde_json::{json, Value};
use spyglass_platform::PathStyle;
use spyglass_v8dp::Event;

use super::runtime::{evaluation_result, return_by_value, v8_value};
use crate::break_handler;
use crate::cdp::{numeric_id, param, str_param};
use crate::error::InspectorError;
use crate::scripts::{self, NORMAL_SCRIPTS};
use crate::session::SessionContext;

/// Handler for `Debugger.*`.
#[derive(Debug, Default)]
pub struct DebuggerAgent;

impl DebuggerAgent {
    /// Debuggee events the agent consumes.
    pub const EVENTS: &'static [&'static str] = &["afterCompile"];

    pub fn new() -> Self {
        Self
    }

    pub async fn handle(
        &self,
        ctx: &SessionContext,
        method: &str,
        params: Value,
    ) -> Result<Value, InspectorError> {
        match method {
            "enable" => enable(ctx).await,
            "disable" => {
                ctx.set_debugger_enabled(false);
                Ok(json!({}))
            }
            "resume" => ctx.resume(json!({})).await,
            "stepOver" => ctx.resume(step("next")).await,
            "stepInto" => ctx.resume(step("in")).await,
            "stepOut" => ctx.resume(step("out")).await,
            "pause" => {
                ctx.debuggee.request("suspend", json!({})).await?;
                Ok(json!({}))
            }
            "setBreakpointByUrl" => set_breakpoint_by_url(ctx, &params).await,
            "setBreakpoint" => set_breakpoint(ctx, &params).await,
            "removeBreakpoint" => {
                let id = numeric_id(&params, "breakpointId")?;
                ctx.debuggee
                    .request("clearbreakpoint", json!({ "breakpoint": id }))
                    .await?;
                Ok(json!({}))
            }
            "continueToLocation" => continue_to_location(ctx, &params).await,
            "setBreakpointsActive" => set_breakpoints_active(ctx, &params).await,
            "setSkipAllPauses" => {
                let skip = params
                    .get("skipped")
                    .or_else(|| params.get("skip"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                ctx.pause.set_skip_all(skip);
                Ok(json!({}))
            }
            "setPauseOnExceptions" => set_pause_on_exceptions(ctx, &params).await,
            "getScriptSource" => {
                let id = str_param(&params, "scriptId")?;
                Ok(json!({ "scriptSource": script_source(ctx, id).await? }))
            }
            "setScriptSource" => set_script_source(ctx, &params).await,
            "evaluateOnCallFrame" => evaluate_on_call_frame(ctx, &params).await,
            "restartFrame" => restart_frame(ctx, &params).await,
            "setVariableValue" => set_variable_value(ctx, &params).await,
            "searchInContent" => search_in_content(ctx, &params).await,
            "getFunctionDetails" => get_function_details(ctx, &params).await,
            _ => Err(InspectorError::NotImplemented(format!("Debugger.{method}"))),
        }
    }

    /// Announce scripts the debuggee compiles after the session started.
    pub async fn on_event(&self, ctx: &SessionContext, event: &Event) {
        let Some(raw) = event.body.get("script") else {
            return;
        };
        let added = ctx.scripts.lock().await.add(raw);
        if let Some(script) = added {
            ctx.announce(&script);
        }
    }
}

fn step(action: &str) -> Value {
    json!({ "stepaction": action, "stepcount": 1 })
}

async fn enable(ctx: &SessionContext) -> Result<Value, InspectorError> {
    ctx.set_debugger_enabled(true);
    scripts::discover_scripts(&ctx.debuggee, &ctx.scripts).await?;
    let known = ctx.scripts.lock().await.all();
    for script in &known {
        ctx.announce(script);
    }
    if ctx.debuggee.paused() {
        break_handler::resend_paused(ctx).await?;
    }
    Ok(json!({}))
}

/// Line and column of a CDP `Location`-like object.
fn line_and_column(location: &Value) -> Result<(i64, Option<i64>), InspectorError> {
    let line = param(location, "lineNumber")?
        .as_i64()
        .ok_or_else(|| InspectorError::InvalidParams("'lineNumber' must be a number".into()))?;
    Ok((line, location.get("columnNumber").and_then(Value::as_i64)))
}

fn condition(params: &Value) -> Option<&str> {
    params
        .get("condition")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
}

/// `setbreakpoint` arguments; absent column and condition are left out.
fn breakpoint_args(
    kind: &str,
    target: Value,
    line: i64,
    column: Option<i64>,
    condition: Option<&str>,
) -> Value {
    let mut args = json!({ "type": kind, "target": target, "line": line });
    if let Some(column) = column {
        args["column"] = json!(column);
    }
    if let Some(condition) = condition {
        args["condition"] = json!(condition);
    }
    args
}

fn cdp_location(location: &Value) -> Value {
    json!({
        "scriptId": location.get("script_id").and_then(Value::as_i64).map(|id| id.to_string()),
        "lineNumber": location.get("line").and_then(Value::as_i64).unwrap_or(0),
        "columnNumber": location.get("column").and_then(Value::as_i64).unwrap_or(0),
    })
}

fn actual_locations(body: &Value) -> Vec<Value> {
    body.get("actual_locations")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(cdp_location)
        .collect()
}

fn breakpoint_id(body: &Value) -> Result<i64, InspectorError> {
    body.get("breakpoint")
        .and_then(Value::as_i64)
        .ok_or_else(|| InspectorError::Protocol("setbreakpoint returned no breakpoint".into()))
}

/// Turn a UI url into a debuggee path. Urls of known scripts map to their
/// paths; `file://` urls lose their scheme.
async fn url_to_path(ctx: &SessionContext, url: &str) -> String {
    if let Some(script) = ctx.scripts.lock().await.find_by_url(url) {
        return script.path.clone();
    }
    let path = url.strip_prefix("file://").unwrap_or(url);
    // file:///C:/x.js
    match path.strip_prefix('/') {
        Some(rest) if PathStyle::detect(rest) == PathStyle::Windows => rest.to_string(),
        _ => path.to_string(),
    }
}

async fn set_breakpoint_by_url(
    ctx: &SessionContext,
    params: &Value,
) -> Result<Value, InspectorError> {
    let (line, column) = line_and_column(params)?;
    let (kind, target) = if let Some(url) = params.get("url").and_then(Value::as_str) {
        let path = url_to_path(ctx, url).await;
        match PathStyle::detect(&path) {
            PathStyle::Windows => (
                "scriptRegExp",
                json!(PathStyle::Windows.exact_match_pattern(&path)),
            ),
            PathStyle::Posix => ("script", json!(path)),
        }
    } else if let Some(pattern) = params.get("urlRegex").and_then(Value::as_str) {
        ("scriptRegExp", json!(pattern))
    } else {
        return Err(InspectorError::InvalidParams(
            "either 'url' or 'urlRegex' is required".into(),
        ));
    };

    let reply = ctx
        .debuggee
        .request(
            "setbreakpoint",
            breakpoint_args(kind, target, line, column, condition(params)),
        )
        .await?;
    Ok(json!({
        "breakpointId": breakpoint_id(&reply.body)?.to_string(),
        "locations": actual_locations(&reply.body),
    }))
}

async fn set_breakpoint(ctx: &SessionContext, params: &Value) -> Result<Value, InspectorError> {
    let location = param(params, "location")?;
    let script_id = numeric_id(location, "scriptId")?;
    let (line, column) = line_and_column(location)?;
    let reply = ctx
        .debuggee
        .request(
            "setbreakpoint",
            breakpoint_args("scriptId", json!(script_id), line, column, condition(params)),
        )
        .await?;
    let actual = actual_locations(&reply.body)
        .into_iter()
        .next()
        .unwrap_or_else(|| location.clone());
    Ok(json!({
        "breakpointId": breakpoint_id(&reply.body)?.to_string(),
        "actualLocation": actual,
    }))
}

async fn continue_to_location(
    ctx: &SessionContext,
    params: &Value,
) -> Result<Value, InspectorError> {
    let location = param(params, "location")?;
    let script_id = numeric_id(location, "scriptId")?;
    let (line, column) = line_and_column(location)?;

    if let Some(previous) = ctx.pause.take_continue_to_location().await {
        ctx.debuggee
            .request("clearbreakpoint", json!({ "breakpoint": previous }))
            .await?;
    }
    let reply = ctx
        .debuggee
        .request(
            "setbreakpoint",
            breakpoint_args("scriptId", json!(script_id), line, column, None),
        )
        .await?;
    let id = breakpoint_id(&reply.body)?;
    if let Some(stale) = ctx.pause.replace_continue_to_location(Some(id)).await {
        tracing::debug!(stale, "continue-to-location superseded concurrently");
    }
    ctx.resume(json!({})).await
}

async fn set_breakpoints_active(
    ctx: &SessionContext,
    params: &Value,
) -> Result<Value, InspectorError> {
    let active = param(params, "active")?
        .as_bool()
        .ok_or_else(|| InspectorError::InvalidParams("'active' must be a boolean".into()))?;
    let reply = ctx.debuggee.request("listbreakpoints", json!({})).await?;
    let ids: Vec<i64> = reply
        .body
        .get("breakpoints")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|bp| bp.get("number").and_then(Value::as_i64))
        .collect();
    for id in ids {
        ctx.debuggee
            .request(
                "changebreakpoint",
                json!({ "breakpoint": id, "enabled": active }),
            )
            .await?;
    }
    Ok(json!({}))
}

async fn set_pause_on_exceptions(
    ctx: &SessionContext,
    params: &Value,
) -> Result<Value, InspectorError> {
    let (all, uncaught) = match str_param(params, "state")? {
        "none" => (false, false),
        "uncaught" => (false, true),
        "all" => (true, true),
        other => {
            return Err(InspectorError::InvalidParams(format!(
                "unknown exception pause state '{other}'"
            )))
        }
    };
    for (kind, enabled) in [("all", all), ("uncaught", uncaught)] {
        ctx.debuggee
            .request(
                "setexceptionbreak",
                json!({ "type": kind, "enabled": enabled }),
            )
            .await?;
    }
    Ok(json!({}))
}

/// Current source of script `id` as the debuggee compiled it.
pub(crate) async fn script_source(ctx: &SessionContext, id: &str) -> Result<String, InspectorError> {
    let numeric: i64 = id
        .parse()
        .map_err(|_| InspectorError::UnknownScript(id.to_string()))?;
    let reply = ctx
        .debuggee
        .request(
            "scripts",
            json!({
                "includeSource": true,
                "types": NORMAL_SCRIPTS,
                "ids": [numeric],
                "maxStringLength": -1,
            }),
        )
        .await?;
    reply
        .body
        .as_array()
        .and_then(|scripts| scripts.first())
        .and_then(|script| script.get("source"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| InspectorError::UnknownScript(id.to_string()))
}

async fn set_script_source(ctx: &SessionContext, params: &Value) -> Result<Value, InspectorError> {
    let id = str_param(params, "scriptId")?;
    let source = str_param(params, "scriptSource")?;
    let preview = params
        .get("preview")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let numeric = numeric_id(params, "scriptId")?;

    let reply = ctx
        .debuggee
        .request(
            "changelive",
            json!({ "script_id": numeric, "new_source": source, "preview_only": preview }),
        )
        .await?;
    let result = reply.body.get("result").cloned().unwrap_or(Value::Null);

    if !preview && ctx.config.debugger.save_live_edit {
        let script = ctx.require_script(id).await?;
        ctx.storage.save(Path::new(&script.path), source).await?;
    }

    let stack_modified = result
        .get("stack_modified")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let mut response = json!({ "result": result });
    if stack_modified && !preview {
        response["callFrames"] = json!(break_handler::backtrace(ctx).await?);
    }
    Ok(response)
}

async fn evaluate_on_call_frame(
    ctx: &SessionContext,
    params: &Value,
) -> Result<Value, InspectorError> {
    let frame = numeric_id(params, "callFrameId")?;
    let expression = str_param(params, "expression")?;
    let outcome = ctx
        .debuggee
        .request(
            "evaluate",
            json!({ "expression": expression, "frame": frame }),
        )
        .await;
    evaluation_result(ctx, outcome, return_by_value(params)).await
}

async fn restart_frame(ctx: &SessionContext, params: &Value) -> Result<Value, InspectorError> {
    let frame = numeric_id(params, "callFrameId")?;
    let reply = ctx
        .debuggee
        .request("restartframe", json!({ "frame": frame }))
        .await?;
    let call_frames = break_handler::backtrace(ctx).await?;
    Ok(json!({
        "callFrames": call_frames,
        "result": reply.body.get("result").cloned().unwrap_or(Value::Null),
    }))
}

async fn set_variable_value(
    ctx: &SessionContext,
    params: &Value,
) -> Result<Value, InspectorError> {
    let scope = param(params, "scopeNumber")?
        .as_i64()
        .ok_or_else(|| InspectorError::InvalidParams("'scopeNumber' must be a number".into()))?;
    let name = str_param(params, "variableName")?;
    let frame = numeric_id(params, "callFrameId")?;
    let new_value = v8_value(param(params, "newValue")?)?;
    ctx.debuggee
        .request(
            "setvariablevalue",
            json!({
                "name": name,
                "newValue": new_value,
                "scope": { "number": scope, "frameNumber": frame },
            }),
        )
        .await?;
    Ok(json!({}))
}

async fn search_in_content(
    ctx: &SessionContext,
    params: &Value,
) -> Result<Value, InspectorError> {
    let id = str_param(params, "scriptId")?;
    let query = str_param(params, "query")?;
    let flag = |key: &str| params.get(key).and_then(Value::as_bool).unwrap_or(false);
    let pattern = if flag("isRegex") {
        query.to_string()
    } else {
        regex::escape(query)
    };
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(!flag("caseSensitive"))
        .build()
        .map_err(|e| InspectorError::InvalidParams(format!("bad search pattern: {e}")))?;

    let source = script_source(ctx, id).await?;
    let matches: Vec<Value> = source
        .lines()
        .enumerate()
        .filter(|(_, line)| re.is_match(line))
        .map(|(number, line)| json!({ "lineNumber": number, "lineContent": line }))
        .collect();
    Ok(json!({ "result": matches }))
}

async fn get_function_details(
    ctx: &SessionContext,
    params: &Value,
) -> Result<Value, InspectorError> {
    let handle = numeric_id(params, "functionId")?;
    let reply = ctx
        .debuggee
        .request("lookup", json!({ "handles": [handle], "includeSource": false }))
        .await?;
    let function = reply
        .body
        .get(handle.to_string())
        .ok_or_else(|| InspectorError::Protocol(format!("function {handle} not found")))?;
    let name = ["name", "inferredName"]
        .iter()
        .filter_map(|key| function.get(*key).and_then(Value::as_str))
        .find(|name| !name.is_empty())
        .unwrap_or("");
    Ok(json!({
        "details": {
            "location": {
                "scriptId": function.get("scriptId").and_then(Value::as_i64).map(|id| id.to_string()),
                "lineNumber": function.get("line").and_then(Value::as_i64).unwrap_or(0),
                "columnNumber": function.get("column").and_then(Value::as_i64).unwrap_or(0),
            },
            "functionName": name,
            "scopeChain": [],
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actual_locations_become_cdp_locations() {
        let body = json!({
            "breakpoint": 3,
            "actual_locations": [{"line": 4, "column": 2, "script_id": 51}],
        });
        assert_eq!(breakpoint_id(&body).unwrap(), 3);
        assert_eq!(
            actual_locations(&body),
            vec![json!({"scriptId": "51", "lineNumber": 4, "columnNumber": 2})]
        );
        assert!(actual_locations(&json!({})).is_empty());
        assert!(breakpoint_id(&json!({})).is_err());
    }

    #[test]
    fn empty_condition_is_dropped() {
        assert_eq!(condition(&json!({"condition": ""})), None);
        assert_eq!(condition(&json!({"condition": "x > 1"})), Some("x > 1"));
    }

    #[test]
    fn breakpoint_args_omit_absent_fields() {
        assert_eq!(
            breakpoint_args("script", json!("/a.js"), 3, None, None),
            json!({"type": "script", "target": "/a.js", "line": 3})
        );
        assert_eq!(
            breakpoint_args("scriptId", json!(9), 1, Some(4), Some("i > 2")),
            json!({"type": "scriptId", "target": 9, "line": 1, "column": 4, "condition": "i > 2"})
        );
    }

    #[test]
    fn step_arguments() {
        assert_eq!(step("next"), json!({"stepaction": "next", "stepcount": 1}));
    }

    #[test]
    fn line_is_required() {
        assert!(line_and_column(&json!({"columnNumber": 1})).is_err());
        assert_eq!(line_and_column(&json!({"lineNumber": 5})).unwrap(), (5, None));
    }
}
