//! Runtime domain: evaluation, object inspection and execution contexts.

use serde_json::{json, Value};
use spyglass_v8dp::{DebuggeeInfo, Reply, V8Error};

use crate::cdp::{str_param, MAIN_CONTEXT_ID, MAIN_FRAME_ID};
use crate::error::InspectorError;
use crate::remote_object::{
    handle_of, parse_scope_object_id, resolve, to_property_descriptors, to_remote_object,
};
use crate::session::SessionContext;

const THIS_BINDING: &str = "__spyglass_this";
const VALUE_BINDING: &str = "__spyglass_value";

/// Handler for `Runtime.*`.
#[derive(Debug, Default)]
pub struct RuntimeAgent;

impl RuntimeAgent {
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
            "enable" => {
                let info = ctx.debuggee.ready().await?;
                ctx.frontend.emit(
                    "Runtime.executionContextCreated",
                    json!({ "context": execution_context(&info) }),
                );
                Ok(json!({}))
            }
            "disable" | "releaseObject" | "releaseObjectGroup" => Ok(json!({})),
            "evaluate" => evaluate(ctx, &params).await,
            "callFunctionOn" => call_function_on(ctx, &params).await,
            "getProperties" => get_properties(ctx, &params).await,
            _ => Err(InspectorError::NotImplemented(format!("Runtime.{method}"))),
        }
    }
}

/// The single execution context the debuggee exposes.
pub fn execution_context(info: &DebuggeeInfo) -> Value {
    json!({
        "id": MAIN_CONTEXT_ID,
        "isPageContext": true,
        "name": info.filename.as_deref().unwrap_or("node"),
        "origin": "",
        "frameId": MAIN_FRAME_ID,
        "auxData": { "isDefault": true, "frameId": MAIN_FRAME_ID },
    })
}

async fn evaluate(ctx: &SessionContext, params: &Value) -> Result<Value, InspectorError> {
    let expression = str_param(params, "expression")?;
    let outcome = ctx
        .debuggee
        .request(
            "evaluate",
            json!({ "expression": expression, "global": true }),
        )
        .await;
    evaluation_result(ctx, outcome, return_by_value(params)).await
}

pub(crate) fn return_by_value(params: &Value) -> bool {
    params
        .get("returnByValue")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Turn an `evaluate` outcome into `{result, wasThrown}`.
///
/// A debuggee-side failure is a thrown exception, not a protocol error.
pub(crate) async fn evaluation_result(
    ctx: &SessionContext,
    outcome: Result<Reply, V8Error>,
    by_value: bool,
) -> Result<Value, InspectorError> {
    match outcome {
        Ok(reply) => {
            let mut result = to_remote_object(&reply.body);
            if by_value {
                if let Some(handle) = result
                    .get("objectId")
                    .and_then(Value::as_str)
                    .and_then(|id| id.parse::<i64>().ok())
                {
                    result["value"] = json_value_of(ctx, handle).await?;
                }
            }
            Ok(json!({ "result": result, "wasThrown": false }))
        }
        Err(V8Error::Protocol { message, .. }) => Ok(json!({
            "result": {
                "type": "object",
                "subtype": "error",
                "className": "Error",
                "description": message,
            },
            "wasThrown": true,
        })),
        Err(e) => Err(e.into()),
    }
}

async fn json_value_of(ctx: &SessionContext, handle: i64) -> Result<Value, InspectorError> {
    let reply = ctx
        .debuggee
        .request(
            "evaluate",
            json!({
                "expression": format!("JSON.stringify({VALUE_BINDING})"),
                "global": true,
                "additional_context": [{ "name": VALUE_BINDING, "handle": handle }],
                "maxStringLength": -1,
            }),
        )
        .await?;
    Ok(reply
        .body
        .get("value")
        .and_then(Value::as_str)
        .and_then(|text| serde_json::from_str(text).ok())
        .unwrap_or(Value::Null))
}

/// Resolve a CDP object id, including synthetic scope ids, to a V8 handle.
pub(crate) async fn object_handle(
    ctx: &SessionContext,
    object_id: &str,
) -> Result<i64, InspectorError> {
    if let Some((frame, scope)) = parse_scope_object_id(object_id) {
        let reply = ctx
            .debuggee
            .request("scope", json!({ "number": scope, "frameNumber": frame }))
            .await?;
        return reply
            .body
            .get("object")
            .map(|object| resolve(object, &reply))
            .and_then(handle_of)
            .ok_or_else(|| InspectorError::Protocol(format!("scope {object_id} has no object")));
    }
    object_id
        .parse()
        .map_err(|_| InspectorError::InvalidParams(format!("bad objectId '{object_id}'")))
}

async fn get_properties(ctx: &SessionContext, params: &Value) -> Result<Value, InspectorError> {
    if params
        .get("accessorPropertiesOnly")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Ok(json!({ "result": [] }));
    }
    let object_id = str_param(params, "objectId")?;
    let handle = object_handle(ctx, object_id).await?;
    let reply = ctx
        .debuggee
        .request("lookup", json!({ "handles": [handle], "includeSource": false }))
        .await?;
    let mirror = reply
        .body
        .get(handle.to_string())
        .ok_or_else(|| InspectorError::Protocol(format!("object {object_id} not found")))?;
    Ok(json!({ "result": to_property_descriptors(mirror, &reply) }))
}

async fn call_function_on(ctx: &SessionContext, params: &Value) -> Result<Value, InspectorError> {
    let object_id = str_param(params, "objectId")?;
    let declaration = str_param(params, "functionDeclaration")?;
    let this = object_handle(ctx, object_id).await?;

    let mut context = vec![json!({ "name": THIS_BINDING, "handle": this })];
    let mut arguments = Vec::new();
    for (index, argument) in params
        .get("arguments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
    {
        arguments.push(if let Some(id) = argument.get("objectId").and_then(Value::as_str) {
            let name = format!("__spyglass_arg{index}");
            context.push(json!({ "name": name, "handle": object_handle(ctx, id).await? }));
            name
        } else if let Some(value) = argument.get("value") {
            value.to_string()
        } else if let Some(raw) = argument.get("unserializableValue").and_then(Value::as_str) {
            raw.to_string()
        } else {
            "undefined".to_string()
        });
    }

    let expression = format!(
        "({declaration}).apply({THIS_BINDING}, [{}])",
        arguments.join(", ")
    );
    let outcome = ctx
        .debuggee
        .request(
            "evaluate",
            json!({
                "expression": expression,
                "global": true,
                "additional_context": context,
            }),
        )
        .await;
    evaluation_result(ctx, outcome, return_by_value(params)).await
}

/// Build a V8 `newValue` from a CDP `CallArgument`.
pub(crate) fn v8_value(argument: &Value) -> Result<Value, InspectorError> {
    if let Some(id) = argument.get("objectId").and_then(Value::as_str) {
        let handle: i64 = id
            .parse()
            .map_err(|_| InspectorError::InvalidParams(format!("bad objectId '{id}'")))?;
        return Ok(json!({ "handle": handle }));
    }
    if let Some(raw) = argument.get("unserializableValue").and_then(Value::as_str) {
        return Ok(json!({ "type": "number", "stringDescription": raw }));
    }
    Ok(match argument.get("value") {
        None => json!({ "type": "undefined" }),
        Some(Value::Null) => json!({ "type": "null" }),
        Some(value @ Value::Bool(_)) => json!({ "type": "boolean", "value": value }),
        Some(value @ Value::Number(_)) => json!({ "type": "number", "value": value }),
        Some(value @ Value::String(_)) => json!({ "type": "string", "value": value }),
        Some(Value::Array(_) | Value::Object(_)) => {
            return Err(InspectorError::InvalidParams(
                "object values must be passed by objectId".into(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_context_uses_main_module() {
        let info = DebuggeeInfo {
            pid: 7,
            cwd: "/srv".into(),
            filename: Some("/srv/app.js".into()),
            node_version: "v0.12.7".into(),
        };
        let context = execution_context(&info);
        assert_eq!(context["id"], MAIN_CONTEXT_ID);
        assert_eq!(context["name"], "/srv/app.js");
        assert_eq!(context["frameId"], MAIN_FRAME_ID);
    }

    #[test]
    fn call_arguments_become_v8_values() {
        assert_eq!(v8_value(&json!({"objectId": "12"})).unwrap(), json!({"handle": 12}));
        assert_eq!(
            v8_value(&json!({"value": 3})).unwrap(),
            json!({"type": "number", "value": 3})
        );
        assert_eq!(
            v8_value(&json!({"value": "x"})).unwrap(),
            json!({"type": "string", "value": "x"})
        );
        assert_eq!(v8_value(&json!({})).unwrap(), json!({"type": "undefined"}));
        assert_eq!(v8_value(&json!({"value": null})).unwrap(), json!({"type": "null"}));
        assert!(v8_value(&json!({"value": {"a": 1}})).is_err());
        assert!(v8_value(&json!({"objectId": "scope:0:1"})).is_err());
    }
}
