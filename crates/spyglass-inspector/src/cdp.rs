//! CDP message shapes and the outbound channel to the UI.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::InspectorError;

/// Frame id reported for the debuggee's single page.
pub const MAIN_FRAME_ID: &str = "spyglass-main-frame";

/// Execution context id reported for the debuggee's global scope.
pub const MAIN_CONTEXT_ID: i64 = 1;

/// An inbound `{id, method, params}` command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Command {
    /// Request id echoed in the response.
    pub id: i64,
    /// `Domain.method`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl Command {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` when the text is not a command object.
    pub fn parse(text: &str) -> Result<Self, InspectorError> {
        serde_json::from_str(text).map_err(|e| InspectorError::InvalidParams(e.to_string()))
    }

    /// The numeric `id` of a frame that did not parse as a command, so it
    /// can still be answered.
    pub fn id_of(text: &str) -> Option<i64> {
        serde_json::from_str::<Value>(text)
            .ok()?
            .get("id")
            .and_then(Value::as_i64)
    }
}

/// Split `Domain.method` at its first dot.
pub fn split_method(method: &str) -> Option<(&str, &str)> {
    let (domain, name) = method.split_once('.')?;
    (!domain.is_empty() && !name.is_empty()).then_some((domain, name))
}

/// `{id, result}`.
pub fn response(id: i64, result: Value) -> Value {
    json!({ "id": id, "result": result })
}

/// `{id, error: {code, message}}`.
pub fn error_response(id: i64, err: &InspectorError) -> Value {
    json!({
        "id": id,
        "error": { "code": err.code(), "message": err.to_string() },
    })
}

/// `{method, params}`.
pub fn event(method: &str, params: Value) -> Value {
    json!({ "method": method, "params": params })
}

/// Sender half of the UI connection.
#[derive(Debug, Clone)]
pub struct Frontend {
    tx: mpsc::UnboundedSender<Value>,
}

impl Frontend {
    /// Create a frontend and the receiver the server drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send a notification.
    pub fn emit(&self, method: &str, params: Value) {
        tracing::trace!(method, "cdp event");
        let _ = self.tx.send(event(method, params));
    }

    /// Answer command `id`.
    pub fn respond(&self, id: i64, outcome: Result<Value, InspectorError>) {
        let message = match outcome {
            Ok(result) => response(id, result),
            Err(err) => error_response(id, &err),
        };
        let _ = self.tx.send(message);
    }
}

/// Fetch a required parameter.
///
/// # Errors
///
/// Returns `InvalidParams` naming the missing key.
pub fn param<'a>(params: &'a Value, key: &str) -> Result<&'a Value, InspectorError> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| InspectorError::InvalidParams(format!("missing '{key}'")))
}

/// Fetch a required string parameter.
///
/// # Errors
///
/// Returns `InvalidParams` when missing or not a string.
pub fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, InspectorError> {
    param(params, key)?
        .as_str()
        .ok_or_else(|| InspectorError::InvalidParams(format!("'{key}' must be a string")))
}

/// Parse a numeric id that CDP carries as a string (`"12"`) or number.
///
/// # Errors
///
/// Returns `InvalidParams` when the value is neither.
pub fn numeric_id(params: &Value, key: &str) -> Result<i64, InspectorError> {
    let value = param(params, key)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| InspectorError::InvalidParams(format!("'{key}' must be a numeric id")))
}
