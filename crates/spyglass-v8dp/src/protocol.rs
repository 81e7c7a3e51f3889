//! V8DP message types.
//!
//! Requests go out as `{seq, type:"request", command, arguments}`; the
//! debuggee answers with responses keyed by `request_seq` and pushes events
//! at any time. Any message may carry a `running` flag describing the
//! debuggee's execution state after it was produced.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::V8Error;

/// Events after which the debuggee is known to be paused.
pub const PAUSE_EVENTS: [&str; 2] = ["break", "exception"];

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request<'a> {
    /// Sequence number, unique per connection.
    pub seq: i64,
    /// Always "request".
    #[serde(rename = "type")]
    pub message_type: &'static str,
    /// The command to execute.
    pub command: &'a str,
    /// Command arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<&'a Value>,
}

impl<'a> Request<'a> {
    /// Build a request for `command`.
    pub fn new(seq: i64, command: &'a str, arguments: Option<&'a Value>) -> Self {
        Self {
            seq,
            message_type: "request",
            command,
            arguments,
        }
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "seq": self.seq,
            "type": self.message_type,
            "command": self.command,
            "arguments": self.arguments.cloned().unwrap_or_else(|| serde_json::json!({})),
        })
    }
}

/// A response to an earlier request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Sequence number of the request this answers.
    pub request_seq: i64,
    /// Whether the command succeeded.
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    /// The command this response is for.
    #[serde(default)]
    pub command: Option<String>,
    /// Command-specific body.
    #[serde(default)]
    pub body: Value,
    /// Failure message when `success` is false.
    #[serde(default)]
    pub message: Option<String>,
    /// Object mirrors referenced by handle from `body`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub refs: Vec<Value>,
    /// Execution state after the command.
    #[serde(default)]
    pub running: Option<bool>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// An asynchronous notification from the debuggee.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Event {
    /// Event name (`break`, `exception`, `afterCompile`, ...).
    pub event: String,
    /// Event-specific body.
    #[serde(default)]
    pub body: Value,
    /// Execution state after the event.
    #[serde(default)]
    pub running: Option<bool>,
}

impl Event {
    /// Whether this event leaves the debuggee paused.
    pub fn is_pause(&self) -> bool {
        PAUSE_EVENTS.contains(&self.event.as_str())
    }
}

/// A classified inbound document.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Goes to request correlation.
    Response(Response),
    /// Goes to event subscribers.
    Event(Event),
    /// A response to `request_seq` whose fields could not be decoded. The
    /// waiting request is failed with `reason`.
    Unreadable {
        /// Sequence number of the request this answers.
        request_seq: i64,
        /// Decode error.
        reason: String,
    },
}

/// Classify a parsed frame.
///
/// Returns `Ok(None)` for documents that are neither a correlatable
/// response nor an event (requests echoed back, responses without a
/// positive `request_seq`). A response with a positive `request_seq` is
/// always classified, as [`Message::Unreadable`] when it does not decode.
pub fn classify(value: Value) -> Result<Option<Message>, V8Error> {
    match value.get("type").and_then(Value::as_str) {
        Some("response") => {
            let Some(request_seq) = value
                .get("request_seq")
                .and_then(Value::as_i64)
                .filter(|seq| *seq > 0)
            else {
                return Ok(None);
            };
            Ok(Some(match serde_json::from_value(value) {
                Ok(response) => Message::Response(response),
                Err(e) => Message::Unreadable {
                    request_seq,
                    reason: format!("bad response: {e}"),
                },
            }))
        }
        Some("event") => serde_json::from_value(value)
            .map(|e| Some(Message::Event(e)))
            .map_err(|e| V8Error::MalformedFrame(format!("bad event: {e}"))),
        _ => Ok(None),
    }
}

/// Execution state implied by a raw frame, if any.
pub fn running_hint(value: &Value) -> Option<bool> {
    let is_pause_event = value.get("type").and_then(Value::as_str) == Some("event")
        && value
            .get("event")
            .and_then(Value::as_str)
            .is_some_and(|name| PAUSE_EVENTS.contains(&name));
    if is_pause_event {
        return Some(false);
    }
    value.get("running").and_then(Value::as_bool)
}

/// A successful response, with its `refs` flattened into a lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Command-specific body.
    pub body: Value,
    /// Referenced object mirrors, keyed by handle.
    pub refs: HashMap<i64, Value>,
    /// Execution state after the command, when reported.
    pub running: Option<bool>,
}

impl Reply {
    /// Look up a referenced mirror by handle.
    pub fn lookup(&self, handle: i64) -> Option<&Value> {
        self.refs.get(&handle)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        let refs = response
            .refs
            .into_iter()
            .filter_map(|r| Some((r.get("handle")?.as_i64()?, r)))
            .collect();
        Self {
            body: response.body,
            refs,
            running: response.running,
        }
    }
}
