//! Conversion of V8 value mirrors into CDP objects.
//!
//! V8 describes values as mirrors `{handle, type, className, value, text}`
//! and refers to other mirrors by `{ref: handle}`. CDP wants `RemoteObject`s
//! whose `objectId` can be handed back later; the handle, as a string, is that
//! id. Scope objects have no stable handle, so they get synthetic
//! `scope:<frame>:<scope>` ids.

use serde_json::{json, Map, Value};
use spyglass_v8dp::Reply;

/// Prefix of synthetic scope object ids.
pub const SCOPE_ID_PREFIX: &str = "scope:";

/// Follow `{ref: N}` through the reply's refs; anything else is returned as is.
pub fn resolve<'a>(value: &'a Value, reply: &'a Reply) -> &'a Value {
    value
        .get("ref")
        .and_then(Value::as_i64)
        .and_then(|handle| reply.lookup(handle))
        .unwrap_or(value)
}

/// Handle of a mirror or reference.
pub fn handle_of(value: &Value) -> Option<i64> {
    value
        .get("handle")
        .or_else(|| value.get("ref"))
        .and_then(Value::as_i64)
}

/// CDP scope type for a V8 scope type code.
pub fn scope_type(code: i64) -> &'static str {
    match code {
        0 => "global",
        1 => "local",
        2 => "with",
        3 => "closure",
        4 => "catch",
        5 => "block",
        6 => "script",
        _ => "local",
    }
}

/// Synthetic id of a scope object.
pub fn scope_object_id(frame: i64, scope: i64) -> String {
    format!("{SCOPE_ID_PREFIX}{frame}:{scope}")
}

/// Parse a synthetic scope id back into `(frame, scope)`.
pub fn parse_scope_object_id(id: &str) -> Option<(i64, i64)> {
    let rest = id.strip_prefix(SCOPE_ID_PREFIX)?;
    let (frame, scope) = rest.split_once(':')?;
    Some((frame.parse().ok()?, scope.parse().ok()?))
}

/// Convert a V8 mirror into a CDP `RemoteObject`.
pub fn to_remote_object(mirror: &Value) -> Value {
    let kind = mirror.get("type").and_then(Value::as_str).unwrap_or("undefined");
    let text = mirror.get("text").and_then(Value::as_str);
    let class_name = mirror.get("className").and_then(Value::as_str);

    match kind {
        "undefined" => json!({ "type": "undefined", "description": "undefined" }),
        "null" => json!({ "type": "object", "subtype": "null", "value": null, "description": "null" }),
        "boolean" | "number" | "string" => {
            let value = mirror.get("value").cloned().unwrap_or(Value::Null);
            let description = text.map(str::to_string).unwrap_or_else(|| match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            let mut object = json!({ "type": kind, "description": description });
            // Non-finite numbers arrive without a usable value.
            if !(kind == "number" && value.is_null()) {
                object["value"] = value;
            }
            object
        }
        "function" => {
            let mut object = Map::new();
            object.insert("type".into(), json!("function"));
            object.insert("className".into(), json!(class_name.unwrap_or("Function")));
            object.insert(
                "description".into(),
                json!(mirror
                    .get("source")
                    .and_then(Value::as_str)
                    .or(text)
                    .unwrap_or("function () {}")),
            );
            insert_object_id(&mut object, mirror);
            Value::Object(object)
        }
        _ => {
            let class_name = class_name.unwrap_or("Object");
            let mut object = Map::new();
            object.insert("type".into(), json!("object"));
            if let Some(subtype) = subtype(kind, class_name) {
                object.insert("subtype".into(), json!(subtype));
            }
            object.insert("className".into(), json!(class_name));
            object.insert(
                "description".into(),
                json!(describe_object(kind, class_name, text, mirror)),
            );
            insert_object_id(&mut object, mirror);
            Value::Object(object)
        }
    }
}

fn insert_object_id(object: &mut Map<String, Value>, mirror: &Value) {
    if let Some(handle) = handle_of(mirror) {
        object.insert("objectId".into(), json!(handle.to_string()));
    }
}

fn subtype(kind: &str, class_name: &str) -> Option<&'static str> {
    match (kind, class_name) {
        ("regexp", _) | (_, "RegExp") => Some("regexp"),
        ("error", _) | (_, "Error") => Some("error"),
        (_, "Array") => Some("array"),
        (_, "Date") => Some("date"),
        _ => None,
    }
}

fn describe_object(kind: &str, class_name: &str, text: Option<&str>, mirror: &Value) -> String {
    if class_name == "Array" {
        let length = mirror
            .get("properties")
            .and_then(Value::as_array)
            .map(|props| {
                props
                    .iter()
                    .filter(|p| {
                        p.get("name")
                            .and_then(|n| n.as_u64().or_else(|| n.as_str()?.parse().ok()))
                            .is_some()
                    })
                    .count()
            });
        return match length {
            Some(length) => format!("Array[{length}]"),
            None => "Array".to_string(),
        };
    }
    match kind {
        "regexp" | "error" => text.unwrap_or(class_name).to_string(),
        _ if class_name == "Date" => mirror
            .get("value")
            .and_then(Value::as_str)
            .or(text)
            .unwrap_or(class_name)
            .to_string(),
        _ => class_name.to_string(),
    }
}

/// Convert an object mirror's `properties` into CDP property descriptors.
///
/// Property values are looked up in `reply`; the prototype, when present,
/// is listed as `__proto__`.
pub fn to_property_descriptors(mirror: &Value, reply: &Reply) -> Vec<Value> {
    let mut out: Vec<Value> = mirror
        .get("properties")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|property| {
            let name = match property.get("name")? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let value = to_remote_object(resolve(property, reply));
            // V8 attribute bits: 1 read-only, 2 don't-enum, 4 don't-delete.
            let attributes = property
                .get("attributes")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            Some(json!({
                "name": name,
                "value": value,
                "writable": attributes & 1 == 0,
                "enumerable": attributes & 2 == 0,
                "configurable": attributes & 4 == 0,
                "isOwn": true,
            }))
        })
        .collect();

    if let Some(proto) = mirror.get("protoObject") {
        let proto = resolve(proto, reply);
        if proto.get("type").and_then(Value::as_str) != Some("null") {
            out.push(json!({
                "name": "__proto__",
                "value": to_remote_object(proto),
                "writable": true,
                "enumerable": false,
                "configurable": true,
                "isOwn": true,
            }));
        }
    }
    out
}

/// Convert one `backtrace` frame into a CDP `CallFrame`.
pub fn to_call_frame(frame: &Value, reply: &Reply) -> Value {
    let index = frame.get("index").and_then(Value::as_i64).unwrap_or(0);
    let func = frame.get("func").map(|f| resolve(f, reply));
    let script = frame.get("script").map(|s| resolve(s, reply));

    let function_name = func
        .and_then(|f| {
            ["name", "inferredName"]
                .iter()
                .filter_map(|key| f.get(*key).and_then(Value::as_str))
                .find(|name| !name.is_empty())
        })
        .unwrap_or("(anonymous function)");
    let script_id = script
        .and_then(|s| s.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();

    let scope_chain: Vec<Value> = frame
        .get("scopes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|scope| {
            let scope_index = scope.get("index").and_then(Value::as_i64).unwrap_or(0);
            let kind = scope_type(scope.get("type").and_then(Value::as_i64).unwrap_or(1));
            json!({
                "type": kind,
                "object": {
                    "type": "object",
                    "className": "Object",
                    "description": if kind == "global" { "global" } else { "Object" },
                    "objectId": scope_object_id(index, scope_index),
                },
            })
        })
        .collect();

    let this = frame
        .get("receiver")
        .map(|r| to_remote_object(resolve(r, reply)))
        .unwrap_or_else(|| json!({ "type": "undefined" }));

    json!({
        "callFrameId": index.to_string(),
        "functionName": function_name,
        "location": {
            "scriptId": script_id,
            "lineNumber": frame.get("line").and_then(Value::as_i64).unwrap_or(0),
            "columnNumber": frame.get("column").and_then(Value::as_i64).unwrap_or(0),
        },
        "scopeChain": scope_chain,
        "this": this,
    })
}

/// Script ids referenced by a backtrace, in frame order.
pub fn frame_script_ids(frames: &[Value], reply: &Reply) -> Vec<i64> {
    let mut ids: Vec<i64> = Vec::new();
    for frame in frames {
        let id = frame
            .get("script")
            .map(|s| resolve(s, reply))
            .and_then(|s| s.get("id"))
            .and_then(Value::as_i64);
        if let Some(id) = id {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}
