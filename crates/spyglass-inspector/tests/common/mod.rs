//! Shared fixtures: a scripted Node debuggee and a UI-side harness.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use spyglass_config::Config;
use spyglass_inspector::injector::SENTINEL_FUNCTION;
use spyglass_inspector::Session;
use spyglass_v8dp::mock::{MockDebuggee, MockResponse};
use spyglass_v8dp::ConnectionRegistry;
use tokio::sync::mpsc::UnboundedReceiver;

/// A script the fake debuggee reports.
pub fn script(id: i64, name: &str, source: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "lineOffset": 0,
        "columnOffset": 0,
        "lineCount": source.lines().count().max(1),
        "source": source,
    })
}

/// Answers the commands a session sends the way a Node 0.12 debuggee does.
pub struct FakeNode {
    scripts: Vec<Value>,
    next_breakpoint: AtomicI64,
    injector_port: Option<u16>,
}

impl FakeNode {
    pub fn new(scripts: Vec<Value>) -> Self {
        Self {
            scripts,
            next_breakpoint: AtomicI64::new(1),
            injector_port: None,
        }
    }

    /// Report `port` as the injector server's port.
    pub fn with_injector(mut self, port: u16) -> Self {
        self.injector_port = Some(port);
        self
    }

    fn scripts_reply(&self, args: &Value) -> Value {
        let ids: Option<Vec<i64>> = args
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect());
        let include_source = args["includeSource"].as_bool().unwrap_or(false);
        let list: Vec<Value> = self
            .scripts
            .iter()
            .filter(|s| ids.as_ref().map_or(true, |ids| ids.contains(&s["id"].as_i64().unwrap())))
            .map(|s| {
                let mut s = s.clone();
                if !include_source {
                    s.as_object_mut().unwrap().remove("source");
                }
                s
            })
            .collect();
        Value::Array(list)
    }

    fn evaluate(&self, args: &Value) -> MockResponse {
        let expression = args["expression"].as_str().unwrap_or_default();
        if expression.contains("createServer") {
            return match self.injector_port {
                Some(port) => MockResponse::ok(json!({"type": "number", "value": port, "text": port.to_string()})),
                None => MockResponse::fail("ReferenceError: net is not defined"),
            };
        }
        if expression.contains(SENTINEL_FUNCTION) {
            return MockResponse::ok(json!({"type": "undefined", "text": "undefined"}));
        }
        if expression.contains("nodeVersion") {
            let info = json!({
                "pid": 4242,
                "cwd": "/app",
                "filename": "/app/main.js",
                "nodeVersion": "v0.12.7",
            });
            return MockResponse::ok(json!({"type": "string", "value": info.to_string()}));
        }
        if expression == "missing" {
            return MockResponse::fail("ReferenceError: missing is not defined");
        }
        MockResponse::ok(json!({"handle": 40, "type": "number", "value": 42, "text": "42"}))
    }

    pub fn answer(&self, command: &str, args: &Value) -> MockResponse {
        match command {
            "scripts" => MockResponse::ok(self.scripts_reply(args)),
            "evaluate" => self.evaluate(args),
            "continue" => MockResponse::ok(json!({})).running(true),
            "setbreakpoint" => {
                let id = self.next_breakpoint.fetch_add(1, Ordering::SeqCst);
                MockResponse::ok(json!({
                    "type": args["type"],
                    "breakpoint": id,
                    "actual_locations": [{
                        "line": args["line"],
                        "column": args.get("column").cloned().unwrap_or(json!(0)),
                        "script_id": 5,
                    }],
                }))
            }
            "listbreakpoints" => MockResponse::ok(json!({
                "breakpoints": [{"number": 1}, {"number": 2}],
                "breakOnExceptions": false,
                "breakOnUncaughtExceptions": false,
            })),
            "backtrace" => MockResponse::ok(json!({
                "fromFrame": 0,
                "toFrame": 1,
                "totalFrames": 1,
                "frames": [{
                    "index": 0,
                    "func": {"type": "function", "name": "main"},
                    "script": {"ref": 9},
                    "receiver": {"type": "undefined"},
                    "line": 3,
                    "column": 2,
                    "scopes": [{"type": 1, "index": 0}, {"type": 0, "index": 1}],
                }],
            }))
            .with_refs(vec![json!({"handle": 9, "type": "script", "id": 5, "name": "/app/main.js"})])
            .running(false),
            "changelive" => MockResponse::ok(json!({
                "change_log": [],
                "result": {"stack_modified": false, "updated": true},
            })),
            _ => MockResponse::ok(json!({})),
        }
    }
}

/// Start a mock debuggee backed by `node`.
pub async fn start_node(node: FakeNode) -> MockDebuggee {
    let node = Arc::new(node);
    MockDebuggee::start(move |command, args| node.answer(command, args))
        .await
        .expect("mock debuggee")
}

/// The UI end of a session.
pub struct Ui {
    pub session: Session,
    rx: UnboundedReceiver<Value>,
    /// Every message received so far, in order.
    pub seen: Vec<Value>,
    unclaimed: VecDeque<Value>,
    next_id: i64,
}

impl Ui {
    pub fn connect(config: Config, registry: &ConnectionRegistry, port: u16) -> Self {
        let (session, rx) =
            Session::start(Arc::new(config), registry, "127.0.0.1", port).expect("session");
        Self {
            session,
            rx,
            seen: Vec::new(),
            unclaimed: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Send a command and return its id.
    pub fn send(&mut self, method: &str, params: Value) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        let text = json!({"id": id, "method": method, "params": params}).to_string();
        self.session.handle_message(&text);
        id
    }

    /// The first message not yet claimed that satisfies `matches`.
    async fn claim(&mut self, matches: impl Fn(&Value) -> bool) -> Value {
        if let Some(index) = self.unclaimed.iter().position(&matches) {
            return self.unclaimed.remove(index).unwrap();
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let message = tokio::time::timeout_at(deadline, self.rx.recv())
                .await
                .expect("timed out waiting for a UI message")
                .expect("session channel closed");
            self.seen.push(message.clone());
            if matches(&message) {
                return message;
            }
            self.unclaimed.push_back(message);
        }
    }

    /// Wait for the response to command `id`.
    pub async fn response(&mut self, id: i64) -> Value {
        self.claim(|m| m["id"] == id).await
    }

    /// Send a command and wait for its response.
    pub async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.send(method, params);
        self.response(id).await
    }

    /// Wait for the next unclaimed notification named `method`; returns its
    /// params.
    pub async fn event(&mut self, method: &str) -> Value {
        self.claim(|m| m["method"] == method).await["params"].clone()
    }

    /// Notifications named `method` received so far.
    pub fn seen_events(&self, method: &str) -> Vec<Value> {
        self.seen
            .iter()
            .filter(|m| m["method"] == method)
            .map(|m| m["params"].clone())
            .collect()
    }

    /// Collect whatever arrives within `window`.
    pub async fn drain(&mut self, window: Duration) {
        while let Ok(Some(message)) = tokio::time::timeout(window, self.rx.recv()).await {
            self.seen.push(message.clone());
            self.unclaimed.push_back(message);
        }
    }
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Break event body for a pause in script `id`.
pub fn break_in(id: i64, name: &str) -> Value {
    json!({
        "invocationText": "main()",
        "sourceLine": 3,
        "sourceColumn": 2,
        "sourceLineText": "  work();",
        "script": {"id": id, "name": name, "lineOffset": 0, "columnOffset": 0, "lineCount": 20},
    })
}
