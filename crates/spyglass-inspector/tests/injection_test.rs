mod common;

use std::time::Duration;

use common::{script, start_node, FakeNode, Ui};
use serde_json::{json, Value};
use spyglass_config::Config;
use spyglass_inspector::injector::{SENTINEL_FUNCTION, SENTINEL_INVOCATION};
use spyglass_v8dp::mock::{MockDebuggee, MockResponse};
use spyglass_v8dp::ConnectionRegistry;

fn scripts() -> Vec<Value> {
    vec![script(5, "/app/main.js", "work();\n")]
}

fn sentinel_break() -> Value {
    json!({
        "invocationText": SENTINEL_INVOCATION,
        "sourceLine": 1,
        "sourceColumn": 2,
        "sourceLineText": "  debugger;",
        "script": {"id": 99, "name": "[eval]"},
    })
}

async fn injector_server() -> MockDebuggee {
    MockDebuggee::start(|command, args| match command {
        "injection" => MockResponse::ok(json!({ "name": args["name"] })),
        "Console.enable" | "Console.disable" | "Network.enable" => MockResponse::ok(json!({})),
        "HeapProfiler.getObjectByHeapObjectId" => {
            MockResponse::ok(json!({ "stashed": "__spyglassHeapObject" }))
        }
        other => MockResponse::fail(format!("unknown command {other}")),
    })
    .await
    .expect("injector server")
}

#[tokio::test]
async fn injected_domain_loads_once_after_handshake() {
    let server = injector_server().await;
    let node = start_node(FakeNode::new(scripts()).with_injector(server.port())).await;
    let registry = ConnectionRegistry::new();
    let mut ui = Ui::connect(Config::default(), &registry, node.port());

    let id = ui.send("Console.enable", json!({}));
    let evaluations = node.wait_for("evaluate", 1).await;
    assert!(evaluations[0]["expression"]
        .as_str()
        .unwrap()
        .contains(SENTINEL_FUNCTION));
    node.emit_event("break", sentinel_break()).await;

    let response = ui.response(id).await;
    assert_eq!(response["result"], json!({}));
    assert_eq!(server.commands().await, vec!["injection", "Console.enable"]);
    assert_eq!(server.requests_for("injection").await[0]["name"], "console");

    let evaluations = node.requests_for("evaluate").await;
    assert_eq!(evaluations[1]["frame"], 0);
    assert_eq!(evaluations[1]["disable_break"], true);
    assert_eq!(node.requests_for("continue").await.len(), 1);

    ui.call("Console.disable", json!({})).await;
    assert_eq!(server.requests_for("injection").await.len(), 1);

    server
        .emit_event(
            "Console.messageAdded",
            json!({ "message": { "text": "hi", "level": "log" } }),
        )
        .await;
    let added = ui.event("Console.messageAdded").await;
    assert_eq!(added["message"]["text"], "hi");
}

#[tokio::test]
async fn injections_queued_before_the_handshake_load_in_request_order() {
    let server = injector_server().await;
    let node = start_node(FakeNode::new(scripts()).with_injector(server.port())).await;
    let registry = ConnectionRegistry::new();
    let mut ui = Ui::connect(Config::default(), &registry, node.port());

    let console = ui.send("Console.enable", json!({}));
    node.wait_for("evaluate", 1).await;
    let network = ui.send("Network.enable", json!({}));
    ui.drain(Duration::from_millis(50)).await;
    assert!(server.requests_for("injection").await.is_empty());

    node.emit_event("break", sentinel_break()).await;
    assert_eq!(ui.response(console).await["result"], json!({}));
    assert_eq!(ui.response(network).await["result"], json!({}));

    let names: Vec<Value> = server
        .requests_for("injection")
        .await
        .into_iter()
        .map(|args| args["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("console"), json!("network")]);
    assert_eq!(node.requests_for("evaluate").await.len(), 2);
    assert_eq!(node.requests_for("continue").await.len(), 1);
}

#[tokio::test]
async fn heap_object_is_inspected_through_the_debuggee() {
    let server = injector_server().await;
    let node = start_node(FakeNode::new(scripts()).with_injector(server.port())).await;
    let registry = ConnectionRegistry::new();
    let mut ui = Ui::connect(Config::default(), &registry, node.port());

    let id = ui.send(
        "HeapProfiler.getObjectByHeapObjectId",
        json!({ "objectId": "17" }),
    );
    node.wait_for("evaluate", 1).await;
    node.emit_event("break", sentinel_break()).await;

    let response = ui.response(id).await;
    assert_eq!(response["result"]["result"]["value"], 42);
    let evaluations = node.requests_for("evaluate").await;
    assert!(evaluations
        .last()
        .and_then(|e| e["expression"].as_str())
        .unwrap()
        .contains("__spyglassHeapObject"));
}

#[tokio::test]
async fn failed_handshake_fails_the_domain_for_good() {
    let node = start_node(FakeNode::new(scripts())).await;
    let registry = ConnectionRegistry::new();
    let mut ui = Ui::connect(Config::default(), &registry, node.port());

    let id = ui.send("Console.enable", json!({}));
    node.wait_for("evaluate", 1).await;
    node.emit_event("break", sentinel_break()).await;

    let response = ui.response(id).await;
    assert_eq!(response["error"]["code"], -32000);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Console is unavailable"));
    assert_eq!(node.requests_for("continue").await.len(), 1);

    let again = ui.call("Console.enable", json!({})).await;
    assert_eq!(again["error"]["code"], -32000);
    assert_eq!(node.requests_for("evaluate").await.len(), 2);
}

#[tokio::test]
async fn disabled_domains_never_touch_the_debuggee() {
    let node = start_node(FakeNode::new(scripts())).await;
    let registry = ConnectionRegistry::new();
    let mut config = Config::default();
    config.inject.console = false;
    let mut ui = Ui::connect(config, &registry, node.port());

    let response = ui.call("Console.enable", json!({})).await;
    assert_eq!(
        response["error"]["message"],
        "Console is unavailable: code injection is disabled"
    );

    let mut config = Config::default();
    config.inject.enabled = false;
    let mut ui = Ui::connect(config, &registry, node.port());
    let response = ui.call("Network.enable", json!({})).await;
    assert_eq!(
        response["error"]["message"],
        "Network is unavailable: code injection is disabled"
    );
    assert!(node.requests_for("evaluate").await.is_empty());
}

#[tokio::test]
async fn sentinel_from_another_session_is_left_alone() {
    let node = start_node(FakeNode::new(scripts())).await;
    let registry = ConnectionRegistry::new();
    let mut ui = Ui::connect(Config::default(), &registry, node.port());
    ui.call("Debugger.enable", json!({})).await;

    node.emit_event("break", sentinel_break()).await;
    ui.drain(Duration::from_millis(150)).await;
    assert!(node.requests_for("continue").await.is_empty());
    assert!(ui.seen_events("Debugger.paused").is_empty());
}
