//! Heap snapshots and allocation tracking through an injected payload.
//!
//! `getObjectByHeapObjectId` cannot hand a heap object back over the
//! injector connection, so the payload parks it on `process` under a fixed
//! key and the agent evaluates that key through the debuggee to get a
//! mirror the UI can inspect.

use serde_json::{json, Value};
use spyglass_config::Config;

use super::injected;
use crate::error::InspectorError;
use crate::injector::Injection;
use crate::remote_object::to_remote_object;
use crate::session::SessionContext;

const METHODS: &[&str] = &[
    "enable",
    "takeHeapSnapshot",
    "startTrackingHeapObjects",
    "stopTrackingHeapObjects",
    "collectGarbage",
    "getObjectByHeapObjectId",
    "resetProfiles",
];

const STASH_KEY: &str = "__spyglassHeapObject";

/// Handler for `HeapProfiler.*`.
pub struct HeapProfilerAgent {
    injection: Injection,
    allowed: bool,
}

impl HeapProfilerAgent {
    /// Events the payload emits.
    pub const EVENTS: &'static [&'static str] = &[
        "HeapProfiler.addHeapSnapshotChunk",
        "HeapProfiler.reportHeapSnapshotProgress",
        "HeapProfiler.heapStatsUpdate",
        "HeapProfiler.lastSeenObjectId",
        "HeapProfiler.resetProfiles",
    ];

    pub fn new(config: &Config) -> Self {
        Self {
            injection: Injection {
                domain: "HeapProfiler",
                name: "heap_profiler",
                source: include_str!("../../injections/heap_profiler.js"),
                options: json!({ "stashKey": STASH_KEY }),
            },
            allowed: config.inject.enabled && config.inject.profiles,
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
        injected::ensure_served(METHODS, "HeapProfiler", method)?;
        let result = injected::call(ctx, &self.injection, self.allowed, method, params).await?;
        if method != "getObjectByHeapObjectId" {
            return Ok(result);
        }

        let reply = ctx
            .debuggee
            .request(
                "evaluate",
                json!({ "expression": format!("process['{STASH_KEY}']"), "global": true }),
            )
            .await?;
        Ok(json!({ "result": to_remote_object(&reply.body) }))
    }
}
