//! Reaction to `break` and `exception` events.
//!
//! Each pause runs through an ordered pipeline that stops at the first step
//! that applies:
//!
//! 1. all pauses are skipped: step out silently;
//! 2. the injector's handshake sentinel: hand over to the injector;
//! 3. a non-exception pause in an unknown or hidden script: step out silently;
//! 4. otherwise clear a pending continue-to-location breakpoint, fetch the
//!    backtrace and send one `Debugger.paused`.
//!
//! Only one pipeline runs at a time per session.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{json, Value};
use spyglass_v8dp::Event;
use tokio::sync::Mutex;

use crate::error::InspectorError;
use crate::injector;
use crate::remote_object::{frame_script_ids, to_call_frame, to_remote_object};
use crate::session::SessionContext;

/// Which pipeline step handled a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakOutcome {
    /// Skipped because all pauses are skipped.
    SkippedAll,
    /// Consumed by the injector handshake.
    Injector,
    /// Stepped out of an unknown or hidden script.
    SteppedOut,
    /// Reported to the UI.
    Paused,
}

/// Pause bookkeeping for one session.
#[derive(Debug, Default)]
pub struct PauseState {
    skip_all: AtomicBool,
    continue_to_location: Mutex<Option<i64>>,
    last_paused: Mutex<Option<Value>>,
    pipeline: Mutex<()>,
}

impl PauseState {
    /// Create the state for a fresh session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every pause is stepped over silently.
    pub fn skip_all(&self) -> bool {
        self.skip_all.load(Ordering::Acquire)
    }

    /// Set or clear "skip all pauses".
    pub fn set_skip_all(&self, skip: bool) {
        self.skip_all.store(skip, Ordering::Release);
    }

    /// Remember the transient continue-to-location breakpoint.
    ///
    /// Returns the one it supersedes, which the caller must clear.
    pub async fn replace_continue_to_location(&self, id: Option<i64>) -> Option<i64> {
        std::mem::replace(&mut *self.continue_to_location.lock().await, id)
    }

    /// Take the continue-to-location breakpoint, leaving none.
    pub async fn take_continue_to_location(&self) -> Option<i64> {
        self.continue_to_location.lock().await.take()
    }

    /// The last `Debugger.paused` parameters, while still paused.
    pub async fn last_paused(&self) -> Option<Value> {
        self.last_paused.lock().await.clone()
    }

    /// Forget the last pause after the debuggee resumed.
    pub async fn clear_last_paused(&self) {
        self.last_paused.lock().await.take();
    }
}

async fn step_out(ctx: &SessionContext) -> Result<(), InspectorError> {
    ctx.debuggee
        .request("continue", json!({ "stepaction": "out" }))
        .await?;
    Ok(())
}

/// Run the pause pipeline for a `break` or `exception` event.
///
/// # Errors
///
/// Propagates debuggee failures from the step that ran.
pub async fn handle_pause_event(
    ctx: &SessionContext,
    event: &Event,
) -> Result<BreakOutcome, InspectorError> {
    let _pipeline = ctx.pause.pipeline.lock().await;
    let is_exception = event.event == "exception";

    if ctx.pause.skip_all() {
        step_out(ctx).await?;
        return Ok(BreakOutcome::SkippedAll);
    }

    if !is_exception && injector::is_sentinel(&event.body) {
        ctx.injector.on_sentinel(&ctx.debuggee).await;
        return Ok(BreakOutcome::Injector);
    }

    let script_id = event
        .body
        .get("script")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_i64);
    let visible = match script_id {
        Some(id) => ctx
            .script(&id.to_string())
            .await?
            .is_some_and(|script| !script.hidden),
        None => false,
    };
    if !visible && !is_exception {
        tracing::debug!(?script_id, "stepping out of unknown or hidden script");
        step_out(ctx).await?;
        return Ok(BreakOutcome::SteppedOut);
    }

    let data = is_exception
        .then(|| event.body.get("exception").map(to_remote_object))
        .flatten();
    let hit_breakpoints: Vec<String> = event
        .body
        .get("breakpoints")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_i64)
        .map(|id| id.to_string())
        .collect();
    let reason = if is_exception { "exception" } else { "other" };

    send_paused(ctx, reason, data, hit_breakpoints).await?;
    Ok(BreakOutcome::Paused)
}

/// Re-send the current pause to a UI that just enabled the debugger.
///
/// # Errors
///
/// Propagates backtrace failures.
pub async fn resend_paused(ctx: &SessionContext) -> Result<(), InspectorError> {
    let _pipeline = ctx.pause.pipeline.lock().await;
    if let Some(params) = ctx.pause.last_paused().await {
        ctx.frontend.emit("Debugger.paused", params);
        return Ok(());
    }
    send_paused(ctx, "other", None, Vec::new()).await
}

async fn send_paused(
    ctx: &SessionContext,
    reason: &str,
    data: Option<Value>,
    hit_breakpoints: Vec<String>,
) -> Result<(), InspectorError> {
    if let Some(id) = ctx.pause.take_continue_to_location().await {
        if let Err(e) = ctx
            .debuggee
            .request("clearbreakpoint", json!({ "breakpoint": id }))
            .await
        {
            tracing::warn!(id, "cannot clear continue-to-location breakpoint: {e}");
        }
    }

    let call_frames = backtrace(ctx).await?;

    let mut params = json!({
        "callFrames": call_frames,
        "reason": reason,
        "hitBreakpoints": hit_breakpoints,
    });
    if let Some(data) = data {
        params["data"] = data;
    }
    *ctx.pause.last_paused.lock().await = Some(params.clone());
    ctx.frontend.emit("Debugger.paused", params);
    Ok(())
}

/// Fetch the current stack as CDP call frames.
///
/// Scripts referenced by the frames that were not known yet are announced.
///
/// # Errors
///
/// Propagates the `backtrace` failure.
pub async fn backtrace(ctx: &SessionContext) -> Result<Vec<Value>, InspectorError> {
    let reply = ctx
        .debuggee
        .request(
            "backtrace",
            json!({
                "inlineRefs": true,
                "fromFrame": 0,
                "toFrame": ctx.config.debugger.stack_trace_limit,
            }),
        )
        .await?;
    let frames: Vec<Value> = reply
        .body
        .get("frames")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for id in frame_script_ids(&frames, &reply) {
        if let Err(e) = ctx.script(&id.to_string()).await {
            tracing::debug!(id, "cannot resolve frame script: {e}");
        }
    }

    Ok(frames
        .iter()
        .map(|frame| to_call_frame(frame, &reply))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn continue_to_location_is_taken_once() {
        let state = PauseState::new();
        assert_eq!(state.replace_continue_to_location(Some(4)).await, None);
        assert_eq!(state.replace_continue_to_location(Some(9)).await, Some(4));
        assert_eq!(state.take_continue_to_location().await, Some(9));
        assert_eq!(state.take_continue_to_location().await, None);
    }

    #[tokio::test]
    async fn skip_all_flag_toggles() {
        let state = PauseState::new();
        assert!(!state.skip_all());
        state.set_skip_all(true);
        assert!(state.skip_all());
    }

    #[tokio::test]
    async fn last_paused_clears() {
        let state = PauseState::new();
        *state.last_paused.lock().await = Some(json!({"reason": "other"}));
        assert!(state.last_paused().await.is_some());
        state.clear_last_paused().await;
        assert!(state.last_paused().await.is_none());
    }
}
