//! Request correlation.
//!
//! Tracks pending requests by sequence number and routes each response to
//! the caller waiting on it via a oneshot channel. Responses whose sequence
//! number is not pending here belong to another subscriber of the same
//! connection and are ignored.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::V8Error;
use crate::protocol::{Reply, Response};

/// Outcome delivered to a waiting request.
pub type ReplyResult = Result<Reply, V8Error>;

struct Pending {
    command: String,
    tx: oneshot::Sender<ReplyResult>,
}

/// Pending-request store for one debuggee client.
#[derive(Default)]
pub struct Correlation {
    pending: HashMap<i64, Pending>,
    closed: Option<String>,
}

impl Correlation {
    /// Create an empty, open store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the receiver its reply arrives on.
    ///
    /// # Errors
    ///
    /// Returns `V8Error::Disconnected` with the cached reason once the store
    /// has been closed by [`reject_all`](Self::reject_all).
    pub fn register(
        &mut self,
        seq: i64,
        command: &str,
    ) -> Result<oneshot::Receiver<ReplyResult>, V8Error> {
        if let Some(reason) = &self.closed {
            return Err(V8Error::Disconnected(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            seq,
            Pending {
                command: command.to_string(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Forget a registered request whose frame never went out.
    pub fn cancel(&mut self, seq: i64) {
        self.pending.remove(&seq);
    }

    /// Route a response to its caller.
    ///
    /// Returns `false` when no request with that sequence number is pending.
    pub fn resolve(&mut self, response: Response) -> bool {
        let Some(pending) = self.pending.remove(&response.request_seq) else {
            tracing::trace!(seq = response.request_seq, "ignoring unmatched response");
            return false;
        };
        let outcome = if response.success {
            Ok(Reply::from(response))
        } else {
            Err(V8Error::Protocol {
                command: response.command.unwrap_or(pending.command),
                message: response
                    .message
                    .unwrap_or_else(|| "unknown debuggee error".to_string()),
            })
        };
        // The caller may have given up waiting.
        let _ = pending.tx.send(outcome);
        true
    }

    /// Fail one pending request with `error`.
    ///
    /// Returns `false` when no request with that sequence number is pending.
    pub fn reject(&mut self, seq: i64, error: V8Error) -> bool {
        let Some(pending) = self.pending.remove(&seq) else {
            return false;
        };
        let _ = pending.tx.send(Err(error));
        true
    }

    /// Reject every pending request and refuse new ones.
    pub fn reject_all(&mut self, reason: &str) {
        if self.closed.is_none() {
            self.closed = Some(reason.to_string());
        }
        for (_, pending) in self.pending.drain() {
            let _ = pending.tx.send(Err(V8Error::Disconnected(reason.to_string())));
        }
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(seq: i64, success: bool, body: serde_json::Value) -> Response {
        Response {
            request_seq: seq,
            success,
            command: None,
            body,
            message: (!success).then(|| "boom".to_string()),
            refs: Vec::new(),
            running: None,
        }
    }

    #[tokio::test]
    async fn resolve_routes_to_matching_request() {
        let mut store = Correlation::new();
        let rx = store.register(1, "version").unwrap();
        assert_eq!(store.pending_count(), 1);

        assert!(store.resolve(response(1, true, json!({"V8Version": "3.28"}))));
        assert_eq!(store.pending_count(), 0);

        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.body["V8Version"], "3.28");
    }

    #[tokio::test]
    async fn failed_response_rejects_with_command_name() {
        let mut store = Correlation::new();
        let rx = store.register(4, "evaluate").unwrap();
        store.resolve(response(4, false, json!(null)));
        match rx.await.unwrap() {
            Err(V8Error::Protocol { command, message }) => {
                assert_eq!(command, "evaluate");
                assert_eq!(message, "boom");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_response_is_ignored() {
        let mut store = Correlation::new();
        let _rx = store.register(1, "scripts").unwrap();
        assert!(!store.resolve(response(99, true, json!({}))));
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn reverse_order_responses_reach_their_callers() {
        let mut store = Correlation::new();
        let receivers: Vec<_> = (1..=8)
            .map(|seq| store.register(seq, "evaluate").unwrap())
            .collect();
        for seq in (1..=8).rev() {
            assert!(store.resolve(response(seq, true, json!({ "value": seq }))));
        }
        for (i, rx) in receivers.into_iter().enumerate() {
            let reply = rx.await.unwrap().unwrap();
            assert_eq!(reply.body["value"], (i + 1) as i64);
        }
    }

    #[tokio::test]
    async fn reject_all_empties_store_and_refuses_new_requests() {
        let mut store = Correlation::new();
        let receivers: Vec<_> = (1..=5)
            .map(|seq| store.register(seq, "backtrace").unwrap())
            .collect();

        store.reject_all("socket closed");
        assert_eq!(store.pending_count(), 0);
        assert!(store.is_closed());

        for rx in receivers {
            let err = rx.await.unwrap().unwrap_err();
            assert!(matches!(err, V8Error::Disconnected(ref r) if r == "socket closed"));
        }

        let err = store.register(6, "continue").unwrap_err();
        assert_eq!(err.to_string(), "debuggee disconnected: socket closed");
    }

    #[test]
    fn cancel_removes_pending_entry() {
        let mut store = Correlation::new();
        let _rx = store.register(3, "suspend").unwrap();
        store.cancel(3);
        assert_eq!(store.pending_count(), 0);
    }
}
