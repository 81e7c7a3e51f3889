//! Inspector error types.

use spyglass_v8dp::V8Error;
use thiserror::Error;

/// JSON-RPC code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC code for bad parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC code for every other server-side failure.
pub const SERVER_ERROR: i64 = -32000;

/// Errors answered to the UI as CDP error responses.
#[derive(Debug, Error)]
pub enum InspectorError {
    /// The debuggee connection is gone.
    #[error("debuggee detached: {0}")]
    Detached(String),

    /// The debuggee rejected a command.
    #[error("{0}")]
    Protocol(String),

    /// The method is unknown to this backend.
    #[error("'{0}' wasn't found")]
    NotImplemented(String),

    /// Code injection for the domain is switched off.
    #[error("{0} is unavailable: code injection is disabled")]
    InjectionDisabled(String),

    /// The injector handshake or payload failed.
    #[error("{domain} is unavailable: {reason}")]
    InjectionFailed {
        /// Domain that depends on the injection.
        domain: String,
        /// What went wrong.
        reason: String,
    },

    /// A live edit could not be written back.
    #[error("live edit rejected: {0}")]
    LiveEditRejected(String),

    /// Command parameters are missing or malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// No script with that id is known or can be fetched.
    #[error("unknown script id {0}")]
    UnknownScript(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InspectorError {
    /// CDP error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            InspectorError::NotImplemented(_) => METHOD_NOT_FOUND,
            InspectorError::InvalidParams(_) => INVALID_PARAMS,
            _ => SERVER_ERROR,
        }
    }
}

impl From<V8Error> for InspectorError {
    fn from(err: V8Error) -> Self {
        match err {
            V8Error::Disconnected(reason) => InspectorError::Detached(reason),
            V8Error::Io(e) => InspectorError::Detached(e.to_string()),
            V8Error::Protocol { message, .. } => InspectorError::Protocol(message),
            other => InspectorError::Protocol(other.to_string()),
        }
    }
}
