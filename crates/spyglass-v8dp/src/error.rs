//! V8DP error types.

use thiserror::Error;

/// Errors from debuggee connection and request operations.
#[derive(Debug, Error)]
pub enum V8Error {
    /// The socket never opened or has been closed; carries the cached reason.
    #[error("debuggee disconnected: {0}")]
    Disconnected(String),

    /// The debuggee answered with `success: false`.
    #[error("{command} failed: {message}")]
    Protocol {
        /// The command that failed.
        command: String,
        /// The debuggee's failure message.
        message: String,
    },

    /// A frame could not be parsed; the frame is dropped.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A well-formed frame carried an unexpected payload.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl V8Error {
    /// Whether this error means the connection is gone for good.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, V8Error::Disconnected(_) | V8Error::Io(_))
    }
}
