use thiserror::Error;

/// Errors that can occur during platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("path error: {0}")]
    Path(String),

    #[error("invalid hide pattern '{pattern}': {detail}")]
    Pattern { pattern: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
