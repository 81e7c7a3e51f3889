use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, merging, or validating the bridge
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file or directory could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// Failed to create the default config file.
    #[error("failed to create default config: {0}")]
    CreateDefault(String),

    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    Parse(String),

    /// A config value failed validation.
    #[error("validation error: {field}: {message}")]
    Validation {
        /// The dotted field path (e.g. `server.web_port`).
        field: String,
        /// Human-readable description of the violation.
        message: String,
    },

    /// An I/O error occurred while reading or writing config files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_display_contains_path_and_cause() {
        let err = ConfigError::Read {
            path: PathBuf::from("/tmp/spyglass/config.toml"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("/tmp/spyglass/config.toml"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn create_default_display_contains_reason() {
        let err = ConfigError::CreateDefault("permission denied".into());
        let msg = format!("{err}");
        assert!(msg.contains("permission denied"));
        assert!(msg.contains("failed to create default config"));
    }

    #[test]
    fn parse_display_contains_details() {
        let err = ConfigError::Parse("unexpected `=`".into());
        let msg = format!("{err}");
        assert!(msg.contains("unexpected `=`"));
        assert!(msg.contains("TOML parse error"));
    }

    #[test]
    fn validation_display_contains_field_and_message() {
        let err = ConfigError::Validation {
            field: "debugger.stack_trace_limit".into(),
            message: "must be 1–1000".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("debugger.stack_trace_limit"));
        assert!(msg.contains("must be 1–1000"));
        assert!(msg.contains("validation error"));
    }

    #[test]
    fn io_error_display_contains_inner() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = ConfigError::from(inner);
        let msg = format!("{err}");
        assert!(msg.contains("file missing"));
    }
}
