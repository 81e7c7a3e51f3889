use spyglass_platform::HidePatterns;

use crate::config::Config;
use crate::error::ConfigError;

/// Validate a [`Config`], returning all detected violations.
///
/// Returns `Ok(())` when the config is valid, or `Err` with a
/// vector of every validation error found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.server.web_port == 0 {
        errors.push(ConfigError::Validation {
            field: "server.web_port".to_string(),
            message: "must not be 0".to_string(),
        });
    }

    if config.server.host.trim().is_empty() {
        errors.push(ConfigError::Validation {
            field: "server.host".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    let limit = config.debugger.stack_trace_limit;
    if limit == 0 || limit > 1000 {
        errors.push(ConfigError::Validation {
            field: "debugger.stack_trace_limit".to_string(),
            message: format!("must be 1\u{2013}1000, got {}", limit),
        });
    }

    let max_len = config.debugger.max_string_length;
    if max_len == 0 || max_len < -1 {
        errors.push(ConfigError::Validation {
            field: "debugger.max_string_length".to_string(),
            message: format!("must be \u{2265} 1 or -1 (unlimited), got {}", max_len),
        });
    }

    for (i, pattern) in config.debugger.hidden.iter().enumerate() {
        if let Err(e) = HidePatterns::new([pattern]) {
            errors.push(ConfigError::Validation {
                field: format!("debugger.hidden[{}]", i),
                message: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
