use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose; includes every V8DP frame.
    Trace,
    /// Debug messages.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Lower-case name, as accepted by `tracing` filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Where the bridge listens and which debuggee it talks to by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host the WebSocket listener binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the WebSocket listener binds to.
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    /// V8DP port used when the UI URL does not name one.
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_web_port() -> u16 {
    8080
}
fn default_debug_port() -> u16 {
    5858
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            web_port: default_web_port(),
            debug_port: default_debug_port(),
        }
    }
}

/// Debugger behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebuggerConfig {
    /// Maximum number of call frames fetched per pause (1–1000).
    #[serde(default = "default_stack_trace_limit")]
    pub stack_trace_limit: u32,
    /// String length cap applied to every debuggee request (-1 = unlimited).
    #[serde(default = "default_max_string_length")]
    pub max_string_length: i64,
    /// Regular expressions; scripts whose path matches are hidden.
    #[serde(default)]
    pub hidden: Vec<String>,
    /// List application files before the debuggee loads them.
    #[serde(default = "default_true")]
    pub preload: bool,
    /// Write `Debugger.setScriptSource` edits back to disk.
    #[serde(default)]
    pub save_live_edit: bool,
}

fn default_stack_trace_limit() -> u32 {
    50
}
fn default_max_string_length() -> i64 {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            stack_trace_limit: default_stack_trace_limit(),
            max_string_length: default_max_string_length(),
            hidden: Vec::new(),
            preload: true,
            save_live_edit: false,
        }
    }
}

/// Which domains may extend the debuggee through code injection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectConfig {
    /// Master switch for the injector handshake.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Console domain.
    #[serde(default = "default_true")]
    pub console: bool,
    /// Network domain.
    #[serde(default = "default_true")]
    pub network: bool,
    /// Profiler and HeapProfiler domains.
    #[serde(default = "default_true")]
    pub profiles: bool,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            console: true,
            network: true,
            profiles: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Optional path to a log file.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listener and default debuggee.
    #[serde(default)]
    pub server: ServerConfig,
    /// Debugger behaviour.
    #[serde(default)]
    pub debugger: DebuggerConfig,
    /// Injection switches.
    #[serde(default)]
    pub inject: InjectConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}
