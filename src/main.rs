use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spyglass_config::{load_config, Config};
use spyglass_platform::logging::{
    ensure_log_dir, log_file_path, log_level_to_filter, rotate_log_files, DEFAULT_MAX_LOG_FILES,
    DEFAULT_MAX_LOG_SIZE,
};
use spyglass_platform::paths::{DefaultPaths, PlatformPaths};

mod server;

/// Bridge a V8 debugger port to the Chrome DevTools front-end.
#[derive(Parser, Debug, Default, PartialEq)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port the WebSocket listener binds to.
    #[arg(long)]
    web_port: Option<u16>,

    /// V8 debugger port used when the UI URL names none.
    #[arg(long)]
    debug_port: Option<u16>,

    /// Host the WebSocket listener binds to.
    #[arg(long)]
    host: Option<String>,

    /// Directory holding config.toml (default: the platform config dir).
    #[arg(long = "config", value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Log to stderr instead of the log file.
    #[arg(long)]
    log_stderr: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.web_port {
            config.server.web_port = port;
        }
        if let Some(port) = self.debug_port {
            config.server.debug_port = port;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
    }
}

fn init_logging(config: &Config, paths: &DefaultPaths, to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level_to_filter(config.log.level.as_str())));

    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let log_path = config
        .log
        .file
        .clone()
        .unwrap_or_else(|| log_file_path(paths));
    ensure_log_dir(&log_path).context("failed to create log directory")?;
    rotate_log_files(&log_path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES)
        .context("failed to rotate log files")?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn run_bridge(args: Args) -> Result<()> {
    let paths = DefaultPaths::new().context("failed to detect platform paths")?;

    let config_dir = args.config_dir.clone().unwrap_or_else(|| paths.config_dir());
    let project_dir = env::current_dir().ok();
    let loaded = load_config(&config_dir, project_dir.as_deref());
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };
    args.apply(&mut config);

    init_logging(&config, &paths, args.log_stderr)?;
    if let Err(e) = loaded {
        error!("config load failed, using defaults: {}", e);
    }
    info!(
        host = %config.server.host,
        web_port = config.server.web_port,
        debug_port = config.server.debug_port,
        "starting spyglass"
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(server::serve(Arc::new(config)))
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run_bridge(args) {
        eprintln!("spyglass: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("spyglass").chain(args.iter().copied()))
    }

    #[test]
    fn flags_override_config() {
        let args = parse(&["--web-port", "9000", "--debug-port", "9229", "--host", "0.0.0.0"])
            .unwrap();
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.server.web_port, 9000);
        assert_eq!(config.server.debug_port, 9229);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn no_flags_keep_config() {
        let args = parse(&[]).unwrap();
        assert_eq!(args, Args::default());
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn config_dir_and_stderr() {
        let args = parse(&["--config", "/tmp/spy", "--log-stderr"]).unwrap();
        assert_eq!(args.config_dir, Some(PathBuf::from("/tmp/spy")));
        assert!(args.log_stderr);
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(parse(&["--web-port"]).is_err());
        assert!(parse(&["--web-port", "http"]).is_err());
        assert!(parse(&["--web-port", "70000"]).is_err());
        let err = parse(&["--verbose"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
