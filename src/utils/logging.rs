/// Tracing subscriber setup
use anyhow::{anyhow, Result};
use clap::ValueEnum;
use tracing_subscriber::{fmt, EnvFilter};

/// Used when RUST_LOG is not set
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Install the global subscriber. Logs go to stderr, stdout carries the
/// progress markers and the summary.
pub fn init_logging(format: LogFormat, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { DEFAULT_LOG_LEVEL };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.compact().try_init(),
    }
    .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
