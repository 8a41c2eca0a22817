use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// Filter directive for the `-v` count, `None` when no flag was given.
fn verbosity_directive(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

/// Resolve the active filter. Precedence: `-v` flags, then `RUST_LOG`,
/// then `logging.level` from config.
fn build_filter(config: &LoggingConfig, verbose: u8) -> Result<EnvFilter> {
    if let Some(directive) = verbosity_directive(verbose) {
        return Ok(EnvFilter::new(directive));
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid logging.level '{}'", config.level))
}

/// Install the global subscriber. Logs go to stderr so stdout stays clean
/// for `--print-config` and `check`.
pub fn init(config: &LoggingConfig, verbose: u8) -> Result<()> {
    let filter = build_filter(config, verbose)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.context("failed to install tracing subscriber")
}
