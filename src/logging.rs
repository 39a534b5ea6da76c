//! Structured logging with `tracing`.
//!
//! The filter comes from the `DOCENT_LOG` environment variable when set,
//! otherwise from `[logging].level`. Output goes to stderr so that command
//! output on stdout stays machine-readable.

use anyhow::{bail, Result};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "DOCENT_LOG";

/// Install the global subscriber. Calling it twice is an error reported by
/// `tracing-subscriber`; callers run it once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    parse_log_level(&config.level)?;
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Layer types differ between formats, so each branch builds its own registry.
    if config.json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr);
        Registry::default().with(filter).with(layer).try_init()?;
    } else {
        let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
        Registry::default().with(filter).with(layer).try_init()?;
    }
    Ok(())
}

/// Parse a log level string into a `tracing` level.
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => bail!(
            "Invalid log level: {}. Use trace, debug, info, warn, or error",
            other
        ),
    }
}
