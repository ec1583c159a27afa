//! Logging setup for the binary
//!
//! Events go to stderr so `--json` reports on stdout stay machine-readable.
//! The filter comes from `STAGEHAND_LOG`, then `RUST_LOG`, then the default
//! level.

use std::env;
use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Primary filter variable
pub const LOG_ENV: &str = "STAGEHAND_LOG";

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// JSON lines
    Json,
}

/// Filter directives: explicit env setting, else `level` for this crate with
/// chatty dependencies held at `warn`.
fn filter_directives(level: &str) -> String {
    if let Some(from_env) = env::var(LOG_ENV)
        .ok()
        .or_else(|| env::var("RUST_LOG").ok())
        .filter(|s| !s.trim().is_empty())
    {
        return from_env;
    }
    [
        level.to_string(),
        "reqwest=warn".to_string(),
        "hyper=warn".to_string(),
        "rustls=warn".to_string(),
    ]
    .join(",")
}

/// Install the global subscriber.
pub fn init_logging(verbose: bool, format: LogFormat) -> Result<(), String> {
    let level = if verbose { "debug" } else { "info" };
    let directives = filter_directives(level);
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| format!("invalid log filter '{}': {}", directives, e))?;

    let layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| format!("logging already initialized: {}", e))
}
