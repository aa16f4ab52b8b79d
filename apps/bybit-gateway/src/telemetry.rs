//! Tracing Setup
//!
//! Console logging through `tracing-subscriber`. `RUST_LOG` overrides the
//! configured level; the configured format picks JSON lines or pretty output.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bybit_gateway={},warn", config.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    let installed = if config.format == "pretty" {
        builder.pretty().try_init()
    } else {
        builder.json().with_current_span(false).try_init()
    };
    installed.is_ok()
}
