//! Tracing subscriber setup.
//!
//! Reads the `logger` section:
//!
//! - `level`: default filter when `RUST_LOG` is unset (`info` if absent)
//! - `format`: `text` (default) or `json`

use taskbus_config::ConfigSection;
use tracing_subscriber::EnvFilter;

/// Default filter directive.
pub const DEFAULT_LEVEL: &str = "info";

/// Install the global subscriber described by `config`.
///
/// Returns `false` when a subscriber was already installed, so calling it
/// twice is harmless.
pub fn init(config: &ConfigSection) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(config));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match config.get_str("format") {
        Some("json") => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.is_ok()
}

fn filter_for(config: &ConfigSection) -> EnvFilter {
    let level = config.get_string_or("level", DEFAULT_LEVEL);
    EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}
