//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the given level (or the configured
//! `host.logger.min_level`) is used.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber.
///
/// Returns false when a subscriber was already installed (tests install
/// their own, embedding applications may too).
pub fn init_tracing(default_level: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.to_ascii_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Same as [`init_tracing`], with the level read from the configuration.
#[cfg(feature = "ppconfig")]
pub fn init_tracing_from_config(config: &ppconfig::Config) -> bool {
    let level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "info".to_string());
    init_tracing(&level)
}
