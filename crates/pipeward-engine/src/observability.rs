//! Tracing bootstrap.
//!
//! The level filter sits behind a reload handle so the effective level can
//! follow a configuration change without restarting the engine.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Installs the subscriber at an explicit level.
pub fn init_tracing_with_level(level: &str) {
    let (layer, handle) = reload::Layer::new(EnvFilter::new(level));
    let _ = FILTER_HANDLE.set(handle);
    let _ = tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer())
        .try_init();
}

/// Installs the subscriber from the logging section of the engine config.
pub fn init_from_config(logging: &LoggingConfig) {
    init_tracing_with_level(&logging.level);
}

/// Swaps the active level filter at runtime.
///
/// A no-op until the subscriber has been installed.
pub fn apply_logging_level(level: &str) {
    if let Some(handle) = FILTER_HANDLE.get() {
        let _ = handle.modify(|filter| *filter = EnvFilter::new(level));
    }
}
