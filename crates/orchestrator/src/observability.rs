//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins; `default_filter` applies otherwise. Safe to call once
/// per process.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
