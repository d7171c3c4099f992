//! Tracing subscriber setup for library consumers.

use tracing_subscriber::EnvFilter;

/// Install a global tracing subscriber with a sensible default filter.
///
/// `RUST_LOG` takes precedence over the given default when set. Safe to call
/// more than once; later calls are no-ops if a subscriber is already
/// installed.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
