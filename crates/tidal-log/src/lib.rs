// ABOUTME: Shared logging setup for tidal binaries
// ABOUTME: init() for the default INFO level, init_with_level() for --verbose runs

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    init_with_level(Level::INFO);
}

/// Logging to stderr at the given default level. RUST_LOG still overrides it.
/// Safe to call more than once; later calls are ignored.
pub fn init_with_level(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(false)
        .try_init();
}

fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.into())
}
