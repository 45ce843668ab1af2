//! Tracing bootstrap for demos and tests.
//!
//! Entity control tasks and I/O pumps log connection lifecycle,
//! reconnect attempts, and pump traffic under the `longeron` and
//! `longeron_core` targets. This helper installs a fmt subscriber
//! scoped to those targets so a failing test run can be inspected
//! without wiring a subscriber by hand.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber for test and demo runs.
///
/// An explicit `RUST_LOG` takes precedence; without one, only the
/// library's own lifecycle logging is enabled at debug level.
/// Repeated calls (one per test in a binary) are harmless: later
/// installation attempts are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("longeron=debug,longeron_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
