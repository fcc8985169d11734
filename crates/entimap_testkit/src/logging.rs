//! Tracing setup for tests.

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once.
///
/// Honors `RUST_LOG`; defaults to `entimap_core=debug`. Output goes through
/// the test harness writer so it only shows for failing tests.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("entimap_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
