//! Tracing initialisation for tests.
//!
//! The subscriber writes through the test-harness writer so output is only
//! shown for failing tests (or with `--nocapture`), and is installed at most
//! once per process.

use tracing_subscriber::EnvFilter;

/// Install a test subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// ```ignore
/// #[tokio::test]
/// async fn rescan_logs() {
///     aflow_test_utils::init_test_tracing();
///     tracing::info!("captured by the harness");
/// }
/// ```
pub fn init_test_tracing() {
    init_test_tracing_with("info");
}

/// Install a test subscriber with `fallback` as the filter when `RUST_LOG`
/// is unset, e.g. `"aflow_core=debug"` to follow per-file hashing.
pub fn init_test_tracing_with(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
