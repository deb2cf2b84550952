use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when `RUST_LOG` is unset.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Subscriber for tests: output goes through the test harness capture
pub fn init_test_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("email_intelligence=debug"))
        .with_test_writer()
        .try_init();
}
