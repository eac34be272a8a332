//! Shared helpers for the `rewatch` integration tests: tracing setup,
//! timeouts, fakes for every session collaborator and config builders.

pub mod builders;
pub mod fakes;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

/// Upper bound for any single awaited step in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Install a test-captured tracing subscriber once per test binary.
///
/// Output only shows for failing tests unless run with `--nocapture`.
/// `RUST_LOG` overrides the default `rewatch=debug,info` filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("rewatch=debug,info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F: Future>(f: F) -> F::Output {
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(out) => out,
        Err(_) => panic!("test step timed out after {TEST_TIMEOUT:?}"),
    }
}

/// Assert that `f` does not complete within `window`.
pub async fn assert_pending<F: Future>(window: Duration, f: F) {
    if tokio::time::timeout(window, f).await.is_ok() {
        panic!("expected future to stay pending for {window:?}");
    }
}
