//! Shared helpers for stardag's integration tests.

pub mod builders;
pub mod fakes;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Longest a single executor scenario may take.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber once per test binary.
///
/// Honors `STARDAG_LOG` like the binary does, falling back to `info`.
/// Output is captured by the harness and shown for failing tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("STARDAG_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .init();
    });
}

/// Await `f`, failing the test if it outlives [`SCENARIO_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(SCENARIO_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("scenario did not finish within {SCENARIO_TIMEOUT:?}"),
    }
}
