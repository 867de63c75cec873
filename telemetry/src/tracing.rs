use std::sync::Once;

use config::Environment;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used for tests when `RUST_LOG` is unset.
const TEST_DEFAULT_FILTER: &str = "etl=debug,merger=debug";

static TEST_TRACING: Once = Once::new();

/// Installs the global tracing subscriber for a service.
///
/// `RUST_LOG` takes precedence over `default_filter`. Production deployments log JSON
/// lines; other environments use the human-readable formatter.
pub fn init_tracing(environment: Environment, default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if environment.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    }
}

/// Installs a test writer subscriber once per test binary.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(TEST_DEFAULT_FILTER));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
