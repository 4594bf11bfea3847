//! Test utilities for Varia.
//!
//! Available to the crate's own tests and, through the `test-utils` feature, to
//! the integration suite.

pub mod fixtures;

pub use fixtures::RecipeFixture;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Installs a test-writer subscriber once, no matter how often it is called.
/// With `None` the subscriber follows `RUST_LOG`; without `RUST_LOG` nothing is
/// installed.
///
/// ```rust,no_run
/// use tracing::Level;
///
/// varia_cli::test_utils::init_test_logging(None);
/// varia_cli::test_utils::init_test_logging(Some(Level::DEBUG));
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
