//! Test collaborators for spool integration tests.
//!
//! Provides a request-capturing HTTP server for observing outbound
//! deliveries and a manager for throwaway SQLite stores.

use tracing_subscriber::EnvFilter;

pub mod http;
pub mod temp;

pub use http::{CaptureServer, CapturedRequest};
pub use temp::TempStores;

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to `warn` with debug output from the
/// spool crates. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,spool_core=debug,spool_dispatch=debug")),
        )
        .with_test_writer()
        .try_init();
}
