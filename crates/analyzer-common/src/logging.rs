//! Structured logging setup shared by every binary.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs a JSON `tracing` subscriber honoring `RUST_LOG`, falling back
/// to `info` when unset. Call once at process start.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already installed (e.g. in tests that call init() repeatedly).
    }
}
