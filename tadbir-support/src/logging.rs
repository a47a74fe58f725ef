//! Tracing subscriber bootstrap.
//!
//! The runtime itself only emits `tracing` events. Applications (and tests
//! that want to see those events) install a subscriber once at startup.

use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "tadbir_container=info";

/// Installs a global fmt subscriber filtered by `RUST_LOG`, or by
/// `default_directive` when the variable is missing or invalid.
///
/// Returns `false` if a global subscriber was already installed, which makes
/// it safe to call from every test.
///
/// # Examples
/// ```
/// use tadbir_support::logging::{init_tracing, DEFAULT_DIRECTIVE};
///
/// let _ = init_tracing(DEFAULT_DIRECTIVE);
/// // Second call is a no-op.
/// assert!(!init_tracing(DEFAULT_DIRECTIVE));
/// ```
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
