//! Process-wide tracing setup shared by Arbiter binaries and tests.

use tracing_subscriber::EnvFilter;

/// Install the JSON tracing subscriber with env-filter support.
///
/// Reads `RUST_LOG` when set, defaulting to `info`. Returns an error if a
/// global subscriber is already installed.
pub fn init_tracing() -> crate::ArbiterResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .try_init()
        .map_err(|e| crate::ArbiterError::Config(format!("tracing init failed: {e}")))
}
