//! Core error definitions for the Arbiter coordination framework.
//!
//! This crate provides the foundational types shared across the Arbiter
//! workspace: the unified error enum and the result alias every other
//! crate builds on.
//!
//! # Main types
//!
//! - [`ArbiterError`] — Unified error enum for all Arbiter subsystems.
//! - [`ArbiterResult`] — Convenience alias for `Result<T, ArbiterError>`.

/// Tracing subscriber setup.
pub mod telemetry;

use thiserror::Error;

/// Convenience alias for results produced anywhere in the Arbiter workspace.
pub type ArbiterResult<T> = Result<T, ArbiterError>;

/// Top-level error type for the Arbiter coordination core.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum ArbiterError {
    /// An error from the workload distributor or its task queue.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// An error from the decision aggregation engine.
    #[error("Consensus error: {0}")]
    Consensus(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error (config file loading and the like).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArbiterError::Dispatch("queue full".into());
        assert_eq!(err.to_string(), "Dispatch error: queue full");

        let err = ArbiterError::Config("bad threshold".into());
        assert_eq!(err.to_string(), "Config error: bad threshold");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ArbiterError = json_err.into();
        assert!(matches!(err, ArbiterError::Json(_)));
    }
}
