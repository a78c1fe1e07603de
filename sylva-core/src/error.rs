//! Structured error types for the sylva workspace.

use thiserror::Error;

/// Unified error type for all sylva operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SylvaError {
    /// Invalid input (bad weights, empty candidate pools, out-of-range indices)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Cache protocol violation (restore without cache, double cache).
    ///
    /// Signals that the perturb/accept/reject contract was broken by the
    /// caller. A chain that sees this error cannot continue.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

impl SylvaError {
    /// Whether this error is a cache protocol violation.
    pub fn is_protocol(&self) -> bool {
        matches!(self, SylvaError::Protocol(_))
    }
}

/// Convenience alias used throughout the sylva workspace.
pub type Result<T> = std::result::Result<T, SylvaError>;
