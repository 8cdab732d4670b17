//! Error types for kinfit

use thiserror::Error;

/// kinfit error type
#[derive(Error, Debug)]
pub enum Error {
    /// Validation error: bad input or a violated precondition.
    /// No state has been advanced when this is returned.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error: numerical infrastructure failure
    /// (distinct from a degraded-but-completed fit, which is data).
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
