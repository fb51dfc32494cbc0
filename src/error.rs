//! Error types for the trust engine.

use thiserror::Error;

/// Result type alias for trust engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for trust engine operations
///
/// All variants are local, recoverable conditions returned to the caller.
/// Policy misconfiguration is deliberately not represented here: an
/// unhandled policy rule evaluates to `Undecided` and falls through to the
/// deny-by-default decision instead of raising an error.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted from a disallowed lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Out-of-range or malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown subject, session or profile id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Behavioral verification attempted without a usable baseline
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Optimistic-concurrency version mismatch at the storage boundary
    #[error("Version conflict: {0}")]
    Conflict(String),

    /// Storage boundary failure
    #[error("Storage error: {0}")]
    Storage(String),
}
