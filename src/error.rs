//! Error types for the maxmix-factors library.
//!
//! All errors use the `thiserror` crate for automatic trait implementations.
//! Every kind is local and non-retryable: it indicates a malformed factor or
//! a stale key, not a transient condition, and must surface directly to the
//! caller rather than being swallowed.

use thiserror::Error;

use crate::values::Key;

/// Main result type used throughout the maxmix-factors library.
pub type FactorResult<T> = Result<T, FactorError>;

/// Main error type for the maxmix-factors library.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactorError {
    /// A supplied variance is non-positive or a covariance matrix is not
    /// positive-definite. Raised at construction; construction fails
    /// atomically and no partially-initialized model is observable.
    #[error("invalid covariance: {0}")]
    InvalidCovariance(String),

    /// A factor was evaluated against a value container missing one of its
    /// required keys. Fatal for that evaluation: a factor cannot contribute
    /// a residual without its variables.
    #[error("unknown key {0}")]
    UnknownKey(Key),

    /// A required key is present but holds a different variable type than
    /// the factor expects. As fatal as an absent key.
    #[error("variable {key} holds a {actual}, expected a {expected}")]
    MismatchedValueType {
        key: Key,
        expected: &'static str,
        actual: &'static str,
    },

    /// A mixture factor was constructed with an empty detection list. There
    /// is no meaningful "no hypothesis" case for the max-mixture model; the
    /// solver must never receive a factor that cannot select a winner.
    #[error("degenerate mixture: {0}")]
    DegenerateMixture(String),
}
