//! Shared error type for vector/weight operations.

use thiserror::Error;

/// Errors produced by the core vector and weighting primitives.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Two vectors (or a vector and a weight vector) did not have matching length.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A tolerance or weight component was non-positive.
    #[error("invalid tolerance: {0}")]
    InvalidTolerance(f64),
}

pub type Result<T> = std::result::Result<T, Error>;
