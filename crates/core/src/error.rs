//! Errors raised by aggregates and value constructors.
//!
//! A `DomainError` is always returned before an event is raised, so it never leaves a
//! partially mutated aggregate behind. Storage and dispatch failures live in the infra
//! crate.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input rejected by a constructor or mutator (blank name, illegal parent, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The aggregate is in a state that forbids the operation, e.g. it was deleted.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A tenant or aggregate id could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
