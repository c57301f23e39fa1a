//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A session identifier was not a valid UUID.
    #[error("Invalid session id: {value}")]
    InvalidSessionId { value: String },

    /// A scope key or value was empty.
    #[error("Invalid scope {field}: must not be empty")]
    EmptyScope { field: &'static str },

    /// A raw state discriminant did not map to a lifecycle state.
    #[error("Invalid session state discriminant: {0}")]
    InvalidState(u8),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
