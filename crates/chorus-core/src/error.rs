//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Inbound message exceeds the configured size limit
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Connection id string could not be parsed
    #[error("Invalid connection id: {value}")]
    InvalidConnectionId { value: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
