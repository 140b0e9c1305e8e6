//! Domain-level errors

use thiserror::Error;

/// Errors that can occur in the domain layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown provider category
    #[error("Invalid provider category: {0}")]
    InvalidCategory(String),

    /// Malformed provider identity
    #[error("Invalid provider identity: {0}")]
    InvalidProviderIdentity(String),

    /// Unknown audio format
    #[error("Unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    /// Validation failed
    #[error("Validation failed: {0}")]
    ValidationError(String),
}
