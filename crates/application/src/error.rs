//! Application-level errors
//!
//! Component-local failures (cache errors, a single provider attempt, an open
//! circuit) are absorbed by the next layer and turned into a skip or a miss.
//! Only chain exhaustion, lifecycle misuse and configuration problems reach the
//! caller of the orchestrator.

use std::fmt;

use domain::{DomainError, ProviderCategory};
use thiserror::Error;

use crate::ports::ProviderError;

/// One provider tried during a fallback walk and the error it ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    /// Provider name
    pub provider: String,
    /// Last error reported for that provider
    pub error: String,
}

impl ProviderAttempt {
    /// Create a new attempt record
    pub fn new(provider: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            provider: provider.into(),
            error: error.to_string(),
        }
    }
}

impl fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

fn format_attempts(attempts: &[ProviderAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur in the application layer
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// Domain-level error
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Invalid or missing settings, fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider skipped because its circuit breaker is open
    #[error("Circuit breaker open for provider '{provider}'")]
    CircuitOpen {
        /// Provider identity (`category:name`)
        provider: String,
    },

    /// A single provider attempt failed
    #[error("Provider '{provider}' call failed: {source}")]
    ProviderCall {
        /// Provider identity (`category:name`)
        provider: String,
        /// Error reported by the provider
        #[source]
        source: ProviderError,
    },

    /// A single provider attempt exceeded its deadline
    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Provider identity (`category:name`)
        provider: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Every retry of one provider failed
    #[error("Provider '{provider}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Provider identity (`category:name`)
        provider: String,
        /// Number of attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },

    /// No connection slot became free in time
    #[error("Connection pool for provider '{provider}' exhausted")]
    PoolExhausted {
        /// Provider identity (`category:name`)
        provider: String,
    },

    /// The whole fallback chain was walked without success
    #[error("All {category} providers failed: {}", format_attempts(.attempts))]
    AllProvidersFailed {
        /// Category of the failed operation
        category: ProviderCategory,
        /// Attempted providers in chain order
        attempts: Vec<ProviderAttempt>,
    },

    /// The chain was empty before any provider could be tried
    #[error("No {category} providers available")]
    NoProvidersAvailable {
        /// Category of the requested operation
        category: ProviderCategory,
    },

    /// Cache backend failure; degraded to a miss or a no-op by callers
    #[error("Cache error: {0}")]
    Cache(String),

    /// Orchestrator used before `initialize()` completed
    #[error("Voice orchestrator is not initialized")]
    NotInitialized,

    /// Lifecycle operation not allowed in the current state
    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),

    /// Component has been shut down
    #[error("Shutting down: {0}")]
    ShuttingDown(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApplicationError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::PoolExhausted { .. } => true,
            Self::ProviderCall { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Generic message suitable for end users
    ///
    /// Never includes provider names or vendor error text.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotInitialized | Self::InvalidState(_) | Self::ShuttingDown(_) => {
                "The voice service is not ready. Please try again shortly."
            },
            Self::AllProvidersFailed { .. }
            | Self::NoProvidersAvailable { .. }
            | Self::CircuitOpen { .. }
            | Self::PoolExhausted { .. } => {
                "The voice service is temporarily unavailable. Please try again later."
            },
            _ => "The voice request could not be processed.",
        }
    }

    /// Provider names attempted during a failed fallback walk, in order
    pub fn attempted_providers(&self) -> Vec<&str> {
        match self {
            Self::AllProvidersFailed { attempts, .. } => {
                attempts.iter().map(|a| a.provider.as_str()).collect()
            },
            _ => Vec::new(),
        }
    }

    /// Stable short code for logs and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain",
            Self::Configuration(_) => "configuration",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::ProviderCall { .. } => "provider_call",
            Self::Timeout { .. } => "timeout",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::AllProvidersFailed { .. } => "all_providers_failed",
            Self::NoProvidersAvailable { .. } => "no_providers_available",
            Self::Cache(_) => "cache",
            Self::NotInitialized => "not_initialized",
            Self::InvalidState(_) => "invalid_state",
            Self::ShuttingDown(_) => "shutting_down",
            Self::Internal(_) => "internal",
        }
    }
}
