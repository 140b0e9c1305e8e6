//! Resilience primitives for provider calls
//!
//! Circuit breaking, retry with backoff, and the connection manager that
//! composes both around pooled provider sessions.

pub mod circuit_breaker;
pub mod connection_manager;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerSnapshot,
    CircuitOpenError, CircuitState,
};
pub use connection_manager::{
    ConnectionConfig, ConnectionManager, ConnectionStats, ProviderConnection, ProviderSession,
};
pub use retry::{BackoffStrategy, JITTER_FACTOR, RetryPolicy, RetryResult, Retryable, with_retry};
