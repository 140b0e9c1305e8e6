//! Circuit breaker pattern for provider calls
//!
//! Prevents cascading failures when a provider keeps failing.
//!
//! # States
//!
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Provider is down, requests fail fast without calling it
//! - **Half-Open**: Trial calls decide whether the provider recovered
//!
//! Transitions are Closed → Open, Open → Half-Open and Half-Open → Closed or
//! Open. A Closed breaker never moves to Half-Open directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use application::resilience::CircuitBreaker;
//!
//! let cb = CircuitBreaker::new("stt:openai");
//! let result = cb.call(|| async {
//!     provider.transcribe(&session, &audio, "en").await
//! }).await;
//! ```

use std::{
    fmt,
    future::Future,
    sync::atomic::{AtomicU8, AtomicU64, Ordering},
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_recovery_timeout_secs() -> u64 {
    60
}

const fn default_call_timeout_secs() -> u64 {
    30
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes needed to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Seconds after the last failure before an open circuit admits a trial call
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Deadline for a single call in seconds; a timeout counts as failure
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Lower thresholds for providers that should be dropped quickly
    #[must_use]
    pub const fn sensitive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout_secs: 15,
            call_timeout_secs: 10,
        }
    }

    /// Higher thresholds for providers with occasional hiccups
    #[must_use]
    pub const fn resilient() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 3,
            recovery_timeout_secs: 120,
            call_timeout_secs: 60,
        }
    }

    /// Creates a custom configuration
    #[must_use]
    pub const fn custom(
        failure_threshold: u32,
        success_threshold: u32,
        recovery_timeout_secs: u64,
        call_timeout_secs: u64,
    ) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            recovery_timeout_secs,
            call_timeout_secs,
        }
    }

    /// Recovery timeout as a duration
    #[must_use]
    pub const fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    /// Call timeout as a duration
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Provider is down, requests fail fast
    Open,
    /// Testing if the provider has recovered
    HalfOpen,
}

impl CircuitState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Error returned when the circuit is open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    /// Name of the guarded provider
    pub service_name: String,
}

impl std::error::Error for CircuitOpenError {}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circuit breaker open for '{}': provider is temporarily unavailable",
            self.service_name
        )
    }
}

/// Point-in-time view of a breaker for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Wall-clock time of the most recent failure
    pub last_failure_at: Option<DateTime<Utc>>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Sentinel for "no failure recorded yet"
const NO_FAILURE: u64 = u64::MAX;

/// Circuit breaker guarding a single provider
///
/// The hot-path check [`CircuitBreaker::is_available`] reads two atomics and
/// only takes the lock when an open circuit is due for its half-open trial.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    epoch: Instant,
    state_hint: AtomicU8,
    last_failure_ms: AtomicU64,
    state: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with default configuration
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Creates a new circuit breaker with custom configuration
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            epoch: Instant::now(),
            state_hint: AtomicU8::new(CircuitState::Closed.as_u8()),
            last_failure_ms: AtomicU64::new(NO_FAILURE),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Returns the name of this circuit breaker
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state without triggering any transition
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_hint.load(Ordering::Acquire))
    }

    /// Whether a call may be attempted now
    ///
    /// Closed and half-open circuits are available. An open circuit becomes
    /// available (and half-open) once the recovery timeout has elapsed since
    /// the last recorded failure.
    pub fn is_available(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if !self.recovery_elapsed() {
                    return false;
                }
                self.try_half_open()
            },
        }
    }

    /// Whether a call would be admitted now, without changing state
    ///
    /// An open circuit past its recovery timeout reports `true` but stays open
    /// until a real call claims the half-open trial through
    /// [`CircuitBreaker::is_available`].
    #[must_use]
    pub fn would_admit(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => self.recovery_elapsed(),
        }
    }

    fn millis_since_epoch(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX - 1)
    }

    fn recovery_elapsed(&self) -> bool {
        let last = self.last_failure_ms.load(Ordering::Acquire);
        if last == NO_FAILURE {
            return true;
        }
        let recovery_ms =
            u64::try_from(self.config.recovery_timeout().as_millis()).unwrap_or(u64::MAX);
        self.millis_since_epoch().saturating_sub(last) >= recovery_ms
    }

    fn try_half_open(&self) -> bool {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Open => {
                // Re-check under the lock; a failure may have landed meanwhile
                if !self.recovery_elapsed() {
                    return false;
                }
                info!(
                    provider = %self.name,
                    "Circuit transitioning from Open to HalfOpen"
                );
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                self.state_hint
                    .store(CircuitState::HalfOpen.as_u8(), Ordering::Release);
                true
            },
            CircuitState::Closed | CircuitState::HalfOpen => true,
        }
    }

    /// Records a successful call
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.failure_count = 0;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    info!(
                        provider = %self.name,
                        successes = state.success_count,
                        "Circuit transitioning from HalfOpen to Closed"
                    );
                    state.state = CircuitState::Closed;
                    state.success_count = 0;
                    self.state_hint
                        .store(CircuitState::Closed.as_u8(), Ordering::Release);
                    metrics::counter!(
                        "voicerelay_circuit_transitions_total",
                        "provider" => self.name.clone(),
                        "to" => "closed"
                    )
                    .increment(1);
                }
            },
            CircuitState::Closed | CircuitState::Open => {},
        }
    }

    /// Records a failed call
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.success_count = 0;
        state.last_failure_at = Some(Utc::now());
        self.last_failure_ms
            .store(self.millis_since_epoch(), Ordering::Release);

        let open = match state.state {
            CircuitState::Closed => {
                let reached = state.failure_count >= self.config.failure_threshold;
                if reached {
                    warn!(
                        provider = %self.name,
                        failures = state.failure_count,
                        "Circuit transitioning from Closed to Open"
                    );
                }
                reached
            },
            CircuitState::HalfOpen => {
                warn!(
                    provider = %self.name,
                    "Circuit transitioning from HalfOpen to Open after failure"
                );
                true
            },
            CircuitState::Open => false,
        };

        if open {
            state.state = CircuitState::Open;
            self.state_hint
                .store(CircuitState::Open.as_u8(), Ordering::Release);
            metrics::counter!(
                "voicerelay_circuit_transitions_total",
                "provider" => self.name.clone(),
                "to" => "open"
            )
            .increment(1);
        }
    }

    /// Snapshot for health reporting
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.lock();
        CircuitBreakerSnapshot {
            state: state.state,
            consecutive_failures: state.failure_count,
            last_failure_at: state.last_failure_at,
        }
    }

    /// Calls an async operation through the circuit breaker
    ///
    /// If the circuit is unavailable the operation is never invoked. Otherwise
    /// it runs under the configured call timeout and its outcome is recorded
    /// before this returns.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Debug,
    {
        if !self.is_available() {
            debug!(
                provider = %self.name,
                "Circuit breaker preventing call to provider"
            );
            return Err(CircuitBreakerError::CircuitOpen(CircuitOpenError {
                service_name: self.name.clone(),
            }));
        }

        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(result)) => {
                self.record_success();
                Ok(result)
            },
            Ok(Err(e)) => {
                debug!(provider = %self.name, error = ?e, "Provider call failed");
                self.record_failure();
                Err(CircuitBreakerError::ServiceError(e))
            },
            Err(_) => {
                warn!(
                    provider = %self.name,
                    timeout_ms = timeout.as_millis(),
                    "Provider call timed out"
                );
                self.record_failure();
                Err(CircuitBreakerError::Timeout(timeout))
            },
        }
    }
}

/// Error type for circuit breaker operations
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open, preventing the call
    CircuitOpen(CircuitOpenError),
    /// The call exceeded the configured deadline
    Timeout(Duration),
    /// The underlying provider returned an error
    ServiceError(E),
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen(e) => write!(f, "{e}"),
            Self::Timeout(d) => write!(f, "call timed out after {}ms", d.as_millis()),
            Self::ServiceError(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CircuitOpen(e) => Some(e),
            Self::Timeout(_) => None,
            Self::ServiceError(e) => Some(e),
        }
    }
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if this is a circuit open error
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Returns true if the call timed out
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if this is a service error
    #[must_use]
    pub const fn is_service_error(&self) -> bool {
        matches!(self, Self::ServiceError(_))
    }

    /// Converts the inner service error if present
    #[must_use]
    pub fn into_service_error(self) -> Option<E> {
        match self {
            Self::ServiceError(e) => Some(e),
            Self::CircuitOpen(_) | Self::Timeout(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn breaker(threshold: u32, successes: u32) -> CircuitBreaker {
        CircuitBreaker::with_config("stt:test", CircuitBreakerConfig::custom(threshold, successes, 60, 30))
    }

    #[test]
    fn circuit_breaker_creation() {
        let cb = CircuitBreaker::new("tts:openai");
        assert_eq!(cb.name(), "tts:openai");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_available());
    }

    #[test]
    fn circuit_breaker_debug() {
        let cb = CircuitBreaker::new("stt:google");
        let debug = format!("{cb:?}");
        assert!(debug.contains("CircuitBreaker"));
        assert!(debug.contains("stt:google"));
    }

    #[test]
    fn circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
    }

    #[test]
    fn config_default() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.recovery_timeout(), Duration::from_secs(60));
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"failure_threshold": 3}"#).unwrap();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.recovery_timeout_secs, 60);
    }

    #[test]
    fn config_presets() {
        assert_eq!(CircuitBreakerConfig::sensitive().failure_threshold, 3);
        assert_eq!(CircuitBreakerConfig::resilient().failure_threshold, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_until_recovery_timeout() {
        let cb = breaker(5, 1);

        for _ in 0..4 {
            cb.record_failure();
            assert!(cb.is_available());
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_available());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!cb.is_available());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.is_available());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn would_admit_never_changes_state() {
        let cb = breaker(1, 1);
        cb.record_failure();
        assert!(!cb.would_admit());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.would_admit());
        assert!(cb.would_admit());
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.is_available());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_immediately() {
        let cb = breaker(5, 1);
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cb.is_available());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_success_threshold() {
        let cb = breaker(2, 2);
        cb.record_failure();
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.is_available());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn success_resets_failure_count_when_closed() {
        let cb = breaker(3, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }

    #[test]
    fn snapshot_records_last_failure_time() {
        let cb = breaker(3, 1);
        assert!(cb.snapshot().last_failure_at.is_none());
        cb.record_failure();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.consecutive_failures, 1);
        assert!(snapshot.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn call_succeeds_when_closed() {
        let cb = CircuitBreaker::new("stt:test");
        let result = cb.call(|| async { Ok::<_, String>("success") }).await;
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn call_returns_service_error() {
        let cb = CircuitBreaker::new("stt:test");
        let result = cb
            .call(|| async { Err::<(), _>("boom".to_string()) })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_service_error());
        assert_eq!(err.into_service_error(), Some("boom".to_string()));
    }

    #[tokio::test]
    async fn open_circuit_never_invokes_operation() {
        let cb = breaker(1, 1);
        cb.record_failure();

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let result = cb
            .call(|| async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let cb = CircuitBreaker::with_config(
            "tts:slow",
            CircuitBreakerConfig::custom(1, 1, 60, 1),
        );

        let result = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn concurrent_failures_open_exactly_once() {
        let cb = Arc::new(breaker(10, 1));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let cb = Arc::clone(&cb);
            handles.push(tokio::spawn(async move { cb.record_failure() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().consecutive_failures, 20);
    }

    #[test]
    fn circuit_open_error_display() {
        let err = CircuitOpenError {
            service_name: "stt:openai".to_string(),
        };
        assert!(err.to_string().contains("stt:openai"));
        assert!(err.to_string().contains("temporarily unavailable"));
    }
}
