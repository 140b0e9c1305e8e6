//! Connection manager - Pooled, retried, breaker-guarded provider calls
//!
//! Each provider identity lazily gets its own [`ProviderConnection`]: an HTTP
//! client with a keep-alive pool, a semaphore bounding in-flight calls, a
//! circuit breaker and a metrics record. All of it is per provider; there is
//! no global lock on the call path.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use domain::ProviderIdentity;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, time::Instant};
use tracing::{debug, info, instrument, warn};

use super::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError},
    retry::{RetryPolicy, Retryable, with_retry},
};
use crate::{error::ApplicationError, ports::ProviderError};

const fn default_max_connections() -> usize {
    20
}

const fn default_max_idle_per_host() -> usize {
    10
}

const fn default_idle_timeout_secs() -> u64 {
    90
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_acquire_timeout_secs() -> u64 {
    30
}

/// Pool, retry and breaker settings for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Maximum concurrent in-flight calls
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle keep-alive connections retained per host
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
    /// Seconds before an idle keep-alive connection is closed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// TCP/TLS connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds to wait for a free slot before giving up
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Retry budget and backoff
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Circuit breaker thresholds
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Replace the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the circuit breaker configuration
    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Replace the in-flight call limit
    #[must_use]
    pub const fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Replace the acquire timeout
    #[must_use]
    pub const fn with_acquire_timeout_secs(mut self, secs: u64) -> Self {
        self.acquire_timeout_secs = secs;
        self
    }

    /// Acquire timeout as a duration
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Provider-scoped transport handed to each call attempt
#[derive(Clone)]
pub struct ProviderSession {
    identity: ProviderIdentity,
    client: reqwest::Client,
    attempt: u32,
}

impl fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSession")
            .field("identity", &self.identity)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl ProviderSession {
    /// Provider this session belongs to
    pub const fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    /// Pooled HTTP client for this provider
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// 1-based attempt number within the current `execute` call
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Snapshot of per-provider call metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    /// Attempts made
    pub total_requests: u64,
    /// Attempts that succeeded
    pub successful_requests: u64,
    /// Attempts that failed with a provider error
    pub failed_requests: u64,
    /// Attempts that hit the call timeout or reported a provider-side timeout
    pub timed_out_requests: u64,
    /// Fastest attempt in milliseconds
    pub min_latency_ms: Option<u64>,
    /// Slowest attempt in milliseconds
    pub max_latency_ms: Option<u64>,
    /// Mean attempt latency in milliseconds
    pub avg_latency_ms: f64,
    /// When the provider was last called
    pub last_used: Option<DateTime<Utc>>,
}

impl ConnectionStats {
    /// Share of successful attempts (1.0 when unused)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Default)]
struct ConnectionMetrics {
    total: u64,
    success: u64,
    failure: u64,
    timeout: u64,
    min_latency: Option<Duration>,
    max_latency: Option<Duration>,
    total_latency: Duration,
    last_used: Option<DateTime<Utc>>,
}

impl ConnectionMetrics {
    fn record(&mut self, outcome: Outcome, latency: Duration) {
        self.total += 1;
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Failure => self.failure += 1,
            Outcome::Timeout => self.timeout += 1,
        }
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
        self.total_latency += latency;
        self.last_used = Some(Utc::now());
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn snapshot(&self) -> ConnectionStats {
        let avg_latency_ms = if self.total == 0 {
            0.0
        } else {
            self.total_latency.as_secs_f64() * 1000.0 / self.total as f64
        };
        ConnectionStats {
            total_requests: self.total,
            successful_requests: self.success,
            failed_requests: self.failure,
            timed_out_requests: self.timeout,
            min_latency_ms: self.min_latency.map(|d| d.as_millis() as u64),
            max_latency_ms: self.max_latency.map(|d| d.as_millis() as u64),
            avg_latency_ms,
            last_used: self.last_used,
        }
    }
}

/// Everything the manager holds for one provider
pub struct ProviderConnection {
    identity: ProviderIdentity,
    config: ConnectionConfig,
    client: reqwest::Client,
    permits: Semaphore,
    breaker: Arc<CircuitBreaker>,
    metrics: Mutex<ConnectionMetrics>,
}

impl fmt::Debug for ProviderConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConnection")
            .field("identity", &self.identity)
            .field("available_permits", &self.permits.available_permits())
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl ProviderConnection {
    fn new(identity: ProviderIdentity, config: ConnectionConfig) -> Result<Self, ApplicationError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                ApplicationError::Internal(format!("HTTP client for '{identity}': {e}"))
            })?;

        let breaker = Arc::new(CircuitBreaker::with_config(
            identity.to_string(),
            config.circuit_breaker.clone(),
        ));

        Ok(Self {
            permits: Semaphore::new(config.max_connections.max(1)),
            identity,
            config,
            client,
            breaker,
            metrics: Mutex::new(ConnectionMetrics::default()),
        })
    }

    /// Circuit breaker guarding this provider
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Effective configuration
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Metrics snapshot
    pub fn stats(&self) -> ConnectionStats {
        self.metrics.lock().snapshot()
    }

    fn record(&self, outcome: Outcome, latency: Duration) {
        self.metrics.lock().record(outcome, latency);

        let provider = self.identity.to_string();
        metrics::counter!(
            "voicerelay_provider_attempts_total",
            "provider" => provider.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!("voicerelay_provider_latency_seconds", "provider" => provider)
            .record(latency.as_secs_f64());
    }

    fn session(&self, attempt: u32) -> ProviderSession {
        ProviderSession {
            identity: self.identity.clone(),
            client: self.client.clone(),
            attempt,
        }
    }

    async fn attempt<T, Fut>(
        &self,
        fut: Fut,
        last_error: &Mutex<Option<String>>,
    ) -> Result<T, AttemptError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let _permit = match tokio::time::timeout(
            self.config.acquire_timeout(),
            self.permits.acquire(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AttemptError::Closed),
            Err(_) => return Err(AttemptError::PoolExhausted),
        };

        let started = Instant::now();
        let outcome = self.breaker.call(|| fut).await;
        let latency = started.elapsed();

        match outcome {
            Ok(value) => {
                self.record(Outcome::Success, latency);
                Ok(value)
            },
            Err(CircuitBreakerError::CircuitOpen(_)) => Err(AttemptError::CircuitOpen),
            Err(CircuitBreakerError::Timeout(timeout)) => {
                self.record(Outcome::Timeout, latency);
                let err = AttemptError::Timeout(timeout);
                *last_error.lock() = Some(err.to_string());
                Err(err)
            },
            Err(CircuitBreakerError::ServiceError(e)) => {
                let outcome = if matches!(e, ProviderError::Timeout(_)) {
                    Outcome::Timeout
                } else {
                    Outcome::Failure
                };
                self.record(outcome, latency);
                *last_error.lock() = Some(e.to_string());
                Err(AttemptError::Provider(e))
            },
        }
    }
}

/// Outcome of one attempt inside the retry loop
#[derive(Debug)]
enum AttemptError {
    CircuitOpen,
    PoolExhausted,
    Closed,
    Timeout(Duration),
    Provider(ProviderError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen => write!(f, "circuit opened"),
            Self::PoolExhausted => write!(f, "connection pool exhausted"),
            Self::Closed => write!(f, "connection pool closed"),
            Self::Timeout(d) => write!(f, "call timed out after {}ms", d.as_millis()),
            Self::Provider(e) => write!(f, "{e}"),
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Provider(e) => e.is_retryable(),
            Self::CircuitOpen | Self::PoolExhausted | Self::Closed => false,
        }
    }
}

/// Executes provider calls over pooled, breaker-guarded connections
pub struct ConnectionManager {
    defaults: ConnectionConfig,
    overrides: HashMap<ProviderIdentity, ConnectionConfig>,
    connections: RwLock<HashMap<ProviderIdentity, Arc<ProviderConnection>>>,
    closed: AtomicBool,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("registered", &self.connections.read().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl ConnectionManager {
    /// Creates a manager applying `defaults` to every provider
    #[must_use]
    pub fn new(defaults: ConnectionConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            connections: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Use a provider-specific configuration instead of the defaults
    #[must_use]
    pub fn with_provider_config(mut self, identity: ProviderIdentity, config: ConnectionConfig) -> Self {
        self.overrides.insert(identity, config);
        self
    }

    /// Configuration that applies to `identity`
    pub fn config_for(&self, identity: &ProviderIdentity) -> &ConnectionConfig {
        self.overrides.get(identity).unwrap_or(&self.defaults)
    }

    /// Whether `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the connection for `identity`, registering it on first use
    pub fn connection(
        &self,
        identity: &ProviderIdentity,
    ) -> Result<Arc<ProviderConnection>, ApplicationError> {
        if self.is_closed() {
            return Err(ApplicationError::ShuttingDown(
                "connection manager is shut down".to_string(),
            ));
        }

        if let Some(conn) = self.connections.read().get(identity) {
            return Ok(Arc::clone(conn));
        }

        let created = ProviderConnection::new(identity.clone(), self.config_for(identity).clone())?;
        let mut connections = self.connections.write();
        // `shutdown` flips the flag before draining under this lock
        if self.is_closed() {
            return Err(ApplicationError::ShuttingDown(
                "connection manager is shut down".to_string(),
            ));
        }
        let conn = connections
            .entry(identity.clone())
            .or_insert_with(|| {
                debug!(provider = %identity, "Registered provider connection");
                Arc::new(created)
            });
        Ok(Arc::clone(conn))
    }

    /// Whether the provider's circuit currently admits calls
    ///
    /// Read-only: an open circuit due for its trial stays open until
    /// [`ConnectionManager::execute`] claims it. Unregistered providers have a
    /// fresh, closed circuit.
    pub fn is_available(&self, identity: &ProviderIdentity) -> bool {
        if self.is_closed() {
            return false;
        }
        self.connections
            .read()
            .get(identity)
            .map(Arc::clone)
            .is_none_or(|conn| conn.breaker.would_admit())
    }

    /// The breaker for `identity`, if registered
    pub fn circuit_breaker(&self, identity: &ProviderIdentity) -> Option<Arc<CircuitBreaker>> {
        self.connections
            .read()
            .get(identity)
            .map(|conn| Arc::clone(&conn.breaker))
    }

    /// Metrics snapshot for `identity`, if registered
    pub fn stats(&self, identity: &ProviderIdentity) -> Option<ConnectionStats> {
        self.connections.read().get(identity).map(|conn| conn.stats())
    }

    /// Identities registered so far
    pub fn registered(&self) -> Vec<ProviderIdentity> {
        self.connections.read().keys().cloned().collect()
    }

    /// Run `operation` against `identity` with retries and breaker protection
    ///
    /// An unavailable circuit fails immediately without consuming any retry
    /// budget. Every failed attempt is recorded against the breaker, so one
    /// call can open the circuit on its own. Permanent provider errors are
    /// returned without retrying.
    #[instrument(skip_all, fields(provider = %identity))]
    pub async fn execute<T, F, Fut>(
        &self,
        identity: &ProviderIdentity,
        mut operation: F,
    ) -> Result<T, ApplicationError>
    where
        F: FnMut(ProviderSession) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let conn = self.connection(identity)?;
        let provider = identity.to_string();

        if !conn.breaker.is_available() {
            debug!("Circuit open, skipping provider");
            return Err(ApplicationError::CircuitOpen { provider });
        }

        let last_error = Mutex::new(None::<String>);
        let mut attempt = 0u32;
        let policy = conn.config.retry.clone();

        let outcome = with_retry(&policy, || {
            attempt += 1;
            let fut = operation(conn.session(attempt));
            let conn = Arc::clone(&conn);
            let last_error = &last_error;
            async move { conn.attempt(fut, last_error).await }
        })
        .await;

        let attempts = outcome.attempts;
        match outcome.result {
            Ok(value) => Ok(value),
            Err(AttemptError::Provider(source)) if !source.is_retryable() => {
                warn!(error = %source, "Provider returned a permanent error");
                Err(ApplicationError::ProviderCall { provider, source })
            },
            Err(AttemptError::Provider(source)) if policy.max_retries == 0 => {
                Err(ApplicationError::ProviderCall { provider, source })
            },
            Err(AttemptError::Timeout(timeout)) if policy.max_retries == 0 => {
                Err(ApplicationError::Timeout {
                    provider,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            },
            Err(AttemptError::PoolExhausted) => {
                warn!("No connection slot became free in time");
                Err(ApplicationError::PoolExhausted { provider })
            },
            Err(AttemptError::Closed) => Err(ApplicationError::ShuttingDown(format!(
                "connection pool for '{provider}' closed"
            ))),
            Err(AttemptError::CircuitOpen) if attempts <= 1 => {
                Err(ApplicationError::CircuitOpen { provider })
            },
            Err(err) => {
                let made = if matches!(err, AttemptError::CircuitOpen) {
                    attempts - 1
                } else {
                    attempts
                };
                let last_error = last_error.lock().take().unwrap_or_else(|| err.to_string());
                warn!(attempts = made, error = %last_error, "Provider retries exhausted");
                Err(ApplicationError::RetriesExhausted {
                    provider,
                    attempts: made,
                    last_error,
                })
            },
        }
    }

    /// Close every pool and forget all registered providers
    ///
    /// Calls still in flight finish; new calls fail with `ShuttingDown`.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = self.connections.write().drain().collect();
        for (_, conn) in &drained {
            conn.permits.close();
        }
        info!(providers = drained.len(), "Connection manager shut down");
    }
}
