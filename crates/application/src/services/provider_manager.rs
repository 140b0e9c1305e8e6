//! Provider manager - Instance cache, fallback chains and health probing
//!
//! Holding an instance and being allowed to call it are separate questions:
//! instances are cached here once constructed, while call-time availability is
//! decided solely by the provider's circuit breaker in the
//! [`ConnectionManager`].

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use domain::{ProviderCategory, ProviderIdentity};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::VoiceCoreConfig,
    ports::{ProviderFactory, ProviderHandle},
    resilience::{CircuitState, ConnectionManager},
};

/// Health of one configured provider, as reported to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealthStatus {
    /// Provider name
    pub name: String,
    /// Provider category
    pub category: ProviderCategory,
    /// Whether the provider takes part in fallback chains
    pub enabled: bool,
    /// Whether a live instance is cached
    pub instantiated: bool,
    /// Whether the circuit currently admits calls
    pub available: bool,
    /// Circuit breaker state
    pub circuit_state: CircuitState,
    /// Failed calls since the last success
    pub consecutive_failures: u32,
    /// Share of successful call attempts
    pub success_rate: f64,
    /// Most recent failed call
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Failed health probes since the last healthy one
    pub failed_health_checks: u32,
}

/// Resolves, caches and probes provider instances
pub struct ProviderManager {
    config: Arc<VoiceCoreConfig>,
    factory: Arc<dyn ProviderFactory>,
    connections: Arc<ConnectionManager>,
    instances: RwLock<HashMap<ProviderIdentity, ProviderHandle>>,
    failed_probes: Mutex<HashMap<ProviderIdentity, u32>>,
}

impl fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderManager")
            .field("instances", &self.instances.read().len())
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl ProviderManager {
    /// Create a manager over a validated configuration
    pub fn new(
        config: Arc<VoiceCoreConfig>,
        factory: Arc<dyn ProviderFactory>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            config,
            factory,
            connections,
            instances: RwLock::new(HashMap::new()),
            failed_probes: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this manager routes over
    pub fn config(&self) -> &VoiceCoreConfig {
        &self.config
    }

    /// The connection manager guarding provider calls
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Return the cached instance for `identity`, constructing it on first use
    ///
    /// Returns `None` when the provider is not configured, disabled, or fails
    /// to construct or initialize. Concurrent first calls may each build an
    /// instance; only the first one cached survives and the others are
    /// cleaned up.
    #[instrument(skip_all, fields(provider = %identity))]
    pub async fn get_provider(&self, identity: &ProviderIdentity) -> Option<ProviderHandle> {
        let cached = self.instances.read().get(identity).cloned();
        if cached.is_some() {
            return cached;
        }

        let Some(settings) = self.config.provider(identity) else {
            debug!("Provider is not configured");
            return None;
        };
        if !settings.enabled {
            debug!("Provider is disabled");
            return None;
        }

        let handle = match self.factory.create(identity, settings).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Failed to construct provider");
                return None;
            },
        };

        if handle.category() != identity.category() {
            warn!(
                actual = %handle.category(),
                "Factory returned a provider of the wrong category"
            );
            handle.cleanup().await;
            return None;
        }

        if let Err(e) = handle.initialize().await {
            warn!(error = %e, "Failed to initialize provider");
            handle.cleanup().await;
            return None;
        }

        let (cached, duplicate) = {
            let mut instances = self.instances.write();
            match instances.get(identity) {
                Some(existing) => (existing.clone(), Some(handle)),
                None => {
                    instances.insert(identity.clone(), handle.clone());
                    (handle, None)
                },
            }
        };

        if let Some(duplicate) = duplicate {
            debug!("Discarding concurrently constructed duplicate instance");
            duplicate.cleanup().await;
        } else {
            info!("Provider instance created");
        }

        Some(cached)
    }

    /// Ordered fallback chain for `category`
    ///
    /// Enabled providers sorted by ascending priority. A `preferred` provider
    /// that is configured and enabled moves to the front; an unknown or
    /// disabled preference is ignored.
    pub fn chain(
        &self,
        category: ProviderCategory,
        preferred: Option<&str>,
    ) -> Vec<ProviderIdentity> {
        let mut enabled: Vec<_> = self
            .config
            .providers(category)
            .iter()
            .filter(|p| p.enabled)
            .collect();
        enabled.sort_by_key(|p| p.priority);

        let mut chain: Vec<ProviderIdentity> = enabled
            .into_iter()
            .map(|p| ProviderIdentity::new(&p.name, category))
            .collect();

        if let Some(preferred) = preferred {
            let wanted = ProviderIdentity::new(preferred, category);
            match chain.iter().position(|identity| *identity == wanted) {
                Some(index) => {
                    let identity = chain.remove(index);
                    chain.insert(0, identity);
                },
                None => debug!(
                    provider = %wanted,
                    "Preferred provider is not enabled, using default order"
                ),
            }
        }

        chain
    }

    /// Whether the provider's circuit admits calls right now
    pub fn is_available(&self, identity: &ProviderIdentity) -> bool {
        self.connections.is_available(identity)
    }

    /// Probe one provider
    ///
    /// Providers without a probe are healthy once constructible. After the
    /// configured number of consecutive failed probes the cached instance is
    /// evicted and cleaned up; the next use constructs a fresh one.
    #[instrument(skip_all, fields(provider = %identity))]
    pub async fn health_check(&self, identity: &ProviderIdentity) -> bool {
        let healthy = match self.get_provider(identity).await {
            None => false,
            Some(handle) => {
                let timeout = self.config.health_check.timeout();
                match tokio::time::timeout(timeout, handle.health_check()).await {
                    Ok(Some(healthy)) => healthy,
                    Ok(None) => true,
                    Err(_) => {
                        warn!(timeout_ms = timeout.as_millis(), "Health probe timed out");
                        false
                    },
                }
            },
        };

        if healthy {
            self.failed_probes.lock().remove(identity);
            debug!("Provider healthy");
        } else {
            self.record_failed_probe(identity).await;
        }

        healthy
    }

    async fn record_failed_probe(&self, identity: &ProviderIdentity) {
        let threshold = self.config.health_check.eviction_threshold;
        let failures = {
            let mut probes = self.failed_probes.lock();
            let count = probes.entry(identity.clone()).or_insert(0);
            *count += 1;
            *count
        };
        warn!(failures, "Provider health check failed");

        if threshold > 0 && failures >= threshold {
            let evicted = self.instances.write().remove(identity);
            if let Some(handle) = evicted {
                warn!(failures, "Evicting unhealthy provider instance");
                self.failed_probes.lock().remove(identity);
                handle.cleanup().await;
            }
        }
    }

    /// Whether a live instance is cached for `identity`
    pub fn is_instantiated(&self, identity: &ProviderIdentity) -> bool {
        self.instances.read().contains_key(identity)
    }

    /// Number of cached instances
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Health of every configured provider keyed by `category:name`
    pub fn health_status(&self) -> BTreeMap<String, ProviderHealthStatus> {
        let probes = self.failed_probes.lock().clone();

        [ProviderCategory::Stt, ProviderCategory::Tts]
            .into_iter()
            .flat_map(|category| {
                self.config
                    .providers(category)
                    .iter()
                    .map(move |settings| (ProviderIdentity::new(&settings.name, category), settings))
            })
            .map(|(identity, settings)| {
                let snapshot = self
                    .connections
                    .circuit_breaker(&identity)
                    .map(|breaker| breaker.snapshot());
                let success_rate = self
                    .connections
                    .stats(&identity)
                    .map_or(1.0, |stats| stats.success_rate());

                let status = ProviderHealthStatus {
                    name: identity.name().to_string(),
                    category: identity.category(),
                    enabled: settings.enabled,
                    instantiated: self.is_instantiated(&identity),
                    available: settings.enabled && self.is_available(&identity),
                    circuit_state: snapshot.as_ref().map_or(CircuitState::Closed, |s| s.state),
                    consecutive_failures: snapshot.as_ref().map_or(0, |s| s.consecutive_failures),
                    success_rate,
                    last_failure_at: snapshot.and_then(|s| s.last_failure_at),
                    failed_health_checks: probes.get(&identity).copied().unwrap_or(0),
                };
                (identity.to_string(), status)
            })
            .collect()
    }

    /// Clean up and forget every cached instance
    pub async fn cleanup(&self) {
        let drained: Vec<_> = self.instances.write().drain().collect();
        let count = drained.len();
        for (identity, handle) in drained {
            debug!(provider = %identity, "Cleaning up provider");
            handle.cleanup().await;
        }
        self.failed_probes.lock().clear();
        info!(providers = count, "Provider instances cleaned up");
    }
}
