//! Explicit wiring of the routing core
//!
//! Everything the orchestrator needs is built here once from a validated
//! configuration and shared through `Arc`s. There is no process-global state,
//! so each test can build its own isolated context.

use std::sync::Arc;

use domain::{ProviderCategory, ProviderIdentity};

use crate::{
    config::VoiceCoreConfig,
    error::ApplicationError,
    ports::{CachePort, ProviderFactory},
    resilience::ConnectionManager,
    services::{ProviderManager, SttManager, TtsManager},
};

/// Shared components of one voice core instance
#[derive(Clone)]
pub struct VoiceContext {
    config: Arc<VoiceCoreConfig>,
    connections: Arc<ConnectionManager>,
    providers: Arc<ProviderManager>,
    cache: Option<Arc<dyn CachePort>>,
    stt: Arc<SttManager>,
    tts: Arc<TtsManager>,
}

impl std::fmt::Debug for VoiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceContext")
            .field("providers", &self.providers)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl VoiceContext {
    /// Validate `config` and build every component from it
    ///
    /// Providers that carry their own `connection` settings get a dedicated
    /// pool, retry policy and breaker configuration.
    pub fn new(
        config: VoiceCoreConfig,
        factory: Arc<dyn ProviderFactory>,
        cache: Option<Arc<dyn CachePort>>,
    ) -> Result<Self, ApplicationError> {
        config.validate()?;

        let mut connections = ConnectionManager::new(config.connection.clone());
        for category in [ProviderCategory::Stt, ProviderCategory::Tts] {
            for settings in config.providers(category) {
                if let Some(overrides) = &settings.connection {
                    connections = connections.with_provider_config(
                        ProviderIdentity::new(&settings.name, category),
                        overrides.clone(),
                    );
                }
            }
        }

        let policy = config.cache.clone();
        let config = Arc::new(config);
        let connections = Arc::new(connections);
        let providers = Arc::new(ProviderManager::new(
            Arc::clone(&config),
            factory,
            Arc::clone(&connections),
        ));
        let stt = Arc::new(SttManager::new(
            Arc::clone(&providers),
            cache.clone(),
            policy.clone(),
        ));
        let tts = Arc::new(TtsManager::new(Arc::clone(&providers), cache.clone(), policy));

        Ok(Self {
            config,
            connections,
            providers,
            cache,
            stt,
            tts,
        })
    }

    /// Validated core configuration
    pub fn config(&self) -> &VoiceCoreConfig {
        &self.config
    }

    /// Per-provider pools, retries and breakers
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Provider instances and fallback chains
    pub fn providers(&self) -> &Arc<ProviderManager> {
        &self.providers
    }

    /// Result cache backend, if one is attached
    pub fn cache(&self) -> Option<&Arc<dyn CachePort>> {
        self.cache.as_ref()
    }

    /// Speech-to-text routing
    pub fn stt(&self) -> &Arc<SttManager> {
        &self.stt
    }

    /// Text-to-speech routing
    pub fn tts(&self) -> &Arc<TtsManager> {
        &self.tts
    }
}
