//! Wiring of the voice orchestrator from loaded configuration

use std::sync::Arc;

use application::{
    VoiceContext, VoiceOrchestrator,
    error::ApplicationError,
    ports::{CachePort, ProviderFactory},
};
use tracing::info;

use crate::{cache::MokaCache, config::AppConfig};

/// Build an uninitialized orchestrator
///
/// A Moka cache is attached when both the cache backend and result caching
/// are enabled. Call [`VoiceOrchestrator::initialize`] before serving requests.
pub fn build_orchestrator(
    config: &AppConfig,
    factory: Arc<dyn ProviderFactory>,
) -> Result<VoiceOrchestrator, ApplicationError> {
    let cache: Option<Arc<dyn CachePort>> = if config.cache.enabled && config.voice.cache.enabled {
        Some(Arc::new(MokaCache::with_config(config.cache.moka())))
    } else {
        None
    };

    info!(
        stt_providers = config.voice.stt_providers.len(),
        tts_providers = config.voice.tts_providers.len(),
        cache = cache.is_some(),
        "Building voice orchestrator"
    );

    let context = VoiceContext::new(config.voice.clone(), factory, cache)?;
    Ok(VoiceOrchestrator::new(context))
}
