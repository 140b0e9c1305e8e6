//! Voice orchestrator - Lifecycle and public entry points of the routing core
//!
//! ```text
//! Uninitialized ──initialize()──> Initializing ──> Ready
//!       │                                            │
//!       └──────────────cleanup()──> ShuttingDown <───┘
//!                                        │
//!                                        ▼
//!                                      Closed
//! ```
//!
//! Lifecycle operations are serialised; request handling only reads the
//! current state and never waits on another request.

use std::{collections::BTreeMap, fmt};

use domain::{
    ProviderCategory, SynthesisRequest, SynthesizedSpeech, Transcription, TranscriptionRequest,
};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::ApplicationError,
    services::{ProviderHealthStatus, VoiceContext},
};

/// Lifecycle state of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Built but `initialize` has not run
    Uninitialized,
    /// `initialize` is in progress
    Initializing,
    /// Serving requests
    Ready,
    /// `cleanup` is releasing resources
    ShuttingDown,
    /// Resources released; terminal
    Closed,
}

impl LifecycleState {
    /// Stable snake_case name, matching the serde form
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public facade over the STT/TTS managers
pub struct VoiceOrchestrator {
    context: VoiceContext,
    state: RwLock<LifecycleState>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl fmt::Debug for VoiceOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceOrchestrator")
            .field("state", &self.state())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl VoiceOrchestrator {
    /// Wrap `context` in an uninitialized orchestrator
    pub fn new(context: VoiceContext) -> Self {
        Self {
            context,
            state: RwLock::new(LifecycleState::Uninitialized),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Components this orchestrator drives
    pub fn context(&self) -> &VoiceContext {
        &self.context
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        debug!(from = %previous, to = %state, "Lifecycle transition");
    }

    /// Bring the orchestrator to `Ready`
    ///
    /// Idempotent once ready. Probes the cache backend and every enabled
    /// provider; failed probes are logged only, since call-time availability
    /// is decided by each provider's circuit breaker.
    #[instrument(skip_all)]
    pub async fn initialize(&self) -> Result<(), ApplicationError> {
        let _guard = self.lifecycle.lock().await;

        match self.state() {
            LifecycleState::Ready => return Ok(()),
            LifecycleState::Uninitialized => {},
            other => {
                return Err(ApplicationError::InvalidState(format!(
                    "cannot initialize from state {other}"
                )));
            },
        }
        self.set_state(LifecycleState::Initializing);

        if self.context.config().enabled_count() == 0 {
            self.set_state(LifecycleState::Uninitialized);
            return Err(ApplicationError::Configuration(
                "no providers enabled".to_string(),
            ));
        }

        if let Some(cache) = self.context.cache() {
            if cache.health_check().await {
                debug!("Cache backend healthy");
            } else {
                warn!("Cache backend unhealthy, lookups will degrade to misses");
            }
        }

        let providers = self.context.providers();
        let identities: Vec<_> = [ProviderCategory::Stt, ProviderCategory::Tts]
            .into_iter()
            .flat_map(|category| providers.chain(category, None))
            .collect();
        let results =
            join_all(identities.iter().map(|identity| providers.health_check(identity))).await;

        let healthy = results.iter().filter(|healthy| **healthy).count();
        for (identity, healthy) in identities.iter().zip(&results) {
            if !healthy {
                warn!(provider = %identity, "Provider failed its startup health check");
            }
        }

        self.set_state(LifecycleState::Ready);
        info!(
            providers = identities.len(),
            healthy,
            "Voice orchestrator ready"
        );
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), ApplicationError> {
        match self.state() {
            LifecycleState::Ready => Ok(()),
            LifecycleState::ShuttingDown | LifecycleState::Closed => Err(
                ApplicationError::ShuttingDown("voice orchestrator".to_string()),
            ),
            LifecycleState::Uninitialized | LifecycleState::Initializing => {
                Err(ApplicationError::NotInitialized)
            },
        }
    }

    /// Transcribe audio through cache and the STT fallback chain
    pub async fn transcribe_audio(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<Transcription, ApplicationError> {
        self.ensure_ready()?;
        self.context.stt().transcribe(request).await
    }

    /// Synthesize speech through cache and the TTS fallback chain
    pub async fn synthesize_speech(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesizedSpeech, ApplicationError> {
        self.ensure_ready()?;
        self.context.tts().synthesize(request).await
    }

    /// Health of every configured provider keyed by `category:name`
    pub fn provider_health_status(&self) -> BTreeMap<String, ProviderHealthStatus> {
        self.context.providers().health_status()
    }

    /// Release provider instances, connection pools and the cache backend
    ///
    /// Safe to call repeatedly and from any state.
    #[instrument(skip_all)]
    pub async fn cleanup(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.state() == LifecycleState::Closed {
            return;
        }

        self.set_state(LifecycleState::ShuttingDown);
        self.context.providers().cleanup().await;
        self.context.connections().shutdown();
        if let Some(cache) = self.context.cache() {
            cache.close().await;
        }
        self.set_state(LifecycleState::Closed);
        info!("Voice orchestrator closed");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::{ProviderSettings, VoiceCoreConfig},
        ports::{CachePortExt, MockCachePort},
        resilience::{ConnectionConfig, RetryPolicy},
        testing::{FakeFactory, FakeProvider, MemoryCache, Mode},
    };

    fn config() -> VoiceCoreConfig {
        VoiceCoreConfig::default()
            .with_stt_provider(ProviderSettings::new("openai", 1))
            .with_stt_provider(ProviderSettings::new("google", 2))
            .with_tts_provider(ProviderSettings::new("elevenlabs", 1))
            .with_connection(ConnectionConfig::default().with_retry(RetryPolicy::none()))
    }

    fn factory() -> FakeFactory {
        FakeFactory::new()
            .with_stt(FakeProvider::new("openai"))
            .with_stt(FakeProvider::new("google"))
            .with_tts(FakeProvider::new("elevenlabs"))
    }

    fn orchestrator(factory: FakeFactory, cache: Option<Arc<MemoryCache>>) -> VoiceOrchestrator {
        let cache = cache.map(|cache| cache as Arc<dyn crate::ports::CachePort>);
        VoiceOrchestrator::new(VoiceContext::new(config(), Arc::new(factory), cache).unwrap())
    }

    #[tokio::test]
    async fn requests_fail_before_initialize() {
        let orchestrator = orchestrator(factory(), None);

        let err = orchestrator
            .transcribe_audio(&TranscriptionRequest::new(vec![1u8], "en"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotInitialized));

        let err = orchestrator
            .synthesize_speech(&SynthesisRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotInitialized));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let factory = Arc::new(factory());
        let orchestrator = VoiceOrchestrator::new(
            VoiceContext::new(config(), Arc::clone(&factory) as _, None).unwrap(),
        );

        orchestrator.initialize().await.unwrap();
        orchestrator.initialize().await.unwrap();

        assert_eq!(orchestrator.state(), LifecycleState::Ready);
        // The health sweep constructs each provider once
        assert_eq!(factory.created(&domain::ProviderIdentity::stt("openai")), 1);
        assert_eq!(factory.created(&domain::ProviderIdentity::tts("elevenlabs")), 1);
    }

    #[tokio::test]
    async fn unhealthy_provider_still_participates() {
        let factory = FakeFactory::new()
            .with_stt(FakeProvider::new("openai").with_probe(false))
            .with_tts(FakeProvider::new("elevenlabs"));
        let orchestrator = orchestrator(factory, None);

        orchestrator.initialize().await.unwrap();
        let result = orchestrator
            .transcribe_audio(&TranscriptionRequest::new(vec![1u8, 2], "en"))
            .await
            .unwrap();

        assert_eq!(result.provider, "openai");
    }

    #[tokio::test]
    async fn unhealthy_cache_does_not_block_startup() {
        let mut cache = MockCachePort::new();
        cache.expect_health_check().returning(|| false);
        cache.expect_close().times(1).returning(|| ());

        let orchestrator = VoiceOrchestrator::new(
            VoiceContext::new(config(), Arc::new(factory()), Some(Arc::new(cache))).unwrap(),
        );

        orchestrator.initialize().await.unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Ready);
        orchestrator.cleanup().await;
    }

    #[tokio::test]
    async fn pre_populated_cache_short_circuits() {
        let openai = FakeProvider::new("openai");
        let cache = MemoryCache::new();
        let request = TranscriptionRequest::new(vec![3u8; 64], "en");
        cache
            .set(
                request.cache_key().as_str(),
                &serde_json::json!({
                    "text": "cached text",
                    "confidence": null,
                    "language": "en",
                    "provider": "google",
                }),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let orchestrator = orchestrator(
            FakeFactory::new()
                .with_stt(Arc::clone(&openai))
                .with_tts(FakeProvider::new("elevenlabs")),
            Some(cache),
        );
        orchestrator.initialize().await.unwrap();

        let result = orchestrator.transcribe_audio(&request).await.unwrap();
        assert_eq!(result.text, "cached text");
        assert!(result.cached);
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn synthesize_reports_provider_and_format() {
        let orchestrator = orchestrator(factory(), Some(MemoryCache::new()));
        orchestrator.initialize().await.unwrap();

        let speech = orchestrator
            .synthesize_speech(&SynthesisRequest::new("hallo").with_format(domain::AudioFormat::Opus))
            .await
            .unwrap();

        assert_eq!(speech.provider, "elevenlabs");
        assert_eq!(speech.format, domain::AudioFormat::Opus);
        assert!(!speech.cached);
    }

    #[tokio::test]
    async fn health_status_reflects_failures() {
        let factory = FakeFactory::new()
            .with_stt(FakeProvider::new("openai").with_mode(Mode::Transient))
            .with_stt(FakeProvider::new("google"))
            .with_tts(FakeProvider::new("elevenlabs"));
        let orchestrator = orchestrator(factory, None);
        orchestrator.initialize().await.unwrap();

        orchestrator
            .transcribe_audio(&TranscriptionRequest::new(vec![1u8], "en"))
            .await
            .unwrap();

        let status = orchestrator.provider_health_status();
        assert_eq!(status["stt:openai"].consecutive_failures, 1);
        assert!(status["stt:openai"].success_rate < 1.0);
        assert_eq!(status["stt:google"].consecutive_failures, 0);
        assert!(status.contains_key("tts:elevenlabs"));
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_and_final() {
        let provider = FakeProvider::new("openai");
        let factory = FakeFactory::new()
            .with_stt(Arc::clone(&provider))
            .with_stt(FakeProvider::new("google"))
            .with_tts(FakeProvider::new("elevenlabs"));
        let orchestrator = orchestrator(factory, None);
        orchestrator.initialize().await.unwrap();

        orchestrator.cleanup().await;
        orchestrator.cleanup().await;

        assert_eq!(orchestrator.state(), LifecycleState::Closed);
        assert_eq!(provider.cleaned_up(), 1);
        assert!(orchestrator.context().connections().is_closed());

        let err = orchestrator
            .transcribe_audio(&TranscriptionRequest::new(vec![1u8], "en"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::ShuttingDown(_)));
        assert!(matches!(
            orchestrator.initialize().await,
            Err(ApplicationError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_orchestrator() {
        let orchestrator = Arc::new(orchestrator(factory(), Some(MemoryCache::new())));
        orchestrator.initialize().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..32u8 {
            let orchestrator = Arc::clone(&orchestrator);
            handles.push(tokio::spawn(async move {
                orchestrator
                    .transcribe_audio(&TranscriptionRequest::new(vec![i; 16], "en"))
                    .await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.provider, "openai");
        }
    }
}
