//! Text-to-speech manager
//!
//! Same shape as the STT manager. Cached audio is stored base64-encoded inside
//! a JSON envelope; an entry that fails to decode is treated as a miss.

use std::{fmt, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use domain::{AudioFormat, ProviderCategory, SynthesisRequest, SynthesizedSpeech};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::CachePolicy,
    error::ApplicationError,
    ports::{CachePort, CachePortExt, ProviderError},
    services::{ProviderManager, fallback},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSpeech {
    audio: String,
    format: AudioFormat,
    provider: String,
}

/// Routes synthesis requests through cache and provider chain
pub struct TtsManager {
    providers: Arc<ProviderManager>,
    cache: Option<Arc<dyn CachePort>>,
    policy: CachePolicy,
}

impl fmt::Debug for TtsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsManager")
            .field("cache", &self.cache.is_some())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TtsManager {
    pub fn new(
        providers: Arc<ProviderManager>,
        cache: Option<Arc<dyn CachePort>>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            providers,
            cache,
            policy,
        }
    }

    fn cache(&self) -> Option<&Arc<dyn CachePort>> {
        self.cache.as_ref().filter(|_| self.policy.enabled)
    }

    async fn lookup(&self, cache: &Arc<dyn CachePort>, key: &str) -> Option<(Bytes, CachedSpeech)> {
        let hit = match cache.get::<CachedSpeech>(key).await {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                record_lookup("miss");
                return None;
            },
            Err(e) => {
                warn!(error = %e, "Cache read failed, treating as miss");
                record_lookup("error");
                return None;
            },
        };

        match STANDARD.decode(&hit.audio) {
            Ok(audio) => {
                record_lookup("hit");
                Some((Bytes::from(audio), hit))
            },
            Err(e) => {
                warn!(error = %e, "Cached audio is corrupt, treating as miss");
                record_lookup("error");
                None
            },
        }
    }

    /// Synthesize speech, serving repeated requests from the cache
    #[instrument(skip_all, fields(chars = request.text().len()))]
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesizedSpeech, ApplicationError> {
        let started = Instant::now();
        let key = request.cache_key();

        if let Some(cache) = self.cache()
            && let Some((audio, hit)) = self.lookup(cache, key.as_str()).await
        {
            debug!(provider = %hit.provider, "Synthesis cache hit");
            record_request("cached");
            return Ok(SynthesizedSpeech {
                audio,
                format: hit.format,
                provider: hit.provider,
                processing_time: started.elapsed(),
                cached: true,
            });
        }

        let answered = fallback::run_chain(
            &self.providers,
            ProviderCategory::Tts,
            request.preferred_provider(),
            |handle, session| {
                let request = request.clone();
                async move {
                    let tts = handle.as_tts().ok_or_else(|| {
                        ProviderError::permanent(format!("{} is not a TTS provider", handle.name()))
                    })?;
                    tts.synthesize(&session, &request).await
                }
            },
        )
        .await
        .inspect_err(|_| record_request("failed"))?;

        let output = answered.value;
        let provider = answered.provider.name().to_string();
        info!(provider = %provider, bytes = output.audio.len(), "Synthesis completed");
        record_request("success");

        if let Some(cache) = self.cache() {
            let entry = CachedSpeech {
                audio: STANDARD.encode(&output.audio),
                format: output.format,
                provider: provider.clone(),
            };
            let ttl = self.policy.ttl_for(ProviderCategory::Tts);
            if let Err(e) = cache.set(key.as_str(), &entry, ttl).await {
                warn!(error = %e, "Failed to cache synthesized audio");
            }
        }

        Ok(SynthesizedSpeech {
            audio: output.audio,
            format: output.format,
            provider,
            processing_time: started.elapsed(),
            cached: false,
        })
    }
}

fn record_lookup(outcome: &'static str) {
    metrics::counter!("voicerelay_cache_lookups_total", "category" => "tts", "outcome" => outcome)
        .increment(1);
}

fn record_request(outcome: &'static str) {
    metrics::counter!("voicerelay_requests_total", "category" => "tts", "outcome" => outcome)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::{ProviderSettings, VoiceCoreConfig},
        resilience::{ConnectionConfig, ConnectionManager, RetryPolicy},
        testing::{FakeFactory, FakeProvider, MemoryCache, Mode},
    };

    fn providers(factory: FakeFactory) -> Arc<ProviderManager> {
        let connection = ConnectionConfig::default().with_retry(RetryPolicy::none());
        let config = VoiceCoreConfig::default()
            .with_tts_provider(ProviderSettings::new("openai", 1))
            .with_tts_provider(ProviderSettings::new("elevenlabs", 2));
        Arc::new(ProviderManager::new(
            Arc::new(config),
            Arc::new(factory),
            Arc::new(ConnectionManager::new(connection)),
        ))
    }

    #[tokio::test]
    async fn synthesized_audio_round_trips_through_cache() {
        let openai = FakeProvider::new("openai");
        let cache = MemoryCache::new();
        let manager = TtsManager::new(
            providers(FakeFactory::new().with_tts(Arc::clone(&openai))),
            Some(cache),
            CachePolicy::default(),
        );
        let request = SynthesisRequest::new("hello").with_format(AudioFormat::Wav);

        let first = manager.synthesize(&request).await.unwrap();
        let second = manager.synthesize(&request).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.audio, first.audio);
        assert_eq!(second.audio, Bytes::from_static(b"openai:hello"));
        assert_eq!(second.format, AudioFormat::Wav);
        assert_eq!(second.provider, "openai");
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test]
    async fn different_voice_is_a_different_entry() {
        let openai = FakeProvider::new("openai");
        let manager = TtsManager::new(
            providers(FakeFactory::new().with_tts(Arc::clone(&openai))),
            Some(MemoryCache::new()),
            CachePolicy::default(),
        );

        manager
            .synthesize(&SynthesisRequest::new("hello").with_voice("nova"))
            .await
            .unwrap();
        let other = manager
            .synthesize(&SynthesisRequest::new("hello").with_voice("alloy"))
            .await
            .unwrap();

        assert!(!other.cached);
        assert_eq!(openai.calls(), 2);
    }

    #[tokio::test]
    async fn corrupt_cached_audio_is_a_miss() {
        let openai = FakeProvider::new("openai");
        let cache = MemoryCache::new();
        let request = SynthesisRequest::new("hello");
        let entry = CachedSpeech {
            audio: "not base64 !!".into(),
            format: AudioFormat::Mp3,
            provider: "openai".into(),
        };
        cache
            .set(request.cache_key().as_str(), &entry, Duration::from_secs(60))
            .await
            .unwrap();

        let manager = TtsManager::new(
            providers(FakeFactory::new().with_tts(Arc::clone(&openai))),
            Some(cache),
            CachePolicy::default(),
        );
        let result = manager.synthesize(&request).await.unwrap();

        assert!(!result.cached);
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_calls_provider_again() {
        let openai = FakeProvider::new("openai");
        let manager = TtsManager::new(
            providers(FakeFactory::new().with_tts(Arc::clone(&openai))),
            Some(MemoryCache::new()),
            CachePolicy {
                tts_ttl_secs: 10,
                ..CachePolicy::default()
            },
        );
        let request = SynthesisRequest::new("hello");

        manager.synthesize(&request).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        let again = manager.synthesize(&request).await.unwrap();

        assert!(!again.cached);
        assert_eq!(openai.calls(), 2);
    }

    #[tokio::test]
    async fn falls_back_and_aggregates() {
        let manager = TtsManager::new(
            providers(
                FakeFactory::new()
                    .with_tts(FakeProvider::new("openai").with_mode(Mode::Transient))
                    .with_tts(FakeProvider::new("elevenlabs")),
            ),
            None,
            CachePolicy::default(),
        );
        let result = manager.synthesize(&SynthesisRequest::new("hi")).await.unwrap();
        assert_eq!(result.provider, "elevenlabs");

        let failing = TtsManager::new(
            providers(
                FakeFactory::new()
                    .with_tts(FakeProvider::new("openai").with_mode(Mode::Permanent))
                    .with_tts(FakeProvider::new("elevenlabs").with_mode(Mode::Permanent)),
            ),
            None,
            CachePolicy::default(),
        );
        let err = failing
            .synthesize(&SynthesisRequest::new("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.attempted_providers(), vec!["openai", "elevenlabs"]);
        assert_eq!(
            err.user_message(),
            "The voice service is temporarily unavailable. Please try again later."
        );
    }
}
