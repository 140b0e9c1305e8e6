//! Speech-to-text manager
//!
//! Cache lookup first, then the STT fallback chain. Cache failures never fail
//! a transcription: a broken read is a miss and a broken write is logged.

use std::{fmt, sync::Arc};

use domain::{ProviderCategory, Transcription, TranscriptionRequest};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::CachePolicy,
    error::ApplicationError,
    ports::{CachePort, CachePortExt, ProviderError},
    services::{ProviderManager, fallback},
};

/// Transcription as stored in the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedTranscription {
    text: String,
    confidence: Option<f32>,
    language: Option<String>,
    provider: String,
}

/// Routes transcription requests through cache and provider chain
pub struct SttManager {
    providers: Arc<ProviderManager>,
    cache: Option<Arc<dyn CachePort>>,
    policy: CachePolicy,
}

impl fmt::Debug for SttManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttManager")
            .field("cache", &self.cache.is_some())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SttManager {
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

    /// Transcribe audio, serving repeated requests from the cache
    #[instrument(skip_all, fields(language = %request.language(), bytes = request.audio().len()))]
    pub async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<Transcription, ApplicationError> {
        let started = Instant::now();
        let key = request.cache_key();

        if let Some(cache) = self.cache() {
            match cache.get::<CachedTranscription>(key.as_str()).await {
                Ok(Some(hit)) => {
                    debug!(provider = %hit.provider, "Transcription cache hit");
                    record_lookup("hit");
                    record_request("cached");
                    return Ok(Transcription {
                        text: hit.text,
                        confidence: hit.confidence,
                        language: hit.language,
                        provider: hit.provider,
                        processing_time: started.elapsed(),
                        cached: true,
                    });
                },
                Ok(None) => record_lookup("miss"),
                Err(e) => {
                    warn!(error = %e, "Cache read failed, treating as miss");
                    record_lookup("error");
                },
            }
        }

        let audio = request.audio().clone();
        let language = request.language().to_string();
        let answered = fallback::run_chain(
            &self.providers,
            ProviderCategory::Stt,
            request.preferred_provider(),
            |handle, session| {
                let audio = audio.clone();
                let language = language.clone();
                async move {
                    let stt = handle.as_stt().ok_or_else(|| {
                        ProviderError::permanent(format!("{} is not an STT provider", handle.name()))
                    })?;
                    stt.transcribe(&session, &audio, &language).await
                }
            },
        )
        .await
        .inspect_err(|_| record_request("failed"))?;

        let output = answered.value;
        let provider = answered.provider.name().to_string();
        info!(provider = %provider, chars = output.text.len(), "Transcription completed");
        record_request("success");

        if let Some(cache) = self.cache() {
            let entry = CachedTranscription {
                text: output.text.clone(),
                confidence: output.confidence,
                language: output.language.clone(),
                provider: provider.clone(),
            };
            let ttl = self.policy.ttl_for(ProviderCategory::Stt);
            if let Err(e) = cache.set(key.as_str(), &entry, ttl).await {
                warn!(error = %e, "Failed to cache transcription");
            }
        }

        Ok(Transcription {
            text: output.text,
            confidence: output.confidence,
            language: output.language,
            provider,
            processing_time: started.elapsed(),
            cached: false,
        })
    }
}

fn record_lookup(outcome: &'static str) {
    metrics::counter!("voicerelay_cache_lookups_total", "category" => "stt", "outcome" => outcome)
        .increment(1);
}

fn record_request(outcome: &'static str) {
    metrics::counter!("voicerelay_requests_total", "category" => "stt", "outcome" => outcome)
        .increment(1);
}
