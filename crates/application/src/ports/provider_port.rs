//! Provider port - Uniform capability interface for STT/TTS vendors
//!
//! Every vendor integration implements [`ProviderLifecycle`] plus exactly one
//! operation trait. Optional capabilities (currently only health probing) are
//! discovered through accessor methods rather than by inspecting the type.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use domain::{AudioFormat, ProviderCategory, ProviderIdentity, SynthesisRequest};
use thiserror::Error;

use crate::config::ProviderSettings;
use crate::resilience::{ProviderSession, Retryable};

/// Error reported by a provider for a single call
///
/// Providers tag their failures so the retry loop can tell a bad API key
/// from a flaky network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Failure that may succeed on retry (5xx, connection reset)
    #[error("Transient provider failure: {0}")]
    Transient(String),

    /// Failure that will not succeed on retry (auth, bad request)
    #[error("Permanent provider failure: {0}")]
    Permanent(String),

    /// Vendor-side rate limit
    #[error("Provider rate limit exceeded")]
    RateLimited,

    /// Call exceeded its deadline
    #[error("Provider call timed out after {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether a retry may succeed
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Text produced by a speech-to-text provider
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOutput {
    /// Transcribed text
    pub text: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: Option<f32>,
    /// Detected language
    pub language: Option<String>,
}

impl TranscriptionOutput {
    /// Create an output with text only
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            language: None,
        }
    }

    /// Attach a confidence score
    #[must_use]
    pub const fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Attach the detected language
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Audio produced by a text-to-speech provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOutput {
    /// Encoded audio
    pub audio: Bytes,
    /// Format of `audio`
    pub format: AudioFormat,
}

impl SynthesisOutput {
    /// Create a new output
    pub fn new(audio: impl Into<Bytes>, format: AudioFormat) -> Self {
        Self {
            audio: audio.into(),
            format,
        }
    }
}

/// Lifecycle shared by every provider
#[async_trait]
pub trait ProviderLifecycle: Send + Sync {
    /// Provider name as configured
    fn name(&self) -> &str;

    /// One-time setup (auth handshake, model warm-up)
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Release provider-held resources
    async fn cleanup(&self) {}

    /// Health probe capability, if the provider has one
    fn as_health_checkable(&self) -> Option<&dyn HealthCheckable> {
        None
    }
}

/// Optional capability: the provider can probe its own backend
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    /// Returns `true` if the backend is reachable and usable
    async fn health_check(&self) -> bool;
}

/// Port for speech-to-text providers
#[async_trait]
pub trait SpeechToTextProvider: ProviderLifecycle {
    /// Transcribe audio in the given language
    ///
    /// `session` carries the pooled HTTP client scoped to this provider.
    async fn transcribe(
        &self,
        session: &ProviderSession,
        audio: &[u8],
        language: &str,
    ) -> Result<TranscriptionOutput, ProviderError>;
}

/// Port for text-to-speech providers
#[async_trait]
pub trait TextToSpeechProvider: ProviderLifecycle {
    /// Synthesize speech for the request's text, voice, language and speed
    async fn synthesize(
        &self,
        session: &ProviderSession,
        request: &SynthesisRequest,
    ) -> Result<SynthesisOutput, ProviderError>;
}

/// A live provider instance of either category
#[derive(Clone)]
pub enum ProviderHandle {
    /// Speech-to-text provider
    Stt(Arc<dyn SpeechToTextProvider>),
    /// Text-to-speech provider
    Tts(Arc<dyn TextToSpeechProvider>),
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("category", &self.category())
            .field("name", &self.name())
            .finish()
    }
}

impl ProviderHandle {
    /// Category served by this instance
    pub const fn category(&self) -> ProviderCategory {
        match self {
            Self::Stt(_) => ProviderCategory::Stt,
            Self::Tts(_) => ProviderCategory::Tts,
        }
    }

    /// Provider name
    pub fn name(&self) -> &str {
        match self {
            Self::Stt(p) => p.name(),
            Self::Tts(p) => p.name(),
        }
    }

    /// The speech-to-text capability, if this is an STT provider
    pub fn as_stt(&self) -> Option<Arc<dyn SpeechToTextProvider>> {
        match self {
            Self::Stt(p) => Some(Arc::clone(p)),
            Self::Tts(_) => None,
        }
    }

    /// The text-to-speech capability, if this is a TTS provider
    pub fn as_tts(&self) -> Option<Arc<dyn TextToSpeechProvider>> {
        match self {
            Self::Tts(p) => Some(Arc::clone(p)),
            Self::Stt(_) => None,
        }
    }

    /// Run the provider's one-time setup
    pub async fn initialize(&self) -> Result<(), ProviderError> {
        match self {
            Self::Stt(p) => p.initialize().await,
            Self::Tts(p) => p.initialize().await,
        }
    }

    /// Release provider resources
    pub async fn cleanup(&self) {
        match self {
            Self::Stt(p) => p.cleanup().await,
            Self::Tts(p) => p.cleanup().await,
        }
    }

    /// Run the provider's own probe
    ///
    /// Returns `None` when the provider has no probe capability.
    pub async fn health_check(&self) -> Option<bool> {
        let probe = match self {
            Self::Stt(p) => p.as_health_checkable(),
            Self::Tts(p) => p.as_health_checkable(),
        };
        match probe {
            Some(probe) => Some(probe.health_check().await),
            None => None,
        }
    }
}

/// Builds provider instances from configuration
///
/// Construction may perform network I/O (auth handshakes); callers cache the
/// result.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Construct the provider registered under `identity`
    async fn create(
        &self,
        identity: &ProviderIdentity,
        settings: &ProviderSettings,
    ) -> Result<ProviderHandle, ProviderError>;
}
