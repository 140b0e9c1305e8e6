//! Speech operation requests
//!
//! Requests are immutable once built. Each one derives its own [`CacheKey`];
//! the provider slot of the key is the preferred provider when one is named,
//! otherwise [`ANY_PROVIDER`].

use bytes::Bytes;

use crate::value_objects::{ANY_PROVIDER, AudioFormat, CacheKey};

/// Default synthesis speed when a request does not set one
pub const DEFAULT_SPEED: f32 = 1.0;

/// Speech-to-text request
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    audio: Bytes,
    language: String,
    preferred_provider: Option<String>,
}

impl TranscriptionRequest {
    /// Create a request for the given audio and ISO 639-1 language code
    #[must_use]
    pub fn new(audio: impl Into<Bytes>, language: impl Into<String>) -> Self {
        Self {
            audio: audio.into(),
            language: language.into(),
            preferred_provider: None,
        }
    }

    /// Ask for a specific provider to be tried first
    #[must_use]
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    /// Raw audio bytes
    #[must_use]
    pub const fn audio(&self) -> &Bytes {
        &self.audio
    }

    /// Language code
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Preferred provider name, if any
    #[must_use]
    pub fn preferred_provider(&self) -> Option<&str> {
        self.preferred_provider.as_deref()
    }

    /// Deterministic cache key for this request
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_transcription(
            self.preferred_provider().unwrap_or(ANY_PROVIDER),
            &self.language,
            &self.audio,
        )
    }
}

/// Text-to-speech request
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    text: String,
    voice: Option<String>,
    language: Option<String>,
    speed: Option<f32>,
    format: Option<AudioFormat>,
    preferred_provider: Option<String>,
}

impl SynthesisRequest {
    /// Create a request for the given text
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            language: None,
            speed: None,
            format: None,
            preferred_provider: None,
        }
    }

    /// Set the voice identifier
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set the language code
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the speaking speed
    #[must_use]
    pub const fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Set the output format
    #[must_use]
    pub const fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Ask for a specific provider to be tried first
    #[must_use]
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    /// Text to synthesize
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Requested voice, if any
    #[must_use]
    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    /// Requested language, if any
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Requested speed, if any
    #[must_use]
    pub const fn speed(&self) -> Option<f32> {
        self.speed
    }

    /// Requested output format, if any
    #[must_use]
    pub const fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// Preferred provider name, if any
    #[must_use]
    pub fn preferred_provider(&self) -> Option<&str> {
        self.preferred_provider.as_deref()
    }

    /// Deterministic cache key for this request
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_synthesis(
            self.preferred_provider().unwrap_or(ANY_PROVIDER),
            self.voice().unwrap_or_default(),
            self.language().unwrap_or_default(),
            self.speed.unwrap_or(DEFAULT_SPEED),
            self.format.unwrap_or_default(),
            &self.text,
        )
    }
}
