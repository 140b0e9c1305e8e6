//! Content-derived cache keys
//!
//! A key is a pure function of the operation kind, the provider slot, the
//! language/voice parameters and a blake3 digest of the payload (audio bytes or
//! text). Every variable-length field is length-prefixed before hashing so that
//! shifting bytes between adjacent fields can never produce the same digest.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{AudioFormat, ProviderCategory};

/// Provider slot used when a request names no preferred provider
pub const ANY_PROVIDER: &str = "auto";

/// Deterministic cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a speech-to-text request
    #[must_use]
    pub fn for_transcription(provider: &str, language: &str, audio: &[u8]) -> Self {
        let mut hasher = KeyHasher::new(ProviderCategory::Stt, provider);
        hasher.field(language.as_bytes());
        hasher.field(audio);
        hasher.finish()
    }

    /// Key for a text-to-speech request
    #[must_use]
    pub fn for_synthesis(
        provider: &str,
        voice: &str,
        language: &str,
        speed: f32,
        format: AudioFormat,
        text: &str,
    ) -> Self {
        // Quantize speed to avoid floating point comparison issues
        let speed = format!("{speed:.2}");
        let mut hasher = KeyHasher::new(ProviderCategory::Tts, provider);
        hasher.field(voice.as_bytes());
        hasher.field(language.as_bytes());
        hasher.field(speed.as_bytes());
        hasher.field(format.extension().as_bytes());
        hasher.field(text.as_bytes());
        hasher.finish()
    }

    /// The key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

struct KeyHasher {
    category: ProviderCategory,
    provider: String,
    inner: blake3::Hasher,
}

impl KeyHasher {
    fn new(category: ProviderCategory, provider: &str) -> Self {
        let provider = provider.trim().to_lowercase();
        let mut inner = blake3::Hasher::new();
        length_prefixed(&mut inner, category.as_str().as_bytes());
        length_prefixed(&mut inner, provider.as_bytes());
        Self {
            category,
            provider,
            inner,
        }
    }

    fn field(&mut self, bytes: &[u8]) {
        length_prefixed(&mut self.inner, bytes);
    }

    fn finish(self) -> CacheKey {
        let digest = self.inner.finalize();
        CacheKey(format!(
            "{}:{}:{}",
            self.category,
            self.provider,
            digest.to_hex()
        ))
    }
}

fn length_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
