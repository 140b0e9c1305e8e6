//! Speech operation results

use std::time::Duration;

use bytes::Bytes;

use crate::value_objects::AudioFormat;

/// Outcome of a speech-to-text operation
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// Transcribed text
    pub text: String,
    /// Confidence score reported by the provider (0.0 - 1.0)
    pub confidence: Option<f32>,
    /// Language reported by the provider
    pub language: Option<String>,
    /// Name of the provider that produced the text
    pub provider: String,
    /// Wall-clock time spent serving the request
    pub processing_time: Duration,
    /// Whether the result was served from cache
    pub cached: bool,
}

/// Outcome of a text-to-speech operation
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedSpeech {
    /// Encoded audio
    pub audio: Bytes,
    /// Format of `audio`
    pub format: AudioFormat,
    /// Name of the provider that produced the audio
    pub provider: String,
    /// Wall-clock time spent serving the request
    pub processing_time: Duration,
    /// Whether the result was served from cache
    pub cached: bool,
}

impl SynthesizedSpeech {
    /// Size of the audio payload in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.audio.len()
    }
}
