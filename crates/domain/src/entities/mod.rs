//! Entities - Immutable request and result values of a speech operation

mod speech_request;
mod speech_result;

pub use speech_request::{DEFAULT_SPEED, SynthesisRequest, TranscriptionRequest};
pub use speech_result::{SynthesizedSpeech, Transcription};
