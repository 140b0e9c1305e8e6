//! Port definitions for the application layer
//!
//! Ports are the interfaces through which the routing core talks to the
//! outside: concrete provider clients, the provider factory and the cache
//! backend. Adapters live outside this crate.

mod cache_port;
mod provider_port;

#[cfg(test)]
pub use cache_port::MockCachePort;
pub use cache_port::{CachePort, CachePortExt, CacheStats, ttl};
pub use provider_port::{
    HealthCheckable, ProviderError, ProviderFactory, ProviderHandle, ProviderLifecycle,
    SpeechToTextProvider, SynthesisOutput, TextToSpeechProvider, TranscriptionOutput,
};
