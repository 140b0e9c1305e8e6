//! Application layer - Provider routing and resilience core
//!
//! Routes speech-to-text and text-to-speech requests across a priority-ordered
//! chain of providers. Each provider call runs behind its own connection pool,
//! retry policy and circuit breaker; results are cached by content.
//!
//! Concrete provider clients and cache backends plug in through [`ports`].

pub mod config;
pub mod error;
pub mod ports;
pub mod resilience;
pub mod services;

#[cfg(test)]
mod testing;

pub use config::{CachePolicy, HealthCheckConfig, ProviderSettings, VoiceCoreConfig};
pub use error::{ApplicationError, ProviderAttempt};
pub use ports::*;
pub use services::*;
