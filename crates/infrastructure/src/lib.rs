//! Infrastructure layer - Adapters for the voice routing core
//!
//! Implements the cache port with Moka, loads configuration from file and
//! environment, sets up logging and wires a ready-to-initialize
//! [`application::VoiceOrchestrator`].

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod telemetry;

pub use bootstrap::build_orchestrator;
pub use cache::{MokaCache, MokaCacheConfig};
pub use config::{AppConfig, CacheConfig, ConfigLoadError};
pub use telemetry::{LogFormat, TelemetryConfig, TelemetryError, init_telemetry};
