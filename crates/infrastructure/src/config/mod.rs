//! Application configuration
//!
//! Split into focused sections:
//! - `voice`: providers, connection defaults, result caching and health probes
//! - `cache`: in-memory cache backend sizing
//! - `telemetry`: log filter and output format
//!
//! Values come from an optional `voicerelay.toml` and are overridden by
//! `VOICERELAY__*` environment variables, with `__` separating nested keys
//! (e.g. `VOICERELAY__VOICE__CONNECTION__MAX_CONNECTIONS=50`).

mod cache;

use std::path::Path;

use application::{VoiceCoreConfig, error::ApplicationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use cache::CacheConfig;

use crate::telemetry::TelemetryConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VOICERELAY";

/// Default configuration file name, without extension
pub const DEFAULT_FILE: &str = "voicerelay";

/// Shared default for boolean `true` fields across config structs
pub(crate) const fn default_true() -> bool {
    true
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The file or environment could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    /// The values were read but are inconsistent
    #[error(transparent)]
    Invalid(#[from] ApplicationError),
}

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider routing core
    #[serde(default)]
    pub voice: VoiceCoreConfig,

    /// Cache backend
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from `voicerelay.toml` in the working directory (if present)
    /// and the environment
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::build(config::File::with_name(DEFAULT_FILE).required(false))
    }

    /// Load from an explicit file and the environment
    ///
    /// The format is taken from the file extension.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration file");
        Self::build(config::File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigLoadError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the voice section for consistency
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.voice.validate()?;
        Ok(())
    }
}
