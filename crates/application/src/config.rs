//! Typed core configuration
//!
//! Deserialised once at startup (see `infrastructure::config`) and validated
//! by [`VoiceCoreConfig::validate`]. Nothing here is re-checked per request.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use domain::{ProviderCategory, ProviderIdentity};
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;
use crate::ports::ttl;
use crate::resilience::{BackoffStrategy, ConnectionConfig};

const fn default_true() -> bool {
    true
}

/// Settings for one configured provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider name, unique within its category
    pub name: String,

    /// Position in the fallback chain; lower runs first
    #[serde(default)]
    pub priority: u32,

    /// Disabled providers never appear in a chain
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Vendor-specific options passed through to the factory
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    /// Overrides the default connection settings for this provider
    #[serde(default)]
    pub connection: Option<ConnectionConfig>,
}

impl ProviderSettings {
    /// Enabled provider with the given priority
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            options: BTreeMap::new(),
            connection: None,
        }
    }

    /// Mark as disabled
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Add a vendor option
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Use provider-specific connection settings
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Look up a vendor option
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

const fn default_stt_ttl_secs() -> u64 {
    ttl::TRANSCRIPTION.as_secs()
}

const fn default_tts_ttl_secs() -> u64 {
    ttl::SYNTHESIS.as_secs()
}

/// Result caching policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Whether results are cached at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TTL for transcriptions in seconds (default: 24h)
    #[serde(default = "default_stt_ttl_secs")]
    pub stt_ttl_secs: u64,

    /// TTL for synthesized audio in seconds (default: 1h)
    #[serde(default = "default_tts_ttl_secs")]
    pub tts_ttl_secs: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            stt_ttl_secs: default_stt_ttl_secs(),
            tts_ttl_secs: default_tts_ttl_secs(),
        }
    }
}

impl CachePolicy {
    /// TTL for a result of the given category
    #[must_use]
    pub const fn ttl_for(&self, category: ProviderCategory) -> Duration {
        match category {
            ProviderCategory::Stt => Duration::from_secs(self.stt_ttl_secs),
            ProviderCategory::Tts => Duration::from_secs(self.tts_ttl_secs),
        }
    }
}

const fn default_health_timeout_secs() -> u64 {
    5
}

const fn default_eviction_threshold() -> u32 {
    3
}

/// Provider health probing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Deadline for a single probe in seconds
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,

    /// Consecutive failed probes before the cached instance is dropped
    /// (0 disables eviction)
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_health_timeout_secs(),
            eviction_threshold: default_eviction_threshold(),
        }
    }
}

impl HealthCheckConfig {
    /// Probe deadline as a duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration of the voice routing core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceCoreConfig {
    /// Speech-to-text providers
    #[serde(default)]
    pub stt_providers: Vec<ProviderSettings>,

    /// Text-to-speech providers
    #[serde(default)]
    pub tts_providers: Vec<ProviderSettings>,

    /// Connection defaults applied to every provider without an override
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Result caching
    #[serde(default)]
    pub cache: CachePolicy,

    /// Health probing
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

impl VoiceCoreConfig {
    /// Add a speech-to-text provider
    #[must_use]
    pub fn with_stt_provider(mut self, provider: ProviderSettings) -> Self {
        self.stt_providers.push(provider);
        self
    }

    /// Add a text-to-speech provider
    #[must_use]
    pub fn with_tts_provider(mut self, provider: ProviderSettings) -> Self {
        self.tts_providers.push(provider);
        self
    }

    /// Replace the connection defaults
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Replace the cache policy
    #[must_use]
    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the health check settings
    #[must_use]
    pub fn with_health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = health_check;
        self
    }

    /// Providers configured for `category`
    pub fn providers(&self, category: ProviderCategory) -> &[ProviderSettings] {
        match category {
            ProviderCategory::Stt => &self.stt_providers,
            ProviderCategory::Tts => &self.tts_providers,
        }
    }

    /// Settings for `identity`, if configured
    pub fn provider(&self, identity: &ProviderIdentity) -> Option<&ProviderSettings> {
        self.providers(identity.category())
            .iter()
            .find(|p| p.name.trim().eq_ignore_ascii_case(identity.name()))
    }

    /// Identities of every configured provider, enabled or not
    pub fn identities(&self) -> impl Iterator<Item = ProviderIdentity> + '_ {
        [ProviderCategory::Stt, ProviderCategory::Tts]
            .into_iter()
            .flat_map(move |category| {
                self.providers(category)
                    .iter()
                    .map(move |p| ProviderIdentity::new(&p.name, category))
            })
    }

    /// Number of enabled providers across both categories
    pub fn enabled_count(&self) -> usize {
        self.stt_providers
            .iter()
            .chain(&self.tts_providers)
            .filter(|p| p.enabled)
            .count()
    }

    /// Validate the whole configuration
    ///
    /// Empty or duplicate names and duplicate priorities among the enabled
    /// providers of one category are rejected, as is a configuration without
    /// any enabled provider. A category may be left empty.
    pub fn validate(&self) -> Result<(), ApplicationError> {
        for category in [ProviderCategory::Stt, ProviderCategory::Tts] {
            validate_category(category, self.providers(category))?;
        }

        if self.enabled_count() == 0 {
            return Err(ApplicationError::Configuration(
                "no providers enabled".to_string(),
            ));
        }

        validate_connection("defaults", &self.connection)?;
        for provider in self.stt_providers.iter().chain(&self.tts_providers) {
            if let Some(connection) = &provider.connection {
                validate_connection(&provider.name, connection)?;
            }
        }

        Ok(())
    }
}

fn validate_category(
    category: ProviderCategory,
    providers: &[ProviderSettings],
) -> Result<(), ApplicationError> {
    let mut names = HashSet::new();
    let mut priorities = HashSet::new();

    for provider in providers {
        let name = provider.name.trim().to_lowercase();
        if name.is_empty() {
            return Err(ApplicationError::Configuration(format!(
                "{category} provider with empty name"
            )));
        }
        if !names.insert(name) {
            return Err(ApplicationError::Configuration(format!(
                "duplicate {category} provider '{}'",
                provider.name
            )));
        }
        if provider.enabled && !priorities.insert(provider.priority) {
            return Err(ApplicationError::Configuration(format!(
                "duplicate {category} priority {} (provider '{}')",
                provider.priority, provider.name
            )));
        }
    }

    Ok(())
}

fn validate_connection(owner: &str, config: &ConnectionConfig) -> Result<(), ApplicationError> {
    let invalid = |what: &str| {
        Err(ApplicationError::Configuration(format!(
            "invalid connection settings for '{owner}': {what}"
        )))
    };

    if config.max_connections == 0 {
        return invalid("max_connections must be at least 1");
    }
    if config.circuit_breaker.failure_threshold == 0 || config.circuit_breaker.success_threshold == 0
    {
        return invalid("circuit breaker thresholds must be at least 1");
    }
    if config.circuit_breaker.call_timeout_secs == 0 {
        return invalid("call_timeout_secs must be at least 1");
    }

    let retry = &config.retry;
    if !retry.base_delay_secs.is_finite() || retry.base_delay_secs < 0.0 {
        return invalid("base_delay_secs must be a non-negative number");
    }
    if !retry.max_delay_secs.is_finite() || retry.max_delay_secs < 0.0 {
        return invalid("max_delay_secs must be a non-negative number");
    }
    if retry.strategy == BackoffStrategy::Exponential
        && (!retry.factor.is_finite() || retry.factor < 1.0)
    {
        return invalid("exponential factor must be at least 1.0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::RetryPolicy;

    fn valid() -> VoiceCoreConfig {
        VoiceCoreConfig::default()
            .with_stt_provider(ProviderSettings::new("openai", 1))
            .with_stt_provider(ProviderSettings::new("google", 2))
            .with_tts_provider(ProviderSettings::new("elevenlabs", 1))
    }

    fn config_error(config: &VoiceCoreConfig) -> String {
        match config.validate() {
            Err(ApplicationError::Configuration(msg)) => msg,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn duplicate_priority_is_rejected() {
        let config = valid().with_stt_provider(ProviderSettings::new("yandex", 2));
        assert!(config_error(&config).contains("priority 2"));
    }

    #[test]
    fn duplicate_priority_of_disabled_provider_is_ignored() {
        let config = valid().with_stt_provider(ProviderSettings::new("yandex", 2).disabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn same_priority_in_other_category_is_fine() {
        let config = valid().with_tts_provider(ProviderSettings::new("openai", 2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_name_is_rejected_case_insensitively() {
        let config = valid().with_stt_provider(ProviderSettings::new("OpenAI", 9));
        assert!(config_error(&config).contains("duplicate stt provider"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let config = valid().with_tts_provider(ProviderSettings::new("  ", 5));
        assert!(config_error(&config).contains("empty name"));
    }

    #[test]
    fn no_enabled_provider_is_rejected() {
        let config = VoiceCoreConfig::default()
            .with_stt_provider(ProviderSettings::new("openai", 1).disabled());
        assert_eq!(config_error(&config), "no providers enabled");
        assert_eq!(config_error(&VoiceCoreConfig::default()), "no providers enabled");
    }

    #[test]
    fn empty_category_is_allowed() {
        let config =
            VoiceCoreConfig::default().with_tts_provider(ProviderSettings::new("openai", 1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_provider_connection_is_rejected() {
        let broken = ConnectionConfig::default().with_retry(RetryPolicy {
            factor: 0.5,
            ..RetryPolicy::default()
        });
        let config =
            valid().with_tts_provider(ProviderSettings::new("azure", 2).with_connection(broken));
        assert!(config_error(&config).contains("azure"));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config = valid().with_connection(ConnectionConfig::default().with_max_connections(0));
        assert!(config_error(&config).contains("max_connections"));
    }

    #[test]
    fn provider_lookup_by_identity() {
        let config = valid();
        let settings = config.provider(&ProviderIdentity::stt("Google")).unwrap();
        assert_eq!(settings.priority, 2);
        assert!(config.provider(&ProviderIdentity::tts("google")).is_none());
        assert_eq!(config.identities().count(), 3);
    }

    #[test]
    fn cache_policy_defaults() {
        let policy = CachePolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.ttl_for(ProviderCategory::Stt), Duration::from_secs(86_400));
        assert_eq!(policy.ttl_for(ProviderCategory::Tts), Duration::from_secs(3_600));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "stt_providers": [
                {"name": "openai", "priority": 1, "options": {"model": "whisper-1"}},
                {"name": "google", "priority": 2, "enabled": false}
            ],
            "cache": {"tts_ttl_secs": 60}
        }"#;
        let config: VoiceCoreConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.stt_providers.len(), 2);
        assert!(config.stt_providers[0].enabled);
        assert_eq!(config.stt_providers[0].option("model"), Some("whisper-1"));
        assert!(!config.stt_providers[1].enabled);
        assert_eq!(config.cache.tts_ttl_secs, 60);
        assert_eq!(config.cache.stt_ttl_secs, 86_400);
        assert_eq!(config.health_check.eviction_threshold, 3);
        assert_eq!(config.connection.max_connections, 20);
    }
}
