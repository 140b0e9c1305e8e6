//! Cache backend configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::default_true;
use crate::cache::MokaCacheConfig;

/// In-memory cache backend settings
///
/// TTLs per result kind live in the voice section (`voice.cache`); this
/// section only sizes the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether a cache backend is created at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum weighted size of all entries in megabytes (default: 100)
    #[serde(default = "default_max_capacity_mb")]
    pub max_capacity_mb: u64,

    /// Evict entries not read for this many seconds (optional)
    #[serde(default)]
    pub time_to_idle_secs: Option<u64>,
}

const fn default_max_capacity_mb() -> u64 {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity_mb: default_max_capacity_mb(),
            time_to_idle_secs: None,
        }
    }
}

impl CacheConfig {
    /// Settings for the Moka backend
    #[must_use]
    pub fn moka(&self) -> MokaCacheConfig {
        MokaCacheConfig {
            max_capacity_mb: self.max_capacity_mb,
            time_to_idle: self.time_to_idle_secs.map(Duration::from_secs),
        }
    }
}
