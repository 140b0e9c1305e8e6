//! Cache port definition
//!
//! Result caching for the speech managers. Implementations store raw bytes
//! with a per-entry time-to-live; callers handle serialization through
//! [`CachePortExt`].

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Cache port for storing and retrieving speech results
///
/// Implementations must be thread-safe. An entry read after its TTL elapsed
/// behaves exactly like a missing entry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CachePort: Send + Sync {
    /// Get a cached value by key
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, ApplicationError>;

    /// Set a cached value with a time-to-live
    ///
    /// If the key already exists, its value and TTL are replaced.
    async fn set_bytes(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), ApplicationError>;

    /// Remove an entry, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool, ApplicationError>;

    /// Check if a live entry exists (without reading it)
    async fn exists(&self, key: &str) -> Result<bool, ApplicationError>;

    /// Whether the backing store is usable
    async fn health_check(&self) -> bool;

    /// Get cache statistics (hits, misses, size)
    fn stats(&self) -> CacheStats;

    /// Release backend resources
    async fn close(&self) {}
}

/// Extension trait for typed cache operations
#[async_trait]
pub trait CachePortExt: CachePort {
    /// Get a typed value from cache
    async fn get<T>(&self, key: &str) -> Result<Option<T>, ApplicationError>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        match self.get_bytes(key).await? {
            Some(bytes) => {
                let value: T = serde_json::from_slice(&bytes).map_err(|e| {
                    ApplicationError::Cache(format!("Cache deserialization error: {e}"))
                })?;
                Ok(Some(value))
            },
            None => Ok(None),
        }
    }

    /// Set a typed value in cache
    async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), ApplicationError>
    where
        T: serde::Serialize + Send + Sync,
    {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ApplicationError::Cache(format!("Cache serialization error: {e}")))?;
        self.set_bytes(key, bytes, ttl).await
    }
}

impl<T: CachePort + ?Sized> CachePortExt for T {}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Current number of entries
    pub entries: u64,
    /// Approximate memory usage in bytes
    pub memory_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 - 1.0)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Default TTL values per result category
pub mod ttl {
    use std::time::Duration;

    /// Transcriptions of identical audio are stable (24 hours)
    pub const TRANSCRIPTION: Duration = Duration::from_secs(24 * 60 * 60);

    /// Synthesized audio (1 hour)
    pub const SYNTHESIS: Duration = Duration::from_secs(60 * 60);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_stats_hit_rate_zero_when_empty() {
        let stats = CacheStats::default();
        assert!(stats.hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn cache_stats_hit_rate_calculates_correctly() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            entries: 10,
            memory_bytes: 1024,
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn transcription_ttl_outlives_synthesis_ttl() {
        assert!(ttl::TRANSCRIPTION > ttl::SYNTHESIS);
        assert_eq!(ttl::SYNTHESIS, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn typed_get_maps_corrupt_bytes_to_cache_error() {
        let mut mock = MockCachePort::new();
        mock.expect_get_bytes()
            .returning(|_| Ok(Some(b"not json".to_vec())));

        let result: Result<Option<String>, _> = mock.get("stt:auto:abc").await;
        assert!(matches!(result, Err(ApplicationError::Cache(_))));
    }

    #[tokio::test]
    async fn typed_set_serializes_json() {
        let mut mock = MockCachePort::new();
        mock.expect_set_bytes()
            .withf(|key, value, ttl| {
                key == "tts:auto:abc" && value == b"\"hello\"" && *ttl == ttl::SYNTHESIS
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        mock.set("tts:auto:abc", &"hello".to_string(), ttl::SYNTHESIS)
            .await
            .unwrap();
    }
}
