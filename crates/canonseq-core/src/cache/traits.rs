//! Cache backend trait and types.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Configuration for cache behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// TTL for namespaces without their own entry in `namespace_ttls`.
    pub default_ttl: Duration,
    /// Global size ceiling across all namespaces (0 = unlimited).
    pub max_size_bytes: u64,
    /// Per-namespace TTL overrides.
    pub namespace_ttls: BTreeMap<String, Duration>,
}

impl CacheConfig {
    /// Default time-to-live for cache entries (1 day).
    pub const DEFAULT_TTL_SECS: u64 = 86_400;
    /// Default maximum cache size (500 MB).
    pub const DEFAULT_MAX_SIZE_BYTES: u64 = 500 * 1024 * 1024;

    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_namespace_ttl(mut self, namespace: impl Into<String>, ttl: Duration) -> Self {
        self.namespace_ttls.insert(namespace.into(), ttl);
        self
    }

    /// TTL applied when `set` is called without an explicit one.
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.namespace_ttls
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(CacheConfig::DEFAULT_TTL_SECS),
            max_size_bytes: CacheConfig::DEFAULT_MAX_SIZE_BYTES,
            namespace_ttls: BTreeMap::new(),
        }
    }
}

/// A cached entry with metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub namespace: String,
    pub key: String,
    /// The cached payload.
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Always later than `created_at`.
    pub expires_at: DateTime<Utc>,
    /// Number of `get` hits served by this entry.
    pub hit_count: u64,
    /// `None` until the first hit.
    pub last_accessed: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

/// Usage of a single namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub namespace: String,
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

/// Cache statistics across all namespaces.
///
/// The four counters are cumulative over the lifetime of the cache file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub expired_count: u64,
    pub evicted_count: u64,
    pub namespaces: Vec<CacheMeta>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Generic cache backend trait.
///
/// Provides namespace-isolated key-value storage with TTL expiry and a global
/// size ceiling. Implementations serialize all mutations internally.
pub trait CacheBackend: Send + Sync {
    /// Get cached data by key, counting a hit or a miss.
    ///
    /// An expired entry is removed and reported as a miss.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Inspect an entry without touching counters or access order.
    fn peek(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

    /// Store data, evicting least-recently-used entries first if the insert
    /// would exceed the size ceiling.
    ///
    /// `ttl = None` uses the namespace TTL from the configuration.
    fn set(&self, namespace: &str, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Invalidate (delete) a specific key.
    fn invalidate(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Invalidate all keys in a namespace.
    fn invalidate_namespace(&self, namespace: &str) -> Result<usize>;

    /// Get overall cache statistics.
    fn stats(&self) -> Result<CacheStats>;

    /// Remove expired entries from all namespaces.
    ///
    /// Returns the number of entries removed.
    fn cleanup_expired(&self) -> Result<usize>;

    /// Clear all cached data. Counters are kept.
    fn clear_all(&self) -> Result<()>;
}
