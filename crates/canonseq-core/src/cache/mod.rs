//! Result cache for external lookups.
//!
//! One SQLite file holds every namespace (one per external source). Values are
//! opaque bytes; [`get_json`] and [`set_json`] layer serde on top and turn
//! storage failures into warnings so a broken cache only costs extra calls.

mod sqlite;
mod traits;

pub use sqlite::SqliteCache;
pub use traits::{CacheBackend, CacheConfig, CacheEntry, CacheMeta, CacheStats};

use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::warn;

/// Read a JSON value from the cache.
///
/// Storage errors and undecodable payloads are logged and reported as a miss.
pub fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheBackend,
    namespace: &str,
    key: &str,
) -> Option<T> {
    let bytes = match cache.get(namespace, key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            warn!("Cache read {}:{} failed: {}", namespace, key, e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding undecodable cache entry {}:{}: {}", namespace, key, e);
            if let Err(e) = cache.invalidate(namespace, key) {
                warn!("Failed to invalidate {}:{}: {}", namespace, key, e);
            }
            None
        }
    }
}

/// Store a JSON value in the cache, logging instead of failing.
pub fn set_json<T: Serialize>(
    cache: &dyn CacheBackend,
    namespace: &str,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) {
    let bytes = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to encode cache entry {}:{}: {}", namespace, key, e);
            return;
        }
    };
    if let Err(e) = cache.set(namespace, key, &bytes, ttl) {
        warn!("Cache write {}:{} failed: {}", namespace, key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: String,
    }

    #[test]
    fn test_json_helpers() {
        let cache = SqliteCache::in_memory(CacheConfig::default()).unwrap();
        let record = Record { id: "672".into() };

        set_json(&cache, "ncbi_gene", "BRCA1", &record, None);
        assert_eq!(get_json::<Record>(&cache, "ncbi_gene", "BRCA1"), Some(record));
        assert_eq!(get_json::<Record>(&cache, "ncbi_gene", "BRCA2"), None);
    }

    #[test]
    fn test_undecodable_entry_is_dropped() {
        let cache = SqliteCache::in_memory(CacheConfig::default()).unwrap();
        cache.set("ns", "k", b"not json", None).unwrap();

        assert_eq!(get_json::<Record>(&cache, "ns", "k"), None);
        assert!(cache.peek("ns", "k").unwrap().is_none());
    }

    #[test]
    fn test_failed_write_is_swallowed() {
        let cache = SqliteCache::in_memory(CacheConfig::default().with_max_size(4)).unwrap();
        set_json(&cache, "ns", "k", &Record { id: "too long".into() }, None);
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }
}
