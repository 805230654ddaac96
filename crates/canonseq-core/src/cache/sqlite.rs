//! SQLite-backed result cache.

use super::traits::{CacheBackend, CacheConfig, CacheEntry, CacheMeta, CacheStats};
use crate::error::{CanonError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const HITS: &str = "hits";
const MISSES: &str = "misses";
const EXPIRED: &str = "expired";
const EVICTED: &str = "evicted";

/// SQLite-based cache backend.
///
/// Provides namespace-isolated caching with a single shared database.
/// Thread-safe via internal mutex on the connection; every mutation runs in
/// its own transaction so counters and rows never disagree.
///
/// Access order is tracked with a monotonic sequence number that is assigned
/// on insert and bumped on every hit, so an entry that was never read sorts by
/// its creation order.
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    config: CacheConfig,
    durable: bool,
}

impl SqliteCache {
    /// Open (or create) the cache at `db_path`, purging expired entries.
    pub fn open(db_path: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CanonError::Io {
                    message: format!("Failed to create cache directory: {}", e),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| CanonError::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| CanonError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let cache = Self::from_connection(conn, config, true)?;
        let purged = cache.cleanup_expired()?;
        info!(
            "Opened cache at {} ({} expired entries purged)",
            db_path.display(),
            purged
        );
        Ok(cache)
    }

    /// Create a process-local cache that is discarded on drop.
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CanonError::Database {
            message: format!("Failed to open in-memory cache: {}", e),
            source: Some(e),
        })?;
        Self::from_connection(conn, config, false)
    }

    /// Open the cache at `db_path`, degrading to an in-memory cache if the
    /// file cannot be opened.
    pub fn open_or_in_memory(db_path: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        let db_path = db_path.as_ref();
        match Self::open(db_path, config.clone()) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                warn!(
                    "Cache at {} unavailable, using in-memory cache: {}",
                    db_path.display(),
                    e
                );
                Self::in_memory(config)
            }
        }
    }

    /// Whether entries survive a restart.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn from_connection(conn: Connection, config: CacheConfig, durable: bool) -> Result<Self> {
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
            durable,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| CanonError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT,
                access_seq INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expires
                ON cache_entries(expires_at);

            CREATE INDEX IF NOT EXISTS idx_cache_access
                ON cache_entries(access_seq);

            CREATE TABLE IF NOT EXISTS cache_counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .map_err(|e| CanonError::Database {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })?;

        for name in [HITS, MISSES, EXPIRED, EVICTED] {
            conn.execute(
                "INSERT OR IGNORE INTO cache_counters (name, value) VALUES (?1, 0)",
                params![name],
            )?;
        }

        Ok(())
    }

    fn expiry_for(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<DateTime<Utc>> {
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(namespace));
        if ttl.is_zero() {
            return Err(CanonError::Validation {
                field: "ttl".into(),
                message: "cache TTL must be positive".into(),
            });
        }
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| CanonError::Validation {
            field: "ttl".into(),
            message: e.to_string(),
        })?;
        now.checked_add_signed(ttl)
            .ok_or_else(|| CanonError::Validation {
                field: "ttl".into(),
                message: "cache TTL overflows the calendar".into(),
            })
    }
}

/// Fixed-width RFC 3339 timestamps compare correctly as strings.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CanonError::Database {
            message: format!("Invalid timestamp {:?} in cache: {}", value, e),
            source: None,
        })
}

fn bump(tx: &Transaction<'_>, counter: &str, by: u64) -> Result<()> {
    if by > 0 {
        tx.execute(
            "UPDATE cache_counters SET value = value + ?1 WHERE name = ?2",
            params![by as i64, counter],
        )?;
    }
    Ok(())
}

fn next_seq(tx: &Transaction<'_>) -> Result<i64> {
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(access_seq), 0) + 1 FROM cache_entries",
        [],
        |row| row.get(0),
    )?;
    Ok(seq)
}

impl CacheBackend for SqliteCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = ts(Utc::now());

        let row: Option<(Vec<u8>, String)> = tx
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let result = match row {
            None => {
                bump(&tx, MISSES, 1)?;
                None
            }
            Some((_, expires_at)) if expires_at <= now => {
                tx.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                bump(&tx, EXPIRED, 1)?;
                bump(&tx, MISSES, 1)?;
                debug!("Cache entry {}:{} expired", namespace, key);
                None
            }
            Some((value, _)) => {
                let seq = next_seq(&tx)?;
                tx.execute(
                    "UPDATE cache_entries
                     SET hit_count = hit_count + 1, last_accessed = ?1, access_seq = ?2
                     WHERE namespace = ?3 AND key = ?4",
                    params![now, seq, namespace, key],
                )?;
                bump(&tx, HITS, 1)?;
                Some(value)
            }
        };

        tx.commit()?;
        Ok(result)
    }

    fn peek(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock()?;

        let row: Option<(Vec<u8>, String, String, i64, Option<String>, i64)> = conn
            .query_row(
                "SELECT value, created_at, expires_at, hit_count, last_accessed, size_bytes
                 FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((value, created_at, expires_at, hit_count, last_accessed, size_bytes)) = row else {
            return Ok(None);
        };

        Ok(Some(CacheEntry {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            created_at: parse_ts(&created_at)?,
            expires_at: parse_ts(&expires_at)?,
            hit_count: hit_count as u64,
            last_accessed: last_accessed.as_deref().map(parse_ts).transpose()?,
            size_bytes: size_bytes as u64,
        }))
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let created_at = Utc::now();
        let expires_at = self.expiry_for(namespace, created_at, ttl)?;
        let size = value.len() as u64;
        let max_size = self.config.max_size_bytes;

        if max_size > 0 && size > max_size {
            return Err(CanonError::Validation {
                field: "value".into(),
                message: format!(
                    "{} bytes exceeds the cache ceiling of {} bytes",
                    size, max_size
                ),
            });
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if max_size > 0 {
            let existing: i64 = tx
                .query_row(
                    "SELECT size_bytes FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);
            let total: i64 = tx.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries",
                [],
                |row| row.get(0),
            )?;

            let mut projected = (total - existing) as u64 + size;
            if projected > max_size {
                let victims: Vec<(String, String, i64)> = {
                    let mut stmt = tx.prepare(
                        "SELECT namespace, key, size_bytes FROM cache_entries
                         WHERE NOT (namespace = ?1 AND key = ?2)
                         ORDER BY access_seq ASC",
                    )?;
                    let rows = stmt.query_map(params![namespace, key], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?;
                    let victims = rows.collect::<std::result::Result<_, _>>()?;
                    victims
                };

                let mut evicted = 0u64;
                for (victim_ns, victim_key, victim_size) in victims {
                    if projected <= max_size {
                        break;
                    }
                    tx.execute(
                        "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                        params![victim_ns, victim_key],
                    )?;
                    projected -= victim_size as u64;
                    evicted += 1;
                    debug!("Evicted cache entry {}:{}", victim_ns, victim_key);
                }
                bump(&tx, EVICTED, evicted)?;
            }
        }

        let seq = next_seq(&tx)?;
        tx.execute(
            "INSERT OR REPLACE INTO cache_entries
             (namespace, key, value, created_at, expires_at, size_bytes, hit_count, last_accessed, access_seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7)",
            params![
                namespace,
                key,
                value,
                ts(created_at),
                ts(expires_at),
                size as i64,
                seq
            ],
        )?;

        tx.commit()?;
        debug!("Cached {}:{} ({} bytes)", namespace, key, size);
        Ok(())
    }

    fn invalidate(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(deleted > 0)
    }

    fn invalidate_namespace(&self, namespace: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1",
            params![namespace],
        )?;
        debug!("Invalidated {} entries in namespace {}", deleted, namespace);
        Ok(deleted)
    }

    fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock()?;

        let (total_entries, total_size_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let counter = |name: &str| -> Result<u64> {
            let value: i64 = conn.query_row(
                "SELECT value FROM cache_counters WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(value as u64)
        };
        let hit_count = counter(HITS)?;
        let miss_count = counter(MISSES)?;
        let expired_count = counter(EXPIRED)?;
        let evicted_count = counter(EVICTED)?;

        let mut stmt = conn.prepare(
            "SELECT namespace, COUNT(*), COALESCE(SUM(size_bytes), 0)
             FROM cache_entries GROUP BY namespace ORDER BY namespace",
        )?;
        let namespaces = stmt
            .query_map([], |row| {
                Ok(CacheMeta {
                    namespace: row.get(0)?,
                    entry_count: row.get::<_, i64>(1)? as usize,
                    total_size_bytes: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CacheStats {
            total_entries: total_entries as usize,
            total_size_bytes: total_size_bytes as u64,
            max_size_bytes: self.config.max_size_bytes,
            hit_count,
            miss_count,
            expired_count,
            evicted_count,
            namespaces,
        })
    }

    fn cleanup_expired(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![ts(Utc::now())],
        )?;
        bump(&tx, EXPIRED, deleted as u64)?;
        tx.commit()?;

        if deleted > 0 {
            debug!("Cleaned up {} expired cache entries", deleted);
        }
        Ok(deleted)
    }

    fn clear_all(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM cache_entries", [])?;
        info!("Cleared all cache entries");
        Ok(())
    }
}
