//! SQLite-based generational cache storage
//!
//! Every entry belongs to a generation (the deployment's cache version tag).
//! Exactly one generation is active; reads and writes resolve it inside the
//! same statement, so a reader sees either the old or the new generation and
//! never a mix.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

use super::policy::{ExpirationPolicy, ResourceClass};
use crate::error::CacheError;
use crate::network::NetResponse;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 2;

/// Response headers that are never written to disk
const SESSION_HEADERS: [&str; 2] = ["set-cookie", "set-cookie2"];

type Result<T> = std::result::Result<T, CacheError>;

/// A stored response
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub class: ResourceClass,
    pub generation: String,
    pub response: NetResponse,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        ExpirationPolicy::is_fresh(self.class, self.stored_at, now)
    }
}

/// SQLite-backed generational cache storage
pub struct CacheStorage {
    conn: Connection,
    db_path: Option<PathBuf>,
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

impl CacheStorage {
    /// Open cache storage in `cache_dir/cache.db` and make `version` active
    pub fn open_at(cache_dir: &Path, version: &str) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {}", e)))?;

        let db_path = cache_dir.join("cache.db");
        let conn = Connection::open(&db_path)?;

        // Check schema version - nuke if mismatched
        let schema: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if schema != 0 && schema != SCHEMA_VERSION {
            log::info!(
                "Cache schema version mismatch ({} != {}), rebuilding",
                schema,
                SCHEMA_VERSION
            );
            drop(conn);
            std::fs::remove_file(&db_path)
                .map_err(|e| CacheError::Io(format!("Failed to remove cache DB: {}", e)))?;
            return Self::open_at(cache_dir, version);
        }

        let storage = Self {
            conn,
            db_path: Some(db_path),
        };
        storage.init(version)?;
        Ok(storage)
    }

    /// Volatile storage for tests
    #[cfg(test)]
    pub fn in_memory(version: &str) -> Result<Self> {
        let storage = Self {
            conn: Connection::open_in_memory()?,
            db_path: None,
        };
        storage.init(version)?;
        Ok(storage)
    }

    fn init(&self, version: &str) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS generations (
                version TEXT PRIMARY KEY NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                generation TEXT NOT NULL,
                store_name TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                partition TEXT,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (generation, store_name, cache_key)
            );

            CREATE INDEX IF NOT EXISTS idx_expires_at ON cache_entries(expires_at);
            CREATE INDEX IF NOT EXISTS idx_store ON cache_entries(generation, store_name, stored_at);
            "#,
        )?;

        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;

        self.activate_generation(version)?;
        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Version tag of the active generation
    pub fn active_generation(&self) -> Result<Option<String>> {
        let version = self
            .conn
            .query_row(
                "SELECT version FROM generations WHERE active = 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(version)
    }

    /// Fresh entry for `key`, or `None` when absent or stale at `now`.
    ///
    /// The interceptor strategies read through [`Self::get_any`] instead,
    /// since every strategy may serve a stale entry when the network fails.
    #[allow(dead_code)]
    pub fn get(
        &self,
        class: ResourceClass,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        Ok(self.get_any(class, key)?.filter(|e| e.is_fresh(now)))
    }

    /// Entry for `key` regardless of freshness
    pub fn get_any(&self, class: ResourceClass, key: &str) -> Result<Option<CacheEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT e.generation, e.status, e.headers, e.body, e.stored_at, e.expires_at
                 FROM cache_entries e
                 JOIN generations g ON g.version = e.generation AND g.active = 1
                 WHERE e.store_name = ?1 AND e.cache_key = ?2",
                params![class.store_name(), key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u16>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((generation, status, headers, body, stored_at, expires_at)) = row else {
            return Ok(None);
        };

        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
            .map_err(|e| CacheError::Corrupt(format!("headers for {}: {}", key, e)))?;

        Ok(Some(CacheEntry {
            class,
            generation,
            response: NetResponse {
                status,
                headers,
                body,
            },
            stored_at: from_ts(stored_at),
            expires_at: from_ts(expires_at),
        }))
    }

    /// Store a response in the active generation, overwriting any previous
    /// entry for the key. The store is then trimmed to its class ceiling.
    pub fn put(
        &self,
        class: ResourceClass,
        key: &str,
        partition: Option<&str>,
        response: &NetResponse,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let expires = ExpirationPolicy::expires_at(class, now);
        let headers: Vec<&(String, String)> = response
            .headers
            .iter()
            .filter(|(name, _)| !SESSION_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)))
            .collect();
        let headers =
            serde_json::to_string(&headers).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        // Single statement: the entry lands whole in whichever generation is
        // active when it executes
        self.conn.execute(
            "INSERT OR REPLACE INTO cache_entries
             (generation, store_name, cache_key, partition, status, headers, body,
              stored_at, expires_at, size_bytes)
             SELECT version, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
             FROM generations WHERE active = 1",
            params![
                class.store_name(),
                key,
                partition,
                response.status,
                headers,
                response.body,
                now.timestamp(),
                expires.timestamp(),
                response.body.len()
            ],
        )?;

        self.trim_store(class, class.max_entries())?;
        Ok(())
    }

    /// Drop the oldest entries of a store beyond `max_entries`
    pub fn trim_store(&self, class: ResourceClass, max_entries: usize) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM cache_entries
             WHERE store_name = ?1 AND rowid IN (
                 SELECT rowid FROM cache_entries
                 WHERE store_name = ?1
                 ORDER BY stored_at DESC, rowid DESC
                 LIMIT -1 OFFSET ?2
             )",
            params![class.store_name(), max_entries as i64],
        )?;
        if removed > 0 {
            log::debug!("Trimmed {} entries from {}", removed, class);
        }
        Ok(removed)
    }

    /// Delete every entry whose expiry instant has passed
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM cache_entries WHERE expires_at < ?1",
            [now.timestamp()],
        )?;
        Ok(removed)
    }

    /// Atomically switch to generation `version`.
    ///
    /// The new generation row is created and marked active before the old
    /// generation's entries are deleted, all in one transaction. A crash at
    /// any point leaves either the old state or the new one.
    pub fn activate_generation(&self, version: &str) -> Result<ActivationStats> {
        let previous = self.active_generation()?;
        if previous.as_deref() == Some(version) {
            return Ok(ActivationStats {
                previous,
                entries_removed: 0,
            });
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO generations (version, active, created_at) VALUES (?1, 0, ?2)",
            params![version, Utc::now().timestamp()],
        )?;
        tx.execute(
            "UPDATE generations SET active = (version = ?1)",
            [version],
        )?;
        let entries_removed =
            tx.execute("DELETE FROM cache_entries WHERE generation != ?1", [version])?;
        tx.execute("DELETE FROM generations WHERE version != ?1", [version])?;
        tx.commit()?;

        log::info!(
            "Cache generation {} active (was {}), {} entries dropped",
            version,
            previous.as_deref().unwrap_or("none"),
            entries_removed
        );

        Ok(ActivationStats {
            previous,
            entries_removed,
        })
    }

    /// Delete a store's entries, optionally only those of one auth partition
    pub fn invalidate(&self, class: ResourceClass, partition: Option<&str>) -> Result<usize> {
        let deleted = match partition {
            Some(p) => self.conn.execute(
                "DELETE FROM cache_entries WHERE store_name = ?1 AND partition = ?2",
                params![class.store_name(), p],
            )?,
            None => self.conn.execute(
                "DELETE FROM cache_entries WHERE store_name = ?1",
                params![class.store_name()],
            )?,
        };
        Ok(deleted)
    }

    /// Clear all cache entries
    pub fn clear_all(&self) -> Result<ClearStats> {
        let removed = self.conn.execute("DELETE FROM cache_entries", [])?;
        Ok(ClearStats {
            entries_removed: removed,
        })
    }

    /// Per-store statistics for the active generation, one row per store
    pub fn stats(&self, now: DateTime<Utc>) -> Result<Vec<StoreStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.store_name,
                    COUNT(*),
                    SUM(CASE WHEN e.expires_at >= ?1 THEN 1 ELSE 0 END),
                    COALESCE(SUM(e.size_bytes), 0),
                    MIN(e.stored_at),
                    MAX(e.stored_at)
             FROM cache_entries e
             JOIN generations g ON g.version = e.generation AND g.active = 1
             GROUP BY e.store_name
             ORDER BY e.store_name",
        )?;

        let rows = stmt
            .query_map([now.timestamp()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut found: Vec<StoreStats> = rows
            .into_iter()
            .filter_map(|(name, total, fresh, size, oldest, newest)| {
                Some(StoreStats {
                    class: ResourceClass::from_store_name(&name)?,
                    total_entries: total as usize,
                    fresh_entries: fresh as usize,
                    expired_entries: (total - fresh) as usize,
                    total_size_bytes: size as usize,
                    oldest_entry: oldest,
                    newest_entry: newest,
                })
            })
            .collect();

        Ok(ResourceClass::ALL
            .into_iter()
            .map(|class| match found.iter().position(|s| s.class == class) {
                Some(idx) => found.swap_remove(idx),
                None => StoreStats::empty(class),
            })
            .collect())
    }
}

/// Outcome of a generation cutover
#[derive(Debug)]
pub struct ActivationStats {
    pub previous: Option<String>,
    pub entries_removed: usize,
}

/// Statistics about cache clear operation
#[derive(Debug)]
pub struct ClearStats {
    pub entries_removed: usize,
}

/// Statistics for one store
#[derive(Debug)]
pub struct StoreStats {
    pub class: ResourceClass,
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: usize,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}

impl StoreStats {
    fn empty(class: ResourceClass) -> Self {
        Self {
            class,
            total_entries: 0,
            fresh_entries: 0,
            expired_entries: 0,
            total_size_bytes: 0,
            oldest_entry: None,
            newest_entry: None,
        }
    }
}
