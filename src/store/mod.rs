//! Persistent key-value store shared by the vault and the offline queue
//!
//! One SQLite table partitioned into named collections. Every operation is a
//! single statement, so each key is read and written atomically; nothing here
//! needs multi-key transactions.

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Serialize, de::DeserializeOwned};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

/// Encrypted credential and its salt
pub const AUTH_TOKENS: &str = "auth-tokens";

/// Deferred write requests, keyed by item id
pub const SYNC_QUEUE: &str = "sync-queue";

type Result<T> = std::result::Result<T, StoreError>;

/// SQLite-backed collection store
pub struct KvStore {
    conn: Mutex<Connection>,
}

impl KvStore {
    /// Open or create the store in `data_dir/state.db`
    pub fn open_at(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| StoreError::Io(format!("Failed to create data dir: {}", e)))?;

        let conn = Connection::open(data_dir.join("state.db"))?;
        Self::init(conn)
    }

    /// Volatile store for tests
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, key)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn get<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM kv WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| decode(collection, key, &json)).transpose()
    }

    /// Insert or overwrite one record
    pub fn put<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            collection: collection.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })?;

        self.conn()?.execute(
            "INSERT OR REPLACE INTO kv (collection, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![collection, key, json, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let deleted = self.conn()?.execute(
            "DELETE FROM kv WHERE collection = ?1 AND key = ?2",
            params![collection, key],
        )?;
        Ok(deleted > 0)
    }

    /// All records of a collection, ordered by key
    pub fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<(String, T)>> {
        let rows: Vec<(String, String)> = {
            let conn = self.conn()?;
            let mut stmt =
                conn.prepare("SELECT key, value FROM kv WHERE collection = ?1 ORDER BY key")?;
            let rows = stmt
                .query_map([collection], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(key, json)| {
                let value = decode(collection, &key, &json)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Remove every record of a collection (logout housekeeping)
    pub fn clear_collection(&self, collection: &str) -> Result<usize> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM kv WHERE collection = ?1", [collection])?;
        Ok(deleted)
    }
}

fn decode<T: DeserializeOwned>(collection: &str, key: &str, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        collection: collection.to_string(),
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Serde adapter storing bytes as standard base64 strings
pub mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`base64_bytes`]
pub mod base64_opt {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    }

    fn record(name: &str) -> Record {
        Record {
            name: name.to_string(),
            payload: vec![0, 159, 146, 150],
        }
    }

    #[test]
    fn test_put_get_overwrite() {
        let store = KvStore::in_memory().unwrap();
        store.put(SYNC_QUEUE, "a", &record("first")).unwrap();
        store.put(SYNC_QUEUE, "a", &record("second")).unwrap();

        let got: Record = store.get(SYNC_QUEUE, "a").unwrap().unwrap();
        assert_eq!(got, record("second"));
        assert_eq!(store.list::<Record>(SYNC_QUEUE).unwrap().len(), 1);
    }

    #[test]
    fn test_collections_are_isolated() {
        let store = KvStore::in_memory().unwrap();
        store.put(AUTH_TOKENS, "token", &record("t")).unwrap();
        store.put(SYNC_QUEUE, "token", &record("q")).unwrap();

        assert_eq!(store.clear_collection(AUTH_TOKENS).unwrap(), 1);
        assert!(store.get::<Record>(AUTH_TOKENS, "token").unwrap().is_none());
        assert!(store.get::<Record>(SYNC_QUEUE, "token").unwrap().is_some());
    }

    #[test]
    fn test_list_ordered_by_key() {
        let store = KvStore::in_memory().unwrap();
        store.put(SYNC_QUEUE, "b", &record("b")).unwrap();
        store.put(SYNC_QUEUE, "a", &record("a")).unwrap();

        let keys: Vec<String> = store
            .list::<Record>(SYNC_QUEUE)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_delete_reports_presence() {
        let store = KvStore::in_memory().unwrap();
        store.put(SYNC_QUEUE, "a", &record("a")).unwrap();
        assert!(store.delete(SYNC_QUEUE, "a").unwrap());
        assert!(!store.delete(SYNC_QUEUE, "a").unwrap());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = KvStore::open_at(dir.path()).unwrap();
            store.put(SYNC_QUEUE, "a", &record("kept")).unwrap();
        }
        let store = KvStore::open_at(dir.path()).unwrap();
        let got: Record = store.get(SYNC_QUEUE, "a").unwrap().unwrap();
        assert_eq!(got.name, "kept");
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let store = KvStore::in_memory().unwrap();
        store.put(SYNC_QUEUE, "a", &"just a string").unwrap();

        let err = store.get::<Record>(SYNC_QUEUE, "a").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
