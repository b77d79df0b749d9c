//! SQLite-backed TTL cache.
//!
//! One table per cache instance:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS <table> (
//!     key   TEXT PRIMARY KEY NOT NULL,
//!     ttl   INTEGER,          -- expiry, unix epoch milliseconds; NULL never expires
//!     value TEXT NOT NULL     -- CacheValue encoding
//! )
//! ```
//!
//! `rusqlite` is synchronous, so every statement runs on the blocking pool
//! while holding the connection mutex.

use crate::cache::{Cache, ValueStream};
use crate::codec::CacheValue;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// TTL cache persisted in a SQLite table.
pub struct SqliteCache<V> {
    conn: Arc<Mutex<Connection>>,
    table: Arc<str>,
    _value: PhantomData<fn() -> V>,
}

impl<V: CacheValue> SqliteCache<V> {
    /// Opens (or creates) the database at `path` and ensures `table` exists.
    pub fn open(path: impl AsRef<Path>, table: &str) -> CacheResult<Self> {
        Self::with_connection(Connection::open(path)?, table)
    }

    /// Creates a cache in a private in-memory database.
    pub fn in_memory(table: &str) -> CacheResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    /// Wraps an existing connection. Several caches may share one database
    /// file as long as their table names differ.
    pub fn with_connection(conn: Connection, table: &str) -> CacheResult<Self> {
        validate_identifier(table)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                key   TEXT PRIMARY KEY NOT NULL,
                ttl   INTEGER,
                value TEXT NOT NULL
            );"
        ))?;
        debug!(table, "sqlite cache ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: Arc::from(table),
            _value: PhantomData,
        })
    }

    /// Name of the backing table.
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn run<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> CacheResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = Arc::clone(&self.table);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn, &table)
        })
        .await?
    }
}

fn validate_identifier(name: &str) -> CacheResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidIdentifier(name.to_string()))
    }
}

fn now_millis() -> i64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(since_epoch.as_millis()).unwrap_or(i64::MAX)
}

fn expiry_millis(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[async_trait]
impl<V: CacheValue> Cache<V> for SqliteCache<V> {
    async fn get(&self, key: &str) -> CacheResult<Option<V>> {
        let key = key.to_string();
        self.run(move |conn, table| {
            let row: Option<(String, Option<i64>)> = conn
                .prepare_cached(&format!(
                    "SELECT value, ttl FROM \"{table}\" WHERE key = ?1"
                ))?
                .query_row(params![key], |r| Ok((r.get(0)?, r.get(1)?)))
                .optional()?;
            match row {
                Some((_, Some(ttl))) if ttl <= now_millis() => {
                    conn.prepare_cached(&format!("DELETE FROM \"{table}\" WHERE key = ?1"))?
                        .execute(params![key])?;
                    cache_event!(trace, key = %key, "sqlite cache entry expired");
                    Ok(None)
                }
                Some((value, _)) => V::decode(&value).map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, ttl: Duration, key: &str, value: V) -> CacheResult<()> {
        let key = key.to_string();
        let text = value.encode()?;
        let expires = expiry_millis(ttl);
        self.run(move |conn, table| {
            conn.prepare_cached(&format!(
                "INSERT OR REPLACE INTO \"{table}\" (key, ttl, value) VALUES (?1, ?2, ?3)"
            ))?
            .execute(params![key, expires, text])?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = key.to_string();
        self.run(move |conn, table| {
            conn.prepare_cached(&format!("DELETE FROM \"{table}\" WHERE key = ?1"))?
                .execute(params![key])?;
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> CacheResult<usize> {
        let purged = self
            .run(|conn, table| {
                Ok(conn
                    .prepare_cached(&format!(
                        "DELETE FROM \"{table}\" WHERE ttl IS NOT NULL AND ttl <= ?1"
                    ))?
                    .execute(params![now_millis()])?)
            })
            .await?;
        debug!(table = %self.table, purged, "flushed sqlite cache");
        Ok(purged)
    }

    async fn values(&self) -> CacheResult<ValueStream<V>> {
        let rows = self
            .run(|conn, table| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT key, value FROM \"{table}\" WHERE ttl IS NULL OR ttl > ?1"
                ))?;
                let rows = stmt
                    .query_map(params![now_millis()], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        let decoded: Vec<_> = rows
            .into_iter()
            .map(|(key, text)| V::decode(&text).map(|v| (key, v)))
            .collect();
        Ok(Box::pin(stream::iter(decoded)))
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let prefix = prefix.to_string();
        self.run(move |conn, table| {
            Ok(conn
                .prepare_cached(&format!(
                    "DELETE FROM \"{table}\" WHERE substr(key, 1, length(?1)) = ?1"
                ))?
                .execute(params![prefix])?)
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Meta {
        id: String,
        size: u64,
    }

    impl CacheValue for Meta {
        type Encoding = crate::Json;
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache: SqliteCache<String> = SqliteCache::in_memory("paths").unwrap();
        cache.set(HOUR, "k", "v".to_string()).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        cache.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_existing_key() {
        let cache: SqliteCache<u64> = SqliteCache::in_memory("t").unwrap();
        cache.set(HOUR, "k", 1).await.unwrap();
        cache.set(HOUR, "k", 2).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_expired_row_removed_on_get() {
        let cache: SqliteCache<u64> = SqliteCache::in_memory("t").unwrap();
        cache.set(Duration::ZERO, "k", 1).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.flush().await.unwrap(), 0, "get already deleted the row");
    }

    #[tokio::test]
    async fn test_flush_and_values() {
        let cache: SqliteCache<u64> = SqliteCache::in_memory("t").unwrap();
        cache.set(Duration::ZERO, "gone1", 1).await.unwrap();
        cache.set(Duration::ZERO, "gone2", 2).await.unwrap();
        cache.set(HOUR, "kept", 3).await.unwrap();

        let values: Vec<_> = cache.values().await.unwrap().try_collect().await.unwrap();
        assert_eq!(values, vec![("kept".to_string(), 3)]);

        assert_eq!(cache.flush().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_json_values_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("cache.db");
        let meta = Meta {
            id: "1AbC".to_string(),
            size: 5,
        };

        {
            let cache: SqliteCache<Meta> = SqliteCache::open(&db, "nodes").unwrap();
            cache.set(HOUR, "docs/note.txt", meta.clone()).await.unwrap();
        }

        let reopened: SqliteCache<Meta> = SqliteCache::open(&db, "nodes").unwrap();
        assert_eq!(reopened.get("docs/note.txt").await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let cache: SqliteCache<u64> = SqliteCache::in_memory("t").unwrap();
        cache.set(HOUR, "a/b", 1).await.unwrap();
        cache.set(HOUR, "a/b/c", 2).await.unwrap();
        cache.set(HOUR, "a/x", 3).await.unwrap();

        assert_eq!(cache.delete_prefix("a/b").await.unwrap(), 2);
        assert_eq!(cache.get("a/x").await.unwrap(), Some(3));
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let err = SqliteCache::<u64>::in_memory("t; DROP TABLE x").err().unwrap();
        assert!(matches!(err, CacheError::InvalidIdentifier(_)));
        assert!(SqliteCache::<u64>::in_memory("9lives").is_err());
        assert!(SqliteCache::<u64>::in_memory("_node_cache2").is_ok());
    }
}
