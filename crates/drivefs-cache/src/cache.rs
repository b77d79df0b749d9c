//! The cache contract shared by all backends.

use crate::codec::CacheValue;
use crate::error::CacheResult;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt::Debug;
use std::io::Write;
use std::time::Duration;

/// Stream of live `(key, value)` pairs produced by [`Cache::values`].
pub type ValueStream<V> = BoxStream<'static, CacheResult<(String, V)>>;

/// A string-keyed TTL cache.
///
/// Entries observed after their expiry are absent: `get` never returns them
/// and removes them as a side effect where the backend allows it.
#[async_trait]
pub trait Cache<V: CacheValue>: Send + Sync {
    /// Returns the live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<V>>;

    /// Inserts or replaces `key`, expiring `ttl` from now.
    ///
    /// A zero `ttl` is accepted and produces an entry that is already expired.
    async fn set(&self, ttl: Duration, key: &str, value: V) -> CacheResult<()>;

    /// Removes `key` if present.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Purges expired entries and returns how many were removed.
    ///
    /// Backends with server-side expiry return 0.
    async fn flush(&self) -> CacheResult<usize>;

    /// Snapshot of all live entries. Each call starts a fresh sequence.
    async fn values(&self) -> CacheResult<ValueStream<V>>;

    /// Removes every live key starting with `prefix` and returns the count.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let mut values = self.values().await?;
        let mut doomed = Vec::new();
        while let Some(item) = values.next().await {
            let (key, _) = item?;
            if key.starts_with(prefix) {
                doomed.push(key);
            }
        }
        for key in &doomed {
            self.delete(key).await?;
        }
        Ok(doomed.len())
    }

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Writes one line per live entry to `out`.
pub async fn print_cache<V, C, W>(cache: &C, out: &mut W) -> CacheResult<()>
where
    V: CacheValue + Debug,
    C: Cache<V> + ?Sized,
    W: Write + Send,
{
    let mut values = cache.values().await?;
    while let Some(item) = values.next().await {
        let (key, value) = item?;
        writeln!(out, "Cache key: {key}, value: {value:?}")?;
    }
    Ok(())
}
