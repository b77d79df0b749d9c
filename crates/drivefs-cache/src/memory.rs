//! In-process TTL cache.
//!
//! Entries live in a sharded `DashMap`: lookups on different shards never
//! contend and lookups on the same shard share a read lock. Expiry is lazy;
//! an expired entry is dropped the next time it is touched or on `flush`.

use crate::cache::{Cache, ValueStream};
use crate::codec::CacheValue;
use crate::error::CacheResult;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;
use std::time::{Duration, Instant};

/// Number of entries above which `set` opportunistically purges expired ones.
const CLEANUP_THRESHOLD: usize = 10_000;

/// Stored value and the instant it stops being served.
struct Slot<V> {
    value: V,
    deadline: Instant,
}

impl<V> Slot<V> {
    fn live_at(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

/// Thread-safe in-memory cache. Values are stored as-is, without encoding.
pub struct MemoryCache<V> {
    slots: DashMap<String, Slot<V>>,
    cleanup_threshold: usize,
}

impl<V: CacheValue> MemoryCache<V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::with_threshold(CLEANUP_THRESHOLD)
    }

    /// Creates an empty cache that purges expired slots whenever `set`
    /// leaves more than `cleanup_threshold` of them.
    pub fn with_threshold(cleanup_threshold: usize) -> Self {
        Self {
            slots: DashMap::new(),
            cleanup_threshold,
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Time left before `key` expires, if it is live.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.slots
            .get(key)
            .filter(|slot| slot.live_at(now))
            .map(|slot| slot.deadline - now)
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let slot = self.slots.get(key)?;
        if slot.live_at(now) {
            return Some(slot.value.clone());
        }
        // The read guard must go before the shard is locked for removal.
        drop(slot);
        self.slots.remove_if(key, |_, s| !s.live_at(now));
        None
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, s| s.live_at(now));
        before.saturating_sub(self.slots.len())
    }
}

impl<V: CacheValue> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: CacheValue> Cache<V> for MemoryCache<V> {
    async fn get(&self, key: &str) -> CacheResult<Option<V>> {
        let hit = self.lookup(key);
        cache_event!(trace, key = %key, hit = hit.is_some(), "memory cache get");
        Ok(hit)
    }

    async fn set(&self, ttl: Duration, key: &str, value: V) -> CacheResult<()> {
        let deadline = Instant::now() + ttl;
        self.slots.insert(key.to_string(), Slot { value, deadline });
        if self.slots.len() > self.cleanup_threshold {
            self.purge_expired();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.slots.remove(key);
        Ok(())
    }

    async fn flush(&self) -> CacheResult<usize> {
        Ok(self.purge_expired())
    }

    async fn values(&self) -> CacheResult<ValueStream<V>> {
        let now = Instant::now();
        let live: Vec<CacheResult<(String, V)>> = self
            .slots
            .iter()
            .filter(|slot| slot.live_at(now))
            .map(|slot| Ok((slot.key().clone(), slot.value.clone())))
            .collect();
        Ok(Box::pin(stream::iter(live)))
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let before = self.slots.len();
        self.slots.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.slots.len()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
