//! Pluggable TTL key-value caches for drivefs.
//!
//! Path resolution and directory-listing memoization in `drivefs-core` are
//! written against the [`Cache`] trait only, so the backend can be swapped
//! without touching the resolver.
//!
//! # Components
//!
//! - [`Cache`] - Async contract: get, set with TTL, delete, flush, values
//! - [`CacheValue`] - Compile-time choice of a value's textual encoding
//! - [`MemoryCache`] - Sharded in-process map with lazy expiry
//! - [`SqliteCache`] - One SQLite table per cache instance
//! - [`KvCache`] - Remote key-value service with server-side expiry
//!
//! # Encodings
//!
//! Backends that persist values store them as text. A value type picks its
//! encoding by implementing [`CacheValue`], in this order of preference:
//!
//! 1. [`Text`] - the type's own `Display`/`FromStr`
//! 2. [`Binary`] - raw bytes, stored base64
//! 3. [`Json`] - serde structured fallback
//!
//! Encoding and decoding always go through the same associated type, so a
//! value written by one backend is readable by any other.
//!
//! # Example
//!
//! ```
//! use drivefs_cache::{Cache, MemoryCache};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let cache: MemoryCache<String> = MemoryCache::new();
//! cache.set(Duration::from_secs(60), "greeting", "hello".to_string()).await.unwrap();
//!
//! assert_eq!(cache.get("greeting").await.unwrap().as_deref(), Some("hello"));
//! # });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "cache-tracing")]
macro_rules! cache_event {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!($($arg)*)
    };
}

#[cfg(not(feature = "cache-tracing"))]
macro_rules! cache_event {
    ($level:ident, $($arg:tt)*) => {};
}

mod cache;
mod codec;
mod error;
mod kv;
mod memory;
mod sqlite;

pub use cache::{print_cache, Cache, ValueStream};
pub use codec::{Binary, CacheValue, Encoding, Json, Text};
pub use error::{CacheError, CacheResult};
pub use kv::{KvCache, KvClient, KvError};
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;
