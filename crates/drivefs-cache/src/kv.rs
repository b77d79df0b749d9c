//! Remote key-value service backend.
//!
//! The service is reached through [`KvClient`], a minimal request/response
//! surface that any Redis/Valkey style client can implement. Expiry is left
//! to the server (`SET key value PX ttl`), so `flush` has nothing to do.

use crate::cache::{Cache, ValueStream};
use crate::codec::CacheValue;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use futures::stream;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Error returned by a [`KvClient`].
pub type KvError = Box<dyn std::error::Error + Send + Sync>;

/// Request/response client for a key-value service with server-side expiry.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Fetches a key; `None` when absent or expired on the server.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Stores a key that the server expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Removes a key. Absent keys are not an error.
    async fn del(&self, key: &str) -> Result<(), KvError>;

    /// Lists every live key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// TTL cache stored in a remote key-value service under a namespace.
pub struct KvCache<V, C: ?Sized> {
    client: Arc<C>,
    namespace: String,
    _value: PhantomData<fn() -> V>,
}

impl<V: CacheValue, C: KvClient + ?Sized> KvCache<V, C> {
    /// Creates a cache whose keys are stored as `<namespace>:<key>`.
    pub fn new(client: Arc<C>, namespace: &str) -> CacheResult<Self> {
        if namespace.is_empty() || namespace.contains(char::is_whitespace) {
            return Err(CacheError::InvalidIdentifier(namespace.to_string()));
        }
        Ok(Self {
            client,
            namespace: format!("{namespace}:"),
            _value: PhantomData,
        })
    }

    fn remote_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    fn remote_err(key: &str, source: KvError) -> CacheError {
        CacheError::Remote {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl<V, C> Cache<V> for KvCache<V, C>
where
    V: CacheValue,
    C: KvClient + ?Sized,
{
    async fn get(&self, key: &str) -> CacheResult<Option<V>> {
        let remote = self.remote_key(key);
        match self
            .client
            .get(&remote)
            .await
            .map_err(|e| Self::remote_err(&remote, e))?
        {
            Some(text) => V::decode(&text).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, ttl: Duration, key: &str, value: V) -> CacheResult<()> {
        let remote = self.remote_key(key);
        // Servers reject a zero expiry; an entry that expires immediately is a delete.
        if ttl.is_zero() {
            return self
                .client
                .del(&remote)
                .await
                .map_err(|e| Self::remote_err(&remote, e));
        }
        let text = value.encode()?;
        self.client
            .set_ex(&remote, &text, ttl)
            .await
            .map_err(|e| Self::remote_err(&remote, e))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let remote = self.remote_key(key);
        self.client
            .del(&remote)
            .await
            .map_err(|e| Self::remote_err(&remote, e))
    }

    async fn flush(&self) -> CacheResult<usize> {
        Ok(0)
    }

    async fn values(&self) -> CacheResult<ValueStream<V>> {
        let keys = self
            .client
            .scan_prefix(&self.namespace)
            .await
            .map_err(|e| Self::remote_err(&self.namespace, e))?;

        let mut live = Vec::with_capacity(keys.len());
        for remote in keys {
            // A key may expire between the scan and the fetch.
            let fetched = self.client.get(&remote).await;
            let item = match fetched {
                Ok(Some(text)) => V::decode(&text).map(|v| {
                    let key = remote
                        .strip_prefix(&self.namespace)
                        .unwrap_or(&remote)
                        .to_string();
                    (key, v)
                }),
                Ok(None) => continue,
                Err(e) => Err(Self::remote_err(&remote, e)),
            };
            live.push(item);
        }
        Ok(Box::pin(stream::iter(live)))
    }

    fn backend(&self) -> &'static str {
        "kv"
    }
}
