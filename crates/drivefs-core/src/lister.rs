//! Directory listing with memoization.

use crate::config::DriveConfig;
use crate::error::{DriveError, DriveResult, OpContext};
use crate::node::{Listing, Node, NodeId};
use crate::remote::RemoteStore;
use crate::retry::{with_retry, RetryPolicy};
use drivefs_cache::Cache;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Enumerates folder children, hiding trashed nodes and placeholder kinds.
///
/// Listings are cached under both the folder's path and its ID for
/// `listing_ttl`, so callers may observe a listing that is stale by up to
/// that long unless a mutation through this filesystem invalidated it.
#[derive(Clone)]
pub struct DirectoryLister {
    store: Arc<dyn RemoteStore>,
    cache: Arc<dyn Cache<Listing>>,
    placeholders: Arc<HashSet<String>>,
    retry: RetryPolicy,
    ttl: Duration,
    cancel: CancellationToken,
}

fn path_key(path: &str) -> String {
    format!("path:{path}")
}

fn id_key(id: &NodeId) -> String {
    format!("id:{id}")
}

impl DirectoryLister {
    /// Creates a lister.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cache: Arc<dyn Cache<Listing>>,
        config: &DriveConfig,
    ) -> Self {
        Self {
            store,
            cache,
            placeholders: Arc::new(config.placeholder_mime_types.iter().cloned().collect()),
            retry: config.retry.clone(),
            ttl: config.listing_ttl,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Returns true if `node` is a placeholder hidden from listings.
    pub fn is_placeholder(&self, node: &Node) -> bool {
        self.placeholders.contains(&node.mime_type)
    }

    /// Children of `dir`.
    ///
    /// The listing is cached under the folder's ID and, when given, under
    /// the scoped cache path `key_path`.
    pub async fn list(&self, dir: &Node, key_path: Option<&str>) -> DriveResult<Vec<Node>> {
        let ctx = || {
            key_path
                .map_or_else(|| OpContext::new("read_dir"), |p| OpContext::at("read_dir", p))
                .with_node(&dir.id)
        };
        let keys: Vec<String> = key_path
            .map(path_key)
            .into_iter()
            .chain(std::iter::once(id_key(&dir.id)))
            .collect();
        for key in &keys {
            if let Some(Listing(nodes)) = self
                .cache
                .get(key)
                .await
                .map_err(|e| DriveError::cache(e, ctx()))?
            {
                trace!(key = %key, entries = nodes.len(), "listing cache hit");
                return Ok(nodes);
            }
        }

        let nodes = self.fetch(&dir.id, &ctx()).await?;
        let listing = Listing(nodes);
        for key in &keys {
            self.cache
                .set(self.ttl, key, listing.clone())
                .await
                .map_err(|e| DriveError::cache(e, ctx()))?;
        }
        Ok(listing.0)
    }

    /// Pages through every live, non-placeholder child of `id`.
    pub async fn fetch(&self, id: &NodeId, ctx: &OpContext) -> DriveResult<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = with_retry(&self.retry, &self.cancel, "list_children", || {
                self.store.list_children(id, None, page_token.as_deref())
            })
            .await
            .map_err(|e| DriveError::remote(e, ctx.clone()))?;
            pages += 1;

            nodes.extend(
                page.nodes
                    .into_iter()
                    .filter(|n| !n.trashed && !self.is_placeholder(n)),
            );
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(id = %id, entries = nodes.len(), pages, "listed folder");
        Ok(nodes)
    }

    /// Drops the cached listing of a folder.
    pub async fn invalidate(&self, key_path: &str, id: Option<&NodeId>) -> DriveResult<()> {
        let ctx = || OpContext::at("cache_delete", key_path);
        self.cache
            .delete(&path_key(key_path))
            .await
            .map_err(|e| DriveError::cache(e, ctx()))?;
        if let Some(id) = id {
            self.cache
                .delete(&id_key(id))
                .await
                .map_err(|e| DriveError::cache(e, ctx()))?;
        }
        Ok(())
    }

    /// Purges expired listings.
    pub async fn flush(&self) -> DriveResult<usize> {
        self.cache
            .flush()
            .await
            .map_err(|e| DriveError::cache(e, OpContext::new("cache_flush")))
    }
}
