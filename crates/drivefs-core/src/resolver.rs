//! Path → node resolution.
//!
//! # Architecture
//!
//! A path is walked segment by segment. Every resolved prefix is cached
//! under its cumulative path, so later walks start from the deepest cached
//! prefix and only ask the remote store about the segments below it.
//!
//! # Key Methods
//!
//! - [`NodeResolver::resolve`] - Path to node, or NotFound
//! - [`NodeResolver::create_missing_folders`] - Same walk, creating folders on a miss
//! - [`NodeResolver::path_of`] - Node back to its path, following parents to the root
//!
//! # Concurrency
//!
//! The resolver is a cheap clone over shared `Arc`s; concurrent walks share
//! one cache instance. Cache keys carry the scope of the view they were
//! resolved in, so sub views rooted at different folders never collide.

use crate::config::DriveConfig;
use crate::error::{DriveError, DriveResult, OpContext};
use crate::node::{NewNode, Node, NodeId, MODE_PROPERTY};
use crate::path::{self, ROOT};
use crate::remote::RemoteStore;
use crate::retry::{with_retry, RetryPolicy};
use drivefs_cache::Cache;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Result of [`NodeResolver::create_missing_folders`].
#[derive(Debug, Clone)]
pub struct MkdirOutcome {
    /// The folder at the requested path.
    pub node: Node,
    /// `(cumulative path, id)` of every folder that gained a child.
    pub touched: Vec<(String, NodeId)>,
}

/// Resolves paths to nodes through the path cache.
#[derive(Clone)]
pub struct NodeResolver {
    store: Arc<dyn RemoteStore>,
    cache: Arc<dyn Cache<Node>>,
    root: Node,
    scope: String,
    retry: RetryPolicy,
    ttl: Duration,
    cancel: CancellationToken,
}

impl NodeResolver {
    /// Creates a resolver rooted at `root`.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cache: Arc<dyn Cache<Node>>,
        root: Node,
        config: &DriveConfig,
    ) -> Self {
        Self {
            store,
            cache,
            root,
            scope: ROOT.to_string(),
            retry: config.retry.clone(),
            ttl: config.path_ttl,
            cancel: CancellationToken::new(),
        }
    }

    /// A resolver for a sub view rooted at `root`, found at `scope`.
    pub(crate) fn scoped_to(&self, root: Node, scope: String) -> Self {
        Self {
            root,
            scope,
            ..self.clone()
        }
    }

    /// A resolver whose retries observe `cancel`.
    pub(crate) fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Root node of this view.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Canonical path of this view's root from the top-level root.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Cache key for a canonical path in this view.
    pub fn key(&self, cumulative: &str) -> String {
        path::scoped(&self.scope, cumulative)
    }

    /// Resolves `path` to a live node.
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, path: &str) -> DriveResult<Node> {
        let cleaned = path::clean(path);
        if cleaned == ROOT {
            return Ok(self.root.clone());
        }
        let walk = path::split(&cleaned);

        // Start below the deepest cached prefix.
        let mut current = self.root.clone();
        let mut start = 0;
        for (i, segment) in walk.iter().enumerate().rev() {
            if let Some(node) = self.cached(&segment.cumulative).await? {
                trace!(path = %segment.cumulative, "path cache hit");
                current = node;
                start = i + 1;
                break;
            }
        }

        for segment in &walk[start..] {
            let ctx = OpContext::at("resolve", segment.cumulative.clone());
            if !current.is_folder() {
                return Err(DriveError::NotADirectory { context: ctx });
            }
            let Some(child) = self.find_child(&current, &segment.name, &ctx).await? else {
                return Err(DriveError::NotFound { context: ctx });
            };
            self.remember(&segment.cumulative, &child).await?;
            current = child;
        }
        Ok(current)
    }

    /// Like [`resolve`](Self::resolve) but a missing path is `Ok(None)`.
    pub async fn try_resolve(&self, path: &str) -> DriveResult<Option<Node>> {
        match self.resolve(path).await {
            Ok(node) => Ok(Some(node)),
            Err(DriveError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Walks `path`, creating every missing folder with permission `mode`.
    ///
    /// An existing segment that is not a folder fails with InvalidArgument.
    #[instrument(level = "debug", skip(self))]
    pub async fn create_missing_folders(&self, path: &str, mode: u32) -> DriveResult<MkdirOutcome> {
        let cleaned = path::clean(path);
        let mut touched = Vec::new();
        let mut current = self.root.clone();
        if cleaned == ROOT {
            return Ok(MkdirOutcome {
                node: current,
                touched,
            });
        }

        let mut parent_path = ROOT.to_string();
        for segment in path::split(&cleaned) {
            let ctx = OpContext::at("mkdir_all", segment.cumulative.clone());
            let node = if let Some(hit) = self.cached(&segment.cumulative).await? {
                hit
            } else if let Some(found) = self.find_child(&current, &segment.name, &ctx).await? {
                found
            } else {
                let meta = NewNode::folder(segment.name.clone(), current.id.clone())
                    .with_property(MODE_PROPERTY, format!("{mode:o}"));
                let created = with_retry(&self.retry, &self.cancel, "create_node", || {
                    self.store.create_node(meta.clone(), None)
                })
                .await
                .map_err(|e| DriveError::remote(e, ctx.clone()))?;
                debug!(path = %segment.cumulative, id = %created.id, "created folder");
                touched.push((parent_path.clone(), current.id.clone()));
                created
            };

            if !node.is_folder() {
                return Err(DriveError::NotADirectory { context: ctx });
            }
            self.remember(&segment.cumulative, &node).await?;
            parent_path = segment.cumulative;
            current = node;
        }
        Ok(MkdirOutcome {
            node: current,
            touched,
        })
    }

    /// Exact-name lookup among the live children of `parent`.
    ///
    /// More than one live match is an error: names are not disambiguated.
    pub async fn find_child(
        &self,
        parent: &Node,
        name: &str,
        ctx: &OpContext,
    ) -> DriveResult<Option<Node>> {
        let mut matches = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = with_retry(&self.retry, &self.cancel, "list_children", || {
                self.store
                    .list_children(&parent.id, Some(name), page_token.as_deref())
            })
            .await
            .map_err(|e| DriveError::remote(e, ctx.clone()))?;

            matches.extend(
                page.nodes
                    .into_iter()
                    .filter(|n| !n.trashed && n.name == name),
            );
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        match matches.len() {
            0 | 1 => Ok(matches.pop()),
            count => {
                warn!(parent = %parent.id, name, count, "ambiguous name");
                Err(DriveError::Ambiguous {
                    name: name.to_string(),
                    matches: count,
                    context: ctx.clone(),
                })
            }
        }
    }

    /// Fetches a node by ID.
    pub async fn get_node(&self, id: &NodeId, ctx: &OpContext) -> DriveResult<Node> {
        let node = with_retry(&self.retry, &self.cancel, "get_node", || self.store.get_node(id))
            .await
            .map_err(|e| DriveError::remote(e, ctx.clone()))?;
        if node.trashed {
            return Err(DriveError::NotFound {
                context: ctx.clone().with_node(id),
            });
        }
        Ok(node)
    }

    /// Follows shortcut targets until a non-shortcut is reached.
    pub async fn follow_shortcuts(&self, node: Node, limit: u32, ctx: &OpContext) -> DriveResult<Node> {
        let mut current = node;
        let mut hops = 0;
        while current.is_symlink() {
            let Some(target) = current.shortcut_target.clone() else {
                break;
            };
            if hops >= limit {
                return Err(DriveError::SymlinkLoop {
                    context: ctx.clone(),
                });
            }
            current = self.get_node(&target, ctx).await?;
            hops += 1;
        }
        Ok(current)
    }

    /// Reconstructs the canonical path of `node` inside this view.
    ///
    /// When a node has several parents the one created first is taken. That
    /// choice is a best-effort tie-break; a node reachable through several
    /// folders has no single true path. A node not below the view's root
    /// is NotFound.
    #[instrument(level = "debug", skip(self, node), fields(id = %node.id))]
    pub async fn path_of(&self, node: &Node, ctx: &OpContext) -> DriveResult<String> {
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        let mut current = node.clone();

        while current.id != self.root.id {
            if !seen.insert(current.id.clone()) || current.parents.is_empty() {
                return Err(DriveError::NotFound {
                    context: ctx.clone().with_node(&node.id),
                });
            }

            let mut parents = Vec::with_capacity(current.parents.len());
            for id in &current.parents {
                if *id == self.root.id {
                    parents.clear();
                    parents.push(self.root.clone());
                    break;
                }
                parents.push(self.get_node(id, ctx).await?);
            }
            if parents.len() > 1 {
                debug!(id = %current.id, parents = parents.len(), "picking earliest-created parent");
            }
            let Some(parent) = Node::earliest_created(&parents).cloned() else {
                return Err(DriveError::NotFound {
                    context: ctx.clone().with_node(&node.id),
                });
            };

            names.push(std::mem::take(&mut current.name));
            current = parent;
        }

        Ok(names
            .iter()
            .rev()
            .fold(ROOT.to_string(), |acc, name| path::join(&acc, name)))
    }

    /// Caches `node` at `cumulative`.
    pub async fn remember(&self, cumulative: &str, node: &Node) -> DriveResult<()> {
        let key = self.key(cumulative);
        self.cache
            .set(self.ttl, &key, node.clone())
            .await
            .map_err(|e| DriveError::cache(e, OpContext::at("cache_set", key)))
    }

    /// Drops the entry at `cumulative` and every entry below it.
    pub async fn forget(&self, cumulative: &str) -> DriveResult<()> {
        let key = self.key(cumulative);
        let ctx = || OpContext::at("cache_delete", key.clone());
        self.cache
            .delete(&key)
            .await
            .map_err(|e| DriveError::cache(e, ctx()))?;
        let below = if key == ROOT {
            String::new()
        } else {
            format!("{key}/")
        };
        let purged = self
            .cache
            .delete_prefix(&below)
            .await
            .map_err(|e| DriveError::cache(e, ctx()))?;
        trace!(path = %key, purged, "forgot cached path");
        Ok(())
    }

    /// Every live path cache entry as `(key, node id)`.
    pub async fn cached_paths(&self) -> DriveResult<Vec<(String, NodeId)>> {
        let ctx = || OpContext::new("cache_values");
        let mut values = self
            .cache
            .values()
            .await
            .map_err(|e| DriveError::cache(e, ctx()))?;
        let mut out = Vec::new();
        while let Some(item) = values.next().await {
            let (key, node) = item.map_err(|e| DriveError::cache(e, ctx()))?;
            out.push((key, node.id));
        }
        out.sort();
        Ok(out)
    }

    /// Purges expired path entries.
    pub async fn flush(&self) -> DriveResult<usize> {
        self.cache
            .flush()
            .await
            .map_err(|e| DriveError::cache(e, OpContext::new("cache_flush")))
    }

    async fn cached(&self, cumulative: &str) -> DriveResult<Option<Node>> {
        let key = self.key(cumulative);
        self.cache
            .get(&key)
            .await
            .map_err(|e| DriveError::cache(e, OpContext::at("cache_get", key)))
    }
}
