//! The filesystem surface.
//!
//! [`DriveFs`] maps POSIX-style calls onto the remote store:
//!
//! - `open`, `create`, `stat`, `lstat`, `read_dir` and `read_link` for lookup and I/O
//! - `mkdir`, `mkdir_all`, `remove`, `remove_all` and `rename` for mutation
//! - `sub` for a view rooted at a folder
//!
//! Paths are cleaned first (see [`crate::path`]), so `"/docs/"`, `"docs"`
//! and `"./docs"` name the same folder. Every mutation keeps the path and
//! listing caches consistent with what it changed.

use crate::config::DriveConfig;
use crate::error::{DriveError, DriveResult, OpContext};
use crate::handle::{DirHandle, FileHandle, Handle};
use crate::lister::DirectoryLister;
use crate::metadata::Metadata;
use crate::node::{Listing, NewNode, Node, NodeId, NodePatch, MODE_PROPERTY};
use crate::path::{self, ROOT};
use crate::remote::RemoteStore;
use crate::resolver::NodeResolver;
use crate::retry::with_retry;
use drivefs_cache::{Cache, MemoryCache};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Permission given to folders created implicitly by `create`.
const IMPLICIT_DIR_MODE: u32 = 0o755;

/// A remote store exposed as a hierarchical filesystem.
///
/// Cloning is cheap; clones and [`sub`](Self::sub) views share the store and
/// both caches.
#[derive(Clone)]
pub struct DriveFs {
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) config: Arc<DriveConfig>,
    pub(crate) resolver: NodeResolver,
    pub(crate) lister: DirectoryLister,
    pub(crate) cancel: CancellationToken,
}

impl DriveFs {
    /// Connects to `store` with in-memory caches.
    ///
    /// Fetches the root node named by `config.root_id`.
    pub async fn new(store: Arc<dyn RemoteStore>, config: DriveConfig) -> DriveResult<Self> {
        Self::with_caches(
            store,
            Arc::new(MemoryCache::<Node>::new()),
            Arc::new(MemoryCache::<Listing>::new()),
            config,
        )
        .await
    }

    /// Connects to `store` with caller-provided cache backends.
    pub async fn with_caches(
        store: Arc<dyn RemoteStore>,
        nodes: Arc<dyn Cache<Node>>,
        listings: Arc<dyn Cache<Listing>>,
        config: DriveConfig,
    ) -> DriveResult<Self> {
        let cancel = CancellationToken::new();
        let root_id = NodeId::new(config.root_id.clone());
        let ctx = OpContext::at("connect", ROOT).with_node(&root_id);
        let root = with_retry(&config.retry, &cancel, "get_node", || store.get_node(&root_id))
            .await
            .map_err(|e| DriveError::remote(e, ctx.clone()))?;
        if !root.is_folder() {
            return Err(DriveError::NotADirectory { context: ctx });
        }
        info!(root = %root.id, name = %root.name, "drive filesystem ready");

        let resolver = NodeResolver::new(Arc::clone(&store), nodes, root, &config);
        let lister = DirectoryLister::new(Arc::clone(&store), listings, &config);
        Ok(Self {
            store,
            config: Arc::new(config),
            resolver,
            lister,
            cancel,
        })
    }

    /// A view whose remote retries stop when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            resolver: self.resolver.with_cancel(token.clone()),
            lister: self.lister.with_cancel(token.clone()),
            cancel: token,
            ..self.clone()
        }
    }

    /// Root node of this view.
    pub fn root(&self) -> &Node {
        self.resolver.root()
    }

    /// Configuration this filesystem was built with.
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Opens a file for reading or writing, or a folder for listing.
    ///
    /// Shortcuts are followed. A folder's children are snapshotted now.
    #[instrument(level = "debug", skip(self))]
    pub async fn open(&self, path: &str) -> DriveResult<Handle> {
        let cleaned = path::clean(path);
        let (node, followed) = self.resolve_followed(&cleaned, "open").await?;
        if node.is_folder() {
            let children = self
                .lister
                .list(&node, self.listing_key(&cleaned, followed).as_deref())
                .await?;
            debug!(path = %cleaned, entries = children.len(), "opened directory");
            return Ok(Handle::Dir(DirHandle::new(cleaned, node, &children)));
        }
        Ok(Handle::File(FileHandle::existing(
            self.clone(),
            cleaned,
            node,
            followed,
        )))
    }

    /// Opens a file for writing, truncating it on first write or close.
    ///
    /// A missing file, and any missing folder above it, is created. Nothing
    /// is created remotely for the file itself until the first write or
    /// close.
    #[instrument(level = "debug", skip(self))]
    pub async fn create(&self, path: &str) -> DriveResult<FileHandle> {
        let cleaned = path::clean(path);
        let ctx = OpContext::at("create", cleaned.clone());
        let Some((parent_path, _)) = path::parent_and_name(&cleaned) else {
            return Err(DriveError::IsADirectory { context: ctx });
        };

        let existing = self.resolver.try_resolve(&cleaned).await?;
        if existing.as_ref().is_some_and(Node::is_folder) {
            return Err(DriveError::IsADirectory { context: ctx });
        }
        let parent = if existing.is_some() {
            self.resolver.resolve(&parent_path).await?
        } else {
            let outcome = self
                .resolver
                .create_missing_folders(&parent_path, IMPLICIT_DIR_MODE)
                .await?;
            for (touched, id) in &outcome.touched {
                self.invalidate_listing(touched, Some(id)).await?;
            }
            outcome.node
        };
        Ok(FileHandle::created(self.clone(), cleaned, existing, parent))
    }

    /// Metadata of `path`, following shortcuts.
    #[instrument(level = "debug", skip(self))]
    pub async fn stat(&self, path: &str) -> DriveResult<Metadata> {
        let cleaned = path::clean(path);
        let (node, _) = self.resolve_followed(&cleaned, "stat").await?;
        Ok(Metadata::from_node(&node))
    }

    /// Metadata of `path` itself; a shortcut is not followed.
    #[instrument(level = "debug", skip(self))]
    pub async fn lstat(&self, path: &str) -> DriveResult<Metadata> {
        let node = self.resolver.resolve(path).await?;
        Ok(Metadata::from_node(&node))
    }

    /// Lists the children of a folder.
    ///
    /// The listing may be stale by up to `listing_ttl` for changes made
    /// outside this filesystem.
    ///
    /// A folder reached through a shortcut is listed by ID only and its
    /// children are not added to the path cache.
    #[instrument(level = "debug", skip(self))]
    pub async fn read_dir(&self, path: &str) -> DriveResult<Vec<Metadata>> {
        let cleaned = path::clean(path);
        let (dir, followed) = self.resolve_followed(&cleaned, "read_dir").await?;
        if !dir.is_folder() {
            return Err(DriveError::NotADirectory {
                context: OpContext::at("read_dir", cleaned),
            });
        }
        let children = self
            .lister
            .list(&dir, self.listing_key(&cleaned, followed).as_deref())
            .await?;
        if followed {
            return Ok(children.iter().map(Metadata::from_node).collect());
        }

        // Seed the path cache, skipping names the resolver would reject.
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for child in &children {
            *seen.entry(child.name.as_str()).or_default() += 1;
        }
        for child in &children {
            if seen.get(child.name.as_str()) == Some(&1) {
                self.resolver
                    .remember(&path::join(&cleaned, &child.name), child)
                    .await?;
            }
        }
        Ok(children.iter().map(Metadata::from_node).collect())
    }

    /// Creates one folder with permission `mode`. The parent must exist.
    #[instrument(level = "debug", skip(self))]
    pub async fn mkdir(&self, path: &str, mode: u32) -> DriveResult<Metadata> {
        let cleaned = path::clean(path);
        let ctx = OpContext::at("mkdir", cleaned.clone());
        let Some((parent_path, name)) = path::parent_and_name(&cleaned) else {
            return Err(DriveError::AlreadyExists { context: ctx });
        };

        let parent = self.resolver.resolve(&parent_path).await?;
        if !parent.is_folder() {
            return Err(DriveError::NotADirectory { context: ctx });
        }
        if self.resolver.try_resolve(&cleaned).await?.is_some() {
            return Err(DriveError::AlreadyExists { context: ctx });
        }

        let meta = NewNode::folder(name, parent.id.clone())
            .with_property(MODE_PROPERTY, format!("{mode:o}"));
        let created = with_retry(&self.config.retry, &self.cancel, "create_node", || {
            self.store.create_node(meta.clone(), None)
        })
        .await
        .map_err(|e| DriveError::remote(e, ctx.clone()))?;
        debug!(path = %cleaned, id = %created.id, "created folder");

        self.resolver.remember(&cleaned, &created).await?;
        self.invalidate_listing(&parent_path, Some(&parent.id)).await?;
        Ok(Metadata::from_node(&created))
    }

    /// Creates a folder and every missing folder above it. Existing folders
    /// are left alone.
    #[instrument(level = "debug", skip(self))]
    pub async fn mkdir_all(&self, path: &str, mode: u32) -> DriveResult<Metadata> {
        let outcome = self.resolver.create_missing_folders(path, mode).await?;
        for (touched, id) in &outcome.touched {
            self.invalidate_listing(touched, Some(id)).await?;
        }
        Ok(Metadata::from_node(&outcome.node))
    }

    /// Deletes a file or folder. A folder is deleted with its contents.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, path: &str) -> DriveResult<()> {
        let cleaned = path::clean(path);
        let ctx = OpContext::at("remove", cleaned.clone());
        let Some((parent_path, _)) = path::parent_and_name(&cleaned) else {
            return Err(DriveError::InvalidArgument {
                reason: "the root cannot be removed",
                context: ctx,
            });
        };

        let node = self.resolver.resolve(&cleaned).await?;
        let ctx = ctx.with_node(&node.id);
        with_retry(&self.config.retry, &self.cancel, "delete_node", || {
            self.store.delete_node(&node.id)
        })
        .await
        .map_err(|e| DriveError::remote(e, ctx))?;
        debug!(path = %cleaned, id = %node.id, "removed");

        self.resolver.forget(&cleaned).await?;
        if node.is_folder() {
            self.invalidate_listing(&cleaned, Some(&node.id)).await?;
        }
        let parent_id = node.parents.first();
        self.invalidate_listing(&parent_path, parent_id).await
    }

    /// Same as [`remove`](Self::remove); folders are always removed
    /// recursively.
    pub async fn remove_all(&self, path: &str) -> DriveResult<()> {
        self.remove(path).await
    }

    /// Moves `from` to `to`.
    ///
    /// Both the source and the destination's parent are resolved before
    /// anything is changed, so a missing destination folder leaves the
    /// source untouched. An existing destination is AlreadyExists.
    #[instrument(level = "debug", skip(self))]
    pub async fn rename(&self, from: &str, to: &str) -> DriveResult<()> {
        let from = path::clean(from);
        let to = path::clean(to);
        let ctx = OpContext::at("rename", from.clone());
        let (Some((from_parent, _)), Some((to_parent, new_name))) =
            (path::parent_and_name(&from), path::parent_and_name(&to))
        else {
            return Err(DriveError::InvalidArgument {
                reason: "the root cannot be renamed",
                context: ctx,
            });
        };

        let node = self.resolver.resolve(&from).await?;
        let source_parent = self.resolver.resolve(&from_parent).await?;
        let dest_parent = self.resolver.resolve(&to_parent).await?;
        if !dest_parent.is_folder() {
            return Err(DriveError::NotADirectory {
                context: OpContext::at("rename", to),
            });
        }
        if from == to {
            return Ok(());
        }
        if node.is_folder() && to.starts_with(&format!("{from}/")) {
            return Err(DriveError::InvalidArgument {
                reason: "a folder cannot be moved into itself",
                context: ctx,
            });
        }
        if self.resolver.try_resolve(&to).await?.is_some() {
            return Err(DriveError::AlreadyExists {
                context: OpContext::at("rename", to),
            });
        }

        let patch = if source_parent.id == dest_parent.id {
            NodePatch::rename(new_name)
        } else {
            NodePatch::relocate(new_name, source_parent.id.clone(), dest_parent.id.clone())
        };
        let ctx = ctx.with_node(&node.id);
        let updated = with_retry(&self.config.retry, &self.cancel, "update_node", || {
            self.store.update_node(&node.id, Some(patch.clone()), None)
        })
        .await
        .map_err(|e| DriveError::remote(e, ctx))?;
        debug!(from = %from, to = %to, id = %updated.id, "renamed");

        self.resolver.forget(&from).await?;
        self.resolver.remember(&to, &updated).await?;
        if node.is_folder() {
            self.invalidate_listing(&from, Some(&node.id)).await?;
        }
        self.invalidate_listing(&from_parent, Some(&source_parent.id))
            .await?;
        self.invalidate_listing(&to_parent, Some(&dest_parent.id))
            .await
    }

    /// A view of this filesystem rooted at the folder `path`.
    ///
    /// The view shares the store and caches with `self`.
    #[instrument(level = "debug", skip(self))]
    pub async fn sub(&self, path: &str) -> DriveResult<Self> {
        let cleaned = path::clean(path);
        let (node, followed) = self.resolve_followed(&cleaned, "sub").await?;
        if !node.is_folder() {
            return Err(DriveError::NotADirectory {
                context: OpContext::at("sub", cleaned),
            });
        }
        // Cache keys always use the real location, never a shortcut's path.
        let real = if followed {
            let ctx = OpContext::at("sub", cleaned.clone());
            self.resolver.path_of(&node, &ctx).await?
        } else {
            cleaned
        };
        let scope = path::scoped(self.resolver.scope(), &real);
        Ok(Self {
            resolver: self.resolver.scoped_to(node, scope),
            ..self.clone()
        })
    }

    /// Path of the node a shortcut points to, rooted at this view's root
    /// (`/docs/note.txt`).
    #[instrument(level = "debug", skip(self))]
    pub async fn read_link(&self, path: &str) -> DriveResult<String> {
        let cleaned = path::clean(path);
        let ctx = OpContext::at("read_link", cleaned.clone());
        let link = self.resolver.resolve(&cleaned).await?;
        if !link.is_symlink() {
            return Err(DriveError::InvalidArgument {
                reason: "not a shortcut",
                context: ctx,
            });
        }
        let target = self
            .resolver
            .follow_shortcuts(link, self.config.symlink_limit, &ctx)
            .await?;
        let target_path = self.resolver.path_of(&target, &ctx).await?;
        if target_path == ROOT {
            Ok(ROOT.to_string())
        } else {
            Ok(format!("{ROOT}{target_path}"))
        }
    }

    /// Reads a whole file.
    pub async fn read_file(&self, path: &str) -> DriveResult<Vec<u8>> {
        let Handle::File(mut file) = self.open(path).await? else {
            return Err(DriveError::IsADirectory {
                context: OpContext::at("read_file", path::clean(path)),
            });
        };
        let data = file.read_to_end().await?;
        file.close().await?;
        Ok(data)
    }

    /// Replaces the content of a file, creating it if needed.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> DriveResult<Metadata> {
        let mut file = self.create(path).await?;
        if !data.is_empty() {
            file.write(data).await?;
        }
        file.close().await?;
        file.stat()
    }

    /// Purges expired entries from both caches, returning how many went.
    pub async fn flush_caches(&self) -> DriveResult<usize> {
        let paths = self.resolver.flush().await?;
        let listings = self.lister.flush().await?;
        debug!(paths, listings, "flushed caches");
        Ok(paths + listings)
    }

    /// Every live path cache entry as `(key, node id)`, sorted by key.
    pub async fn cached_paths(&self) -> DriveResult<Vec<(String, NodeId)>> {
        self.resolver.cached_paths().await
    }

    /// Drops the cached listing of the folder at canonical `path`.
    pub(crate) async fn invalidate_listing(
        &self,
        path: &str,
        id: Option<&NodeId>,
    ) -> DriveResult<()> {
        self.lister.invalidate(&self.resolver.key(path), id).await
    }

    /// Resolves `cleaned` and follows a trailing shortcut. The flag is set
    /// when a shortcut was followed; nothing may then be cached under
    /// `cleaned` or below it.
    async fn resolve_followed(&self, cleaned: &str, op: &'static str) -> DriveResult<(Node, bool)> {
        let node = self.resolver.resolve(cleaned).await?;
        if !node.is_symlink() {
            return Ok((node, false));
        }
        let ctx = OpContext::at(op, cleaned);
        let target = self
            .resolver
            .follow_shortcuts(node, self.config.symlink_limit, &ctx)
            .await?;
        Ok((target, true))
    }

    fn listing_key(&self, cleaned: &str, followed: bool) -> Option<String> {
        (!followed).then(|| self.resolver.key(cleaned))
    }
}

impl fmt::Debug for DriveFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveFs")
            .field("root", &self.resolver.root().id)
            .field("scope", &self.resolver.scope())
            .finish_non_exhaustive()
    }
}
