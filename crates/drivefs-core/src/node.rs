//! Remote node model.
//!
//! A [`Node`] mirrors one object in the remote store. Nodes are only created
//! and destroyed by remote calls; caches hold copies for a bounded time.

use drivefs_cache::{CacheValue, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Mime type of folders.
pub const MIME_FOLDER: &str = "application/vnd.google-apps.folder";

/// Mime type of shortcuts, surfaced as symlinks.
pub const MIME_SHORTCUT: &str = "application/vnd.google-apps.shortcut";

/// Mime type given to regular files created through the filesystem.
pub const MIME_FILE: &str = "application/octet-stream";

/// Custom property holding octal permission bits.
pub const MODE_PROPERTY: &str = "mode";

/// Opaque, stable identifier of a remote node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Filesystem kind, derived from the mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Regular file with byte content.
    File,
    /// Folder.
    Folder,
    /// Shortcut pointing at another node.
    Symlink,
}

impl NodeKind {
    /// Derives the kind from a mime type.
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            MIME_FOLDER => Self::Folder,
            MIME_SHORTCUT => Self::Symlink,
            _ => Self::File,
        }
    }
}

/// What the caller may do with a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Content and metadata can be modified.
    pub can_edit: bool,
    /// The node can be deleted.
    pub can_delete: bool,
}

/// A remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier.
    pub id: NodeId,
    /// Raw name; may contain `/`.
    pub name: String,
    /// Mime type the kind is derived from.
    pub mime_type: String,
    /// Content length in bytes. Meaningful for files only.
    pub size: u64,
    /// Parent folders. Usually exactly one.
    pub parents: Vec<NodeId>,
    /// Creation time.
    pub created_at: Option<SystemTime>,
    /// Last modification time.
    pub modified_at: Option<SystemTime>,
    /// Soft-deleted nodes are treated as absent.
    pub trashed: bool,
    /// Owned by the authenticated account.
    pub owned_by_me: bool,
    /// Caller capabilities.
    pub capabilities: Capabilities,
    /// Application properties, e.g. [`MODE_PROPERTY`].
    pub properties: HashMap<String, String>,
    /// Target of a shortcut.
    pub shortcut_target: Option<NodeId>,
}

impl CacheValue for Node {
    type Encoding = Json;
}

impl Node {
    /// Creates a node with the given identity and mime type and empty metadata.
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            size: 0,
            parents: Vec::new(),
            created_at: None,
            modified_at: None,
            trashed: false,
            owned_by_me: false,
            capabilities: Capabilities::default(),
            properties: HashMap::new(),
            shortcut_target: None,
        }
    }

    /// Kind derived from the mime type.
    pub fn kind(&self) -> NodeKind {
        NodeKind::from_mime(&self.mime_type)
    }

    /// Returns true for folders.
    pub fn is_folder(&self) -> bool {
        self.kind() == NodeKind::Folder
    }

    /// Returns true for shortcuts.
    pub fn is_symlink(&self) -> bool {
        self.kind() == NodeKind::Symlink
    }

    /// Modification time, falling back to creation time.
    pub fn mod_time(&self) -> Option<SystemTime> {
        self.modified_at.or(self.created_at)
    }

    /// Unix permission bits.
    ///
    /// A valid octal [`MODE_PROPERTY`] wins. Otherwise owned nodes get `0o777`,
    /// nodes the caller can both edit and delete `0o757`, anything else `0o755`.
    pub fn permission_bits(&self) -> u32 {
        if let Some(mode) = self
            .properties
            .get(MODE_PROPERTY)
            .and_then(|m| u32::from_str_radix(m, 8).ok())
        {
            return mode & 0o7777;
        }
        if self.owned_by_me {
            0o777
        } else if self.capabilities.can_edit && self.capabilities.can_delete {
            0o757
        } else {
            0o755
        }
    }

    /// The parent created first among `candidates`, for multi-parent nodes.
    ///
    /// Best effort: nodes without a creation time sort last, and ties keep the
    /// order the store reported them in.
    pub fn earliest_created(candidates: &[Node]) -> Option<&Node> {
        candidates
            .iter()
            .min_by_key(|n| (n.created_at.is_none(), n.created_at))
    }
}

/// Metadata for a node to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    /// Raw name.
    pub name: String,
    /// Mime type.
    pub mime_type: String,
    /// Parent folder.
    pub parent: NodeId,
    /// Application properties.
    pub properties: HashMap<String, String>,
}

impl NewNode {
    /// Folder metadata.
    pub fn folder(name: impl Into<String>, parent: NodeId) -> Self {
        Self {
            name: name.into(),
            mime_type: MIME_FOLDER.to_string(),
            parent,
            properties: HashMap::new(),
        }
    }

    /// Regular file metadata.
    pub fn file(name: impl Into<String>, parent: NodeId) -> Self {
        Self {
            name: name.into(),
            mime_type: MIME_FILE.to_string(),
            parent,
            properties: HashMap::new(),
        }
    }

    /// Adds an application property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Partial metadata update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePatch {
    /// New name.
    pub name: Option<String>,
    /// Parent edges to add.
    pub add_parents: Vec<NodeId>,
    /// Parent edges to remove.
    pub remove_parents: Vec<NodeId>,
}

impl NodePatch {
    /// Rename only.
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Rename and move from one parent to another.
    pub fn relocate(name: impl Into<String>, from: NodeId, to: NodeId) -> Self {
        Self {
            name: Some(name.into()),
            add_parents: vec![to],
            remove_parents: vec![from],
        }
    }
}

/// One page of a child listing.
#[derive(Debug, Clone, Default)]
pub struct NodePage {
    /// Nodes on this page.
    pub nodes: Vec<Node>,
    /// Continuation token; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Cached directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Listing(pub Vec<Node>);

impl CacheValue for Listing {
    type Encoding = Json;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(NodeKind::from_mime(MIME_FOLDER), NodeKind::Folder);
        assert_eq!(NodeKind::from_mime(MIME_SHORTCUT), NodeKind::Symlink);
        assert_eq!(NodeKind::from_mime("text/plain"), NodeKind::File);
    }

    #[test]
    fn test_permission_bits() {
        let mut node = Node::new("a", "a", MIME_FILE);
        assert_eq!(node.permission_bits(), 0o755);

        node.capabilities = Capabilities {
            can_edit: true,
            can_delete: true,
        };
        assert_eq!(node.permission_bits(), 0o757);

        node.owned_by_me = true;
        assert_eq!(node.permission_bits(), 0o777);

        node.properties.insert(MODE_PROPERTY.into(), "700".into());
        assert_eq!(node.permission_bits(), 0o700);

        node.properties.insert(MODE_PROPERTY.into(), "rwx".into());
        assert_eq!(node.permission_bits(), 0o777, "garbage mode falls back");
    }

    #[test]
    fn test_mod_time_falls_back_to_created() {
        let created = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let mut node = Node::new("a", "a", MIME_FILE);
        node.created_at = Some(created);
        assert_eq!(node.mod_time(), Some(created));

        let modified = created + Duration::from_secs(5);
        node.modified_at = Some(modified);
        assert_eq!(node.mod_time(), Some(modified));
    }

    #[test]
    fn test_earliest_created_parent() {
        let at = |secs| Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs));
        let mut late = Node::new("late", "late", MIME_FOLDER);
        late.created_at = at(200);
        let mut early = Node::new("early", "early", MIME_FOLDER);
        early.created_at = at(100);
        let undated = Node::new("undated", "undated", MIME_FOLDER);

        let parents = [undated, late, early];
        assert_eq!(Node::earliest_created(&parents).unwrap().id.as_str(), "early");
        assert!(Node::earliest_created(&[]).is_none());
    }

    #[test]
    fn test_node_cache_encoding() {
        let mut node = Node::new("1x", "note.txt", MIME_FILE);
        node.size = 5;
        node.parents.push(NodeId::new("root"));
        let text = node.encode().unwrap();
        assert_eq!(Node::decode(&text).unwrap(), node);
    }
}
