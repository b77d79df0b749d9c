//! File metadata as seen by filesystem consumers.

use crate::node::{Node, NodeId, NodeKind};
use crate::path::escape_name;
use std::time::SystemTime;

const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

/// Stat result for a path or handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    id: NodeId,
    name: String,
    kind: NodeKind,
    size: u64,
    permissions: u32,
    modified: Option<SystemTime>,
    created: Option<SystemTime>,
    mime_type: String,
}

impl Metadata {
    /// Metadata of `node`.
    pub fn from_node(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            kind: node.kind(),
            size: if node.kind() == NodeKind::File { node.size } else { 0 },
            permissions: node.permission_bits(),
            modified: node.mod_time(),
            created: node.created_at,
            mime_type: node.mime_type.clone(),
        }
    }

    /// Remote node ID.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Raw name, possibly containing `/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name escaped for use as a path segment.
    pub fn escaped_name(&self) -> String {
        escape_name(&self.name)
    }

    /// Kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// True for folders.
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// True for regular files.
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// True for shortcuts.
    pub fn is_symlink(&self) -> bool {
        self.kind == NodeKind::Symlink
    }

    /// Size in bytes; zero for folders and shortcuts.
    pub fn len(&self) -> u64 {
        self.size
    }

    /// True if the size is zero.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Permission bits (`0o777` style).
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    /// `st_mode` style value: file type bits plus permissions.
    pub fn mode(&self) -> u32 {
        let kind = match self.kind {
            NodeKind::Folder => S_IFDIR,
            NodeKind::File => S_IFREG,
            NodeKind::Symlink => S_IFLNK,
        };
        kind | self.permissions
    }

    /// Modification time, falling back to creation time.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Creation time.
    pub fn created(&self) -> Option<SystemTime> {
        self.created
    }

    /// Remote mime type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

impl From<&Node> for Metadata {
    fn from(node: &Node) -> Self {
        Self::from_node(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MIME_FILE, MIME_FOLDER, MIME_SHORTCUT};

    #[test]
    fn test_file_metadata() {
        let mut node = Node::new("f1", "a/b.txt", MIME_FILE);
        node.size = 12;
        node.owned_by_me = true;

        let meta = Metadata::from(&node);
        assert!(meta.is_file());
        assert_eq!(meta.len(), 12);
        assert_eq!(meta.name(), "a/b.txt");
        assert_eq!(meta.escaped_name(), "a%2Fb.txt");
        assert_eq!(meta.mode(), 0o100_777);
    }

    #[test]
    fn test_folder_and_shortcut_have_no_size() {
        let mut folder = Node::new("d1", "docs", MIME_FOLDER);
        folder.size = 4096;
        let meta = Metadata::from(&folder);
        assert!(meta.is_dir());
        assert_eq!(meta.len(), 0);
        assert_eq!(meta.mode() & 0o170_000, 0o040_000);

        let link = Metadata::from(&Node::new("s1", "link", MIME_SHORTCUT));
        assert!(link.is_symlink());
        assert_eq!(link.mode(), 0o120_755);
    }
}
