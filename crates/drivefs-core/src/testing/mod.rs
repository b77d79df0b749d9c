//! In-memory [`RemoteStore`] for tests.
//!
//! [`MemoryDrive`] keeps a node graph behind a mutex and behaves like the
//! real store where it matters to the filesystem: listings include trashed
//! nodes, names are not unique, a node may have several parents, and
//! downloads honour a start offset. It also counts calls per operation and
//! can fail the next calls of an operation with a queued error.

use crate::node::{NewNode, Node, NodeId, NodePage, NodePatch, MIME_FILE, MIME_FOLDER, MIME_SHORTCUT};
use crate::remote::{ByteStream, MediaStream, RemoteError, RemoteStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;

/// ID of the root folder of a fresh [`MemoryDrive`].
pub const ROOT_ID: &str = "root";

/// Operation names accepted by [`MemoryDrive::calls`] and
/// [`MemoryDrive::fail_next`].
pub const OPERATIONS: &[&str] = &[
    "list_children",
    "get_node",
    "create_node",
    "update_node",
    "delete_node",
    "download",
];

#[derive(Default)]
struct State {
    nodes: HashMap<NodeId, Node>,
    content: HashMap<NodeId, Vec<u8>>,
    next_id: u64,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
}

impl State {
    fn allocate(&mut self, name: &str, mime: &str, parents: Vec<NodeId>) -> Node {
        self.next_id += 1;
        let created = SystemTime::UNIX_EPOCH + Duration::from_secs(self.next_id);
        let mut node = Node::new(format!("n{}", self.next_id), name, mime);
        node.parents = parents;
        node.created_at = Some(created);
        node.modified_at = Some(created);
        node.owned_by_me = true;
        self.nodes.insert(node.id.clone(), node.clone());
        node
    }

    fn touch(&mut self, op: &'static str) -> Result<(), RemoteError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn live(&self, id: &NodeId) -> Result<&Node, RemoteError> {
        self.nodes.get(id).ok_or_else(|| not_found(id))
    }

    fn remove_tree(&mut self, id: &NodeId) {
        let children: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.parents.contains(id))
            .map(|n| n.id.clone())
            .collect();
        for child in children {
            let orphaned = self.nodes.get_mut(&child).is_some_and(|n| {
                n.parents.retain(|p| p != id);
                n.parents.is_empty()
            });
            if orphaned {
                self.remove_tree(&child);
            }
        }
        self.nodes.remove(id);
        self.content.remove(id);
    }
}

fn not_found(id: &NodeId) -> RemoteError {
    RemoteError::Status {
        code: 404,
        message: format!("file not found: {id}"),
    }
}

async fn drain(media: Option<MediaStream>) -> Result<Option<Vec<u8>>, RemoteError> {
    let Some(mut media) = media else {
        return Ok(None);
    };
    let mut data = Vec::new();
    media.read_to_end(&mut data).await?;
    Ok(Some(data))
}

/// Node graph held in memory.
pub struct MemoryDrive {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDrive {
    /// A drive containing only the root folder.
    pub fn new() -> Self {
        let mut state = State::default();
        let mut root = Node::new(ROOT_ID, "My Drive", MIME_FOLDER);
        root.created_at = Some(SystemTime::UNIX_EPOCH);
        root.owned_by_me = true;
        state.nodes.insert(root.id.clone(), root);
        Self {
            state: Mutex::new(state),
            page_size: 100,
        }
    }

    /// Splits listings into pages of `size` nodes.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// The root folder's ID.
    pub fn root_id(&self) -> NodeId {
        NodeId::new(ROOT_ID)
    }

    /// Adds a folder under `parent`.
    pub fn add_folder(&self, parent: &NodeId, name: &str) -> Node {
        self.state
            .lock()
            .allocate(name, MIME_FOLDER, vec![parent.clone()])
    }

    /// Adds a file with `data` under `parent`.
    pub fn add_file(&self, parent: &NodeId, name: &str, data: &[u8]) -> Node {
        self.add_typed_file(parent, name, MIME_FILE, data)
    }

    /// Adds a file with an explicit mime type.
    pub fn add_typed_file(&self, parent: &NodeId, name: &str, mime: &str, data: &[u8]) -> Node {
        let mut state = self.state.lock();
        let mut node = state.allocate(name, mime, vec![parent.clone()]);
        node.size = data.len() as u64;
        state.nodes.insert(node.id.clone(), node.clone());
        state.content.insert(node.id.clone(), data.to_vec());
        node
    }

    /// Adds a shortcut under `parent` pointing at `target`.
    pub fn add_shortcut(&self, parent: &NodeId, name: &str, target: &NodeId) -> Node {
        let mut state = self.state.lock();
        let mut node = state.allocate(name, MIME_SHORTCUT, vec![parent.clone()]);
        node.shortcut_target = Some(target.clone());
        state.nodes.insert(node.id.clone(), node.clone());
        node
    }

    /// Inserts or replaces a node as given.
    pub fn put_node(&self, node: Node) {
        self.state.lock().nodes.insert(node.id.clone(), node);
    }

    /// Marks a node trashed.
    pub fn trash(&self, id: &NodeId) {
        if let Some(node) = self.state.lock().nodes.get_mut(id) {
            node.trashed = true;
        }
    }

    /// Gives a node an additional parent.
    pub fn add_parent(&self, id: &NodeId, parent: &NodeId) {
        if let Some(node) = self.state.lock().nodes.get_mut(id) {
            node.parents.push(parent.clone());
        }
    }

    /// Current node, if it exists.
    pub fn node(&self, id: &NodeId) -> Option<Node> {
        self.state.lock().nodes.get(id).cloned()
    }

    /// Current content of a file.
    pub fn content(&self, id: &NodeId) -> Option<Vec<u8>> {
        self.state.lock().content.get(id).cloned()
    }

    /// Live (non-trashed) children of `parent` named `name`.
    pub fn find(&self, parent: &NodeId, name: &str) -> Vec<Node> {
        self.state
            .lock()
            .nodes
            .values()
            .filter(|n| !n.trashed && n.name == name && n.parents.contains(parent))
            .cloned()
            .collect()
    }

    /// Calls made to `op` so far, failed ones included.
    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Calls made to every operation so far.
    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Zeroes the call counters.
    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Makes the next call to `op` fail with `err`. Queued errors are used
    /// in order, one per call.
    ///
    /// # Panics
    ///
    /// Panics if `op` is not one of [`OPERATIONS`].
    pub fn fail_next(&self, op: &str, err: RemoteError) {
        let op = OPERATIONS
            .iter()
            .copied()
            .find(|known| *known == op)
            .unwrap_or_else(|| panic!("unknown operation {op}"));
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }
}

#[async_trait]
impl RemoteStore for MemoryDrive {
    async fn list_children(
        &self,
        parent: &NodeId,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<NodePage, RemoteError> {
        let mut state = self.state.lock();
        state.touch("list_children")?;
        state.live(parent)?;

        let mut matching: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| n.parents.contains(parent))
            .filter(|n| name.is_none_or(|name| n.name == name))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let start = match page_token {
            Some(token) => token.parse::<usize>().map_err(|_| RemoteError::Status {
                code: 400,
                message: format!("bad page token {token}"),
            })?,
            None => 0,
        };
        let end = (start + self.page_size).min(matching.len());
        let next_page_token = (end < matching.len()).then(|| end.to_string());
        let nodes = matching.get(start..end).map(<[Node]>::to_vec).unwrap_or_default();
        Ok(NodePage {
            nodes,
            next_page_token,
        })
    }

    async fn get_node(&self, id: &NodeId) -> Result<Node, RemoteError> {
        let mut state = self.state.lock();
        state.touch("get_node")?;
        state.live(id).cloned()
    }

    async fn create_node(
        &self,
        meta: NewNode,
        media: Option<MediaStream>,
    ) -> Result<Node, RemoteError> {
        self.state.lock().touch("create_node")?;
        let data = drain(media).await?;

        let mut state = self.state.lock();
        state.live(&meta.parent)?;
        let mut node = state.allocate(&meta.name, &meta.mime_type, vec![meta.parent.clone()]);
        node.properties = meta.properties;
        if let Some(data) = data {
            node.size = data.len() as u64;
            state.content.insert(node.id.clone(), data);
        } else if !node.is_folder() {
            state.content.insert(node.id.clone(), Vec::new());
        }
        state.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn update_node(
        &self,
        id: &NodeId,
        patch: Option<NodePatch>,
        media: Option<MediaStream>,
    ) -> Result<Node, RemoteError> {
        {
            let mut state = self.state.lock();
            state.touch("update_node")?;
            state.live(id)?;
        }
        let data = drain(media).await?;

        let mut state = self.state.lock();
        let next = state.next_id + 1;
        let node = state.nodes.get_mut(id).ok_or_else(|| not_found(id))?;
        if let Some(patch) = patch {
            if let Some(name) = patch.name {
                node.name = name;
            }
            node.parents.retain(|p| !patch.remove_parents.contains(p));
            for parent in patch.add_parents {
                if !node.parents.contains(&parent) {
                    node.parents.push(parent);
                }
            }
        }
        node.modified_at = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(next));
        if let Some(data) = &data {
            node.size = data.len() as u64;
        }
        let node = node.clone();
        state.next_id = next;
        if let Some(data) = data {
            state.content.insert(id.clone(), data);
        }
        Ok(node)
    }

    async fn delete_node(&self, id: &NodeId) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.touch("delete_node")?;
        state.live(id)?;
        state.remove_tree(id);
        Ok(())
    }

    async fn download(&self, id: &NodeId, range_start: Option<u64>) -> Result<ByteStream, RemoteError> {
        let mut state = self.state.lock();
        state.touch("download")?;
        let node = state.live(id)?;
        if node.is_folder() {
            return Err(RemoteError::Status {
                code: 400,
                message: format!("{id} is a folder"),
            });
        }
        let data = state.content.get(id).cloned().unwrap_or_default();
        let start = range_start.unwrap_or(0);
        if start > data.len() as u64 {
            return Err(RemoteError::Status {
                code: 416,
                message: format!("range start {start} beyond {}", data.len()),
            });
        }
        let mut cursor = Cursor::new(data);
        cursor.set_position(start);
        Ok(Box::pin(cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_pages() {
        let drive = MemoryDrive::new().with_page_size(2);
        let root = drive.root_id();
        for name in ["a", "b", "c"] {
            drive.add_file(&root, name, b"");
        }

        let first = drive.list_children(&root, None, None).await.unwrap();
        assert_eq!(first.nodes.len(), 2);
        let token = first.next_page_token.unwrap();
        let second = drive.list_children(&root, None, Some(&token)).await.unwrap();
        assert_eq!(second.nodes.len(), 1);
        assert!(second.next_page_token.is_none());
        assert_eq!(drive.calls("list_children"), 2);
    }

    #[tokio::test]
    async fn test_download_from_offset() {
        let drive = MemoryDrive::new();
        let file = drive.add_file(&drive.root_id(), "f", b"hello");

        let mut body = drive.download(&file.id, Some(2)).await.unwrap();
        let mut out = String::new();
        body.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "llo");
    }

    #[tokio::test]
    async fn test_injected_failure_is_used_once() {
        let drive = MemoryDrive::new();
        drive.fail_next(
            "get_node",
            RemoteError::GoAway {
                debug: String::new(),
            },
        );

        assert!(drive.get_node(&drive.root_id()).await.is_err());
        assert!(drive.get_node(&drive.root_id()).await.is_ok());
        assert_eq!(drive.calls("get_node"), 2);
    }

    #[tokio::test]
    async fn test_delete_is_recursive() {
        let drive = MemoryDrive::new();
        let dir = drive.add_folder(&drive.root_id(), "d");
        let file = drive.add_file(&dir.id, "f", b"x");

        drive.delete_node(&dir.id).await.unwrap();
        assert!(drive.node(&file.id).is_none());
    }
}
