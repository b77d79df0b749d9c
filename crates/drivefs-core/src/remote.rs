//! Boundary to the remote object store.
//!
//! The transport (HTTP client, credentials, API wire format) lives behind
//! [`RemoteStore`]. Implementations report failures as [`RemoteError`], whose
//! variants carry exactly what the error normalizer needs, so no caller ever
//! inspects transport-specific error types.

use crate::node::{NewNode, Node, NodeId, NodePage, NodePatch};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Byte stream returned by [`RemoteStore::download`].
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Upload body handed to [`RemoteStore::create_node`] and [`RemoteStore::update_node`].
pub type MediaStream = Pin<Box<dyn AsyncRead + Send>>;

/// Failure reported by the remote store transport.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Plain HTTP-style status without structured details.
    #[error("remote returned status {code}: {message}")]
    Status {
        /// Status code.
        code: u16,
        /// Response text.
        message: String,
    },

    /// Structured API error with its own embedded code.
    #[error("remote api error {code}: {message}")]
    Api {
        /// Embedded status code.
        code: u16,
        /// Error message.
        message: String,
        /// A quota-failure detail was attached.
        quota_exceeded: bool,
    },

    /// The peer ended the connection (protocol-level "go away").
    #[error("remote closed the connection: {debug}")]
    GoAway {
        /// Debug data sent with the frame, if any.
        debug: String,
    },

    /// Local or socket I/O failure.
    #[error("remote i/o failed: {0}")]
    Io(#[from] io::Error),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Operations the filesystem needs from the remote store.
///
/// Listing results may include trashed nodes; callers filter them.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Lists children of `parent`, optionally only those named exactly `name`.
    async fn list_children(
        &self,
        parent: &NodeId,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<NodePage, RemoteError>;

    /// Fetches one node by ID.
    async fn get_node(&self, id: &NodeId) -> Result<Node, RemoteError>;

    /// Creates a node, optionally with initial content.
    async fn create_node(
        &self,
        meta: NewNode,
        media: Option<MediaStream>,
    ) -> Result<Node, RemoteError>;

    /// Updates metadata and/or replaces the whole content of a node.
    async fn update_node(
        &self,
        id: &NodeId,
        patch: Option<NodePatch>,
        media: Option<MediaStream>,
    ) -> Result<Node, RemoteError>;

    /// Deletes a node. Folders are deleted with everything below them.
    async fn delete_node(&self, id: &NodeId) -> Result<(), RemoteError>;

    /// Streams the content of a node starting at `range_start`.
    async fn download(&self, id: &NodeId, range_start: Option<u64>) -> Result<ByteStream, RemoteError>;
}
