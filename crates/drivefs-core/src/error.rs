//! Filesystem-facing errors.
//!
//! Every [`DriveError`] carries an [`OpContext`] naming the failing operation
//! and, where known, the path and node involved. [`DriveError::kind`] reduces
//! it to the canonical [`ErrorKind`] consumers render.

use crate::node::NodeId;
use crate::normalize::{io_error_kind, ErrorKind};
use crate::retry::RetryError;
use crate::remote::RemoteError;
use drivefs_cache::CacheError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias for filesystem operations.
pub type DriveResult<T> = Result<T, DriveError>;

/// Where an error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpContext {
    /// Operation name, e.g. `"open"`.
    pub op: &'static str,
    /// Path being operated on.
    pub path: Option<String>,
    /// Node being operated on.
    pub node_id: Option<NodeId>,
}

impl OpContext {
    /// Context for `op` with no path or node yet.
    pub fn new(op: &'static str) -> Self {
        Self {
            op,
            path: None,
            node_id: None,
        }
    }

    /// Context for `op` on `path`.
    pub fn at(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(op).with_path(path)
    }

    /// Sets the path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the node.
    #[must_use]
    pub fn with_node(mut self, id: &NodeId) -> Self {
        self.node_id = Some(id.clone());
        self
    }
}

impl fmt::Display for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if let Some(ref path) = self.path {
            write!(f, " '{path}'")?;
        }
        if let Some(ref id) = self.node_id {
            write!(f, " (node {id})")?;
        }
        Ok(())
    }
}

/// Error returned by filesystem operations and handles.
#[derive(Debug, Error)]
pub enum DriveError {
    /// A remote call failed after the retry policy gave up.
    #[error("{context}: {source} after {attempts} attempt(s)")]
    Remote {
        /// Canonical kind of the last failure.
        kind: ErrorKind,
        /// Last transport error.
        #[source]
        source: RemoteError,
        /// Attempts made.
        attempts: u32,
        /// Where it happened.
        context: OpContext,
    },

    /// The call was cancelled while waiting to retry.
    #[error("{context}: cancelled")]
    Cancelled {
        /// Where it happened.
        context: OpContext,
    },

    /// Path or node does not exist.
    #[error("{context}: no such file or directory")]
    NotFound {
        /// Where it happened.
        context: OpContext,
    },

    /// More than one live child carries the same name.
    #[error("{context}: name '{name}' matches {matches} nodes")]
    Ambiguous {
        /// The ambiguous segment name.
        name: String,
        /// Number of live matches.
        matches: usize,
        /// Where it happened.
        context: OpContext,
    },

    /// Target already exists.
    #[error("{context}: already exists")]
    AlreadyExists {
        /// Where it happened.
        context: OpContext,
    },

    /// A folder was required.
    #[error("{context}: not a directory")]
    NotADirectory {
        /// Where it happened.
        context: OpContext,
    },

    /// A file was required.
    #[error("{context}: is a directory")]
    IsADirectory {
        /// Where it happened.
        context: OpContext,
    },

    /// Argument rejected.
    #[error("{context}: {reason}")]
    InvalidArgument {
        /// Why.
        reason: &'static str,
        /// Where it happened.
        context: OpContext,
    },

    /// Seek target outside `0..=size`.
    #[error("{context}: offset {offset} out of range for size {size}")]
    OutOfRange {
        /// Requested absolute offset.
        offset: i64,
        /// Object size.
        size: u64,
        /// Where it happened.
        context: OpContext,
    },

    /// Operation not allowed in the handle's current state.
    #[error("{context}: handle is {state}")]
    WrongState {
        /// Current state name.
        state: &'static str,
        /// Where it happened.
        context: OpContext,
    },

    /// Write did not start where the previous one ended.
    #[error("{context}: write at {offset} is not contiguous with {expected}")]
    NonContiguousWrite {
        /// Requested offset.
        offset: u64,
        /// Only offset accepted.
        expected: u64,
        /// Where it happened.
        context: OpContext,
    },

    /// Shortcut chain longer than the configured limit.
    #[error("{context}: too many levels of shortcuts")]
    SymlinkLoop {
        /// Where it happened.
        context: OpContext,
    },

    /// Streaming I/O failed.
    #[error("{context}: {source}")]
    Io {
        /// Underlying error.
        #[source]
        source: io::Error,
        /// Where it happened.
        context: OpContext,
    },

    /// A cache backend failed.
    #[error("{context}: cache: {source}")]
    Cache {
        /// Underlying error.
        #[source]
        source: CacheError,
        /// Where it happened.
        context: OpContext,
    },

    /// The background upload task panicked or was aborted.
    #[error("{context}: upload task: {source}")]
    UploadTask {
        /// Underlying error.
        #[source]
        source: tokio::task::JoinError,
        /// Where it happened.
        context: OpContext,
    },
}

impl DriveError {
    /// Converts a retry outcome.
    pub fn remote(err: RetryError, context: OpContext) -> Self {
        match err {
            RetryError::Failed {
                source,
                kind,
                attempts,
            } => Self::Remote {
                kind,
                source,
                attempts,
                context,
            },
            RetryError::Cancelled { .. } => Self::Cancelled { context },
        }
    }

    /// Converts a single, unretried remote failure.
    pub fn remote_once(source: RemoteError, context: OpContext) -> Self {
        Self::Remote {
            kind: crate::normalize::normalize(&source).kind,
            source,
            attempts: 1,
            context,
        }
    }

    /// Wraps a cache failure.
    pub fn cache(source: CacheError, context: OpContext) -> Self {
        Self::Cache { source, context }
    }

    /// Canonical kind. Never [`ErrorKind::Transient`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Remote { kind, .. } => kind.settle(),
            Self::NotFound { .. } | Self::Ambiguous { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotADirectory { .. }
            | Self::IsADirectory { .. }
            | Self::InvalidArgument { .. }
            | Self::OutOfRange { .. }
            | Self::WrongState { .. }
            | Self::NonContiguousWrite { .. }
            | Self::SymlinkLoop { .. } => ErrorKind::InvalidArgument,
            Self::Io { source, .. } => io_error_kind(source).settle(),
            Self::Cancelled { .. } | Self::Cache { .. } | Self::UploadTask { .. } => {
                ErrorKind::Unknown
            }
        }
    }

    /// Where the error happened.
    pub fn context(&self) -> &OpContext {
        match self {
            Self::Remote { context, .. }
            | Self::Cancelled { context }
            | Self::NotFound { context }
            | Self::Ambiguous { context, .. }
            | Self::AlreadyExists { context }
            | Self::NotADirectory { context }
            | Self::IsADirectory { context }
            | Self::InvalidArgument { context, .. }
            | Self::OutOfRange { context, .. }
            | Self::WrongState { context, .. }
            | Self::NonContiguousWrite { context, .. }
            | Self::SymlinkLoop { context }
            | Self::Io { context, .. }
            | Self::Cache { context, .. }
            | Self::UploadTask { context, .. } => context,
        }
    }

    /// POSIX errno for this error.
    pub fn to_errno(&self) -> i32 {
        self.kind().to_errno()
    }

    /// Returns true for [`ErrorKind::NotFound`].
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<DriveError> for io::Error {
    fn from(err: DriveError) -> Self {
        io::Error::new(err.kind().io_kind(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display() {
        let ctx = OpContext::at("rename", "docs/a.txt").with_node(&NodeId::new("xyz"));
        assert_eq!(ctx.to_string(), "rename 'docs/a.txt' (node xyz)");
        assert_eq!(OpContext::new("statfs").to_string(), "statfs");
    }

    #[test]
    fn test_error_message_names_op_and_path() {
        let err = DriveError::NotFound {
            context: OpContext::at("open", "docs/missing"),
        };
        assert_eq!(err.to_string(), "open 'docs/missing': no such file or directory");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_exhausted_transient_settles_to_unknown() {
        let err = DriveError::remote(
            RetryError::Failed {
                source: RemoteError::GoAway {
                    debug: String::new(),
                },
                kind: ErrorKind::Transient,
                attempts: 10,
            },
            OpContext::new("stat"),
        );
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_ambiguous_is_not_found() {
        let err = DriveError::Ambiguous {
            name: "dup".into(),
            matches: 2,
            context: OpContext::at("stat", "dup"),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_into_io_error() {
        let err = DriveError::AlreadyExists {
            context: OpContext::at("mkdir", "docs"),
        };
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::AlreadyExists);
    }
}
