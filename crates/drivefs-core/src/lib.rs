//! A remote object store exposed as a hierarchical filesystem.
//!
//! The store is a graph of nodes addressed by opaque IDs, where a node may
//! have several parents and names are not unique. `drivefs-core` turns that
//! into paths, directories and byte streams:
//!
//! - [`NodeResolver`] walks paths to nodes through a TTL cache, so repeated
//!   lookups only ask the store about segments not seen recently.
//! - [`DirectoryLister`] pages through folder children and hides trashed
//!   nodes and placeholder document types.
//! - [`FileHandle`] emulates seekable reads over range downloads and
//!   sequential writes over a whole-object upload.
//! - [`normalize()`] reduces transport errors to a small [`ErrorKind`]
//!   taxonomy and [`with_retry`] retries the transient ones.
//!
//! [`DriveFs`] ties them together behind POSIX-style calls.
//!
//! # Example
//!
//! ```
//! use drivefs_core::testing::MemoryDrive;
//! use drivefs_core::{DriveConfig, DriveFs};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let fs = DriveFs::new(Arc::new(MemoryDrive::new()), DriveConfig::default())
//!     .await
//!     .unwrap();
//!
//! fs.mkdir("/docs", 0o755).await.unwrap();
//! fs.write_file("/docs/note.txt", b"hello").await.unwrap();
//!
//! assert_eq!(fs.read_file("/docs/note.txt").await.unwrap(), b"hello");
//! assert_eq!(fs.read_dir("/docs").await.unwrap().len(), 1);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fs;
pub mod handle;
pub mod lister;
pub mod metadata;
pub mod node;
pub mod normalize;
pub mod path;
pub mod remote;
pub mod resolver;
pub mod retry;
pub mod testing;

pub use config::DriveConfig;
pub use error::{DriveError, DriveResult, OpContext};
pub use fs::DriveFs;
pub use handle::{DirHandle, FileHandle, Handle};
pub use lister::DirectoryLister;
pub use metadata::Metadata;
pub use node::{Listing, NewNode, Node, NodeId, NodeKind, NodePage, NodePatch};
pub use normalize::{normalize, ErrorKind, RetryClass};
pub use remote::{ByteStream, MediaStream, RemoteError, RemoteStore};
pub use resolver::{MkdirOutcome, NodeResolver};
pub use retry::{with_retry, RetryError, RetryPolicy};

pub use drivefs_cache as cache;
