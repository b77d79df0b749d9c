//! Open file and directory handles.
//!
//! The remote store only transfers whole objects: a download may start at
//! an offset, an upload always replaces the entire content. A
//! [`FileHandle`] emulates offset-addressed access on top of that:
//!
//! - The first `read` opens a download at the current offset.
//! - The first `write` starts an upload task fed through an in-process pipe.
//!   Later writes must continue exactly where the previous one ended.
//!
//! The first call fixes the direction. The opposite operation then fails
//! without touching the remote store. `close` waits for the upload task and
//! reports its outcome.

use crate::error::{DriveError, DriveResult, OpContext};
use crate::fs::DriveFs;
use crate::metadata::Metadata;
use crate::node::{NewNode, Node};
use crate::path;
use crate::remote::{ByteStream, MediaStream, RemoteError};
use crate::retry::with_retry;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

const ZEROES: [u8; 4096] = [0; 4096];
const COPY_BUFFER: usize = 64 * 1024;

/// An in-flight upload.
struct Upload {
    pipe: DuplexStream,
    task: JoinHandle<Result<Node, RemoteError>>,
}

enum State {
    Undecided,
    /// `None` once the offset reached the end of the object.
    Reading(Option<ByteStream>),
    Writing(Upload),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::Reading(_) => "reading",
            Self::Writing(_) => "writing",
            Self::Closed => "closed",
        }
    }
}

/// Handle to an open file.
///
/// Not safe for concurrent use; callers own it exclusively.
pub struct FileHandle {
    fs: DriveFs,
    path: String,
    node: Option<Node>,
    parent: Option<Node>,
    /// Opened through a shortcut: `path` names the shortcut, not `node`.
    linked: bool,
    create_on_close: bool,
    offset: u64,
    state: State,
}

impl FileHandle {
    /// Handle on an existing file, reached through a shortcut if `linked`.
    pub(crate) fn existing(fs: DriveFs, path: String, node: Node, linked: bool) -> Self {
        Self {
            fs,
            path,
            node: Some(node),
            parent: None,
            linked,
            create_on_close: false,
            offset: 0,
            state: State::Undecided,
        }
    }

    /// Handle returned by `create`: the file is truncated, or created under
    /// `parent` if `node` is `None`, on first write or on close.
    pub(crate) fn created(fs: DriveFs, path: String, node: Option<Node>, parent: Node) -> Self {
        Self {
            fs,
            path,
            node,
            parent: Some(parent),
            linked: false,
            create_on_close: true,
            offset: 0,
            state: State::Undecided,
        }
    }

    /// Canonical path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The remote node, once it exists.
    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// Metadata of the file.
    pub fn stat(&self) -> DriveResult<Metadata> {
        self.node
            .as_ref()
            .map(Metadata::from_node)
            .ok_or_else(|| DriveError::NotFound {
                context: self.ctx("stat"),
            })
    }

    fn ctx(&self, op: &'static str) -> OpContext {
        OpContext::at(op, self.path.clone())
    }

    fn wrong_state(&self, op: &'static str) -> DriveError {
        DriveError::WrongState {
            state: self.state.name(),
            context: self.ctx(op),
        }
    }

    /// Reads into `buf`, returning 0 at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> DriveResult<usize> {
        if matches!(self.state, State::Undecided) {
            self.begin_read().await?;
        }
        let path = &self.path;
        match &mut self.state {
            State::Reading(Some(body)) => {
                let n = body.read(buf).await.map_err(|source| DriveError::Io {
                    source,
                    context: OpContext::at("read", path.clone()),
                })?;
                self.offset += n as u64;
                Ok(n)
            }
            State::Reading(None) => Ok(0),
            _ => Err(self.wrong_state("read")),
        }
    }

    /// Reads everything from the current offset to the end.
    pub async fn read_to_end(&mut self) -> DriveResult<Vec<u8>> {
        let capacity = self
            .node
            .as_ref()
            .map_or(0, |n| n.size.saturating_sub(self.offset));
        let mut out = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));
        let mut buf = vec![0u8; COPY_BUFFER];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Streams the rest of the file into `writer`, returning bytes copied.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> DriveResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|source| DriveError::Io {
                    source,
                    context: self.ctx("copy_to"),
                })?;
            total += n as u64;
        }
    }

    /// Appends `data` at the current offset.
    pub async fn write(&mut self, data: &[u8]) -> DriveResult<usize> {
        if matches!(self.state, State::Undecided) {
            self.begin_write().await?;
        }
        let State::Writing(upload) = &mut self.state else {
            return Err(self.wrong_state("write"));
        };
        if let Err(source) = upload.pipe.write_all(data).await {
            return Err(self.abort_upload(source).await);
        }
        self.offset += data.len() as u64;
        Ok(data.len())
    }

    /// Writes `data` at `offset`, which must equal the current offset.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> DriveResult<usize> {
        if offset != self.offset {
            return Err(DriveError::NonContiguousWrite {
                offset,
                expected: self.offset,
                context: self.ctx("write"),
            });
        }
        self.write(data).await
    }

    /// Streams all of `reader` into the file, returning bytes copied.
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> DriveResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await.map_err(|source| DriveError::Io {
                source,
                context: self.ctx("copy_from"),
            })?;
            if n == 0 {
                if total == 0 && matches!(self.state, State::Undecided) {
                    self.begin_write().await?;
                }
                return Ok(total);
            }
            self.write(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Moves the offset.
    ///
    /// - Before the first read or write only `Start` and `Current` are
    ///   accepted and nothing is transferred.
    /// - While reading, `Start` and `End` reopen the download; a forward
    ///   `Current` skips bytes, a backward one reopens.
    /// - While writing, only a forward `Current` is accepted; the gap is
    ///   filled with zeroes.
    ///
    /// A target outside `0..=size` fails and leaves the offset unchanged.
    pub async fn seek(&mut self, pos: SeekFrom) -> DriveResult<u64> {
        match self.state {
            State::Closed => Err(self.wrong_state("seek")),
            State::Undecided => {
                let target = match pos {
                    SeekFrom::Start(n) => i128::from(n),
                    SeekFrom::Current(delta) => i128::from(self.offset) + i128::from(delta),
                    SeekFrom::End(_) => {
                        return Err(DriveError::InvalidArgument {
                            reason: "seek from end requires an open download",
                            context: self.ctx("seek"),
                        });
                    }
                };
                // Content about to be replaced does not bound the offset.
                let limit = if self.create_on_close {
                    None
                } else {
                    self.node.as_ref().map(|n| n.size)
                };
                self.offset = self.check_target(target, limit)?;
                Ok(self.offset)
            }
            State::Reading(_) => self.seek_reading(pos).await,
            State::Writing(_) => match pos {
                SeekFrom::Current(delta) if delta >= 0 => {
                    self.pad(delta.unsigned_abs()).await?;
                    self.offset += delta.unsigned_abs();
                    Ok(self.offset)
                }
                _ => Err(DriveError::InvalidArgument {
                    reason: "only forward relative seeks are allowed while writing",
                    context: self.ctx("seek"),
                }),
            },
        }
    }

    async fn seek_reading(&mut self, pos: SeekFrom) -> DriveResult<u64> {
        let size = self.node.as_ref().map_or(0, |n| n.size);
        let (target, skip) = match pos {
            SeekFrom::Start(n) => (self.check_target(i128::from(n), Some(size))?, None),
            SeekFrom::End(delta) => (
                self.check_target(i128::from(size) + i128::from(delta), Some(size))?,
                None,
            ),
            SeekFrom::Current(delta) => {
                let target =
                    self.check_target(i128::from(self.offset) + i128::from(delta), Some(size))?;
                (target, (delta >= 0).then_some(delta.unsigned_abs()))
            }
        };

        let path = &self.path;
        match (skip, &mut self.state) {
            (Some(count), State::Reading(Some(body))) => {
                let skipped = tokio::io::copy(&mut body.take(count), &mut tokio::io::sink())
                    .await
                    .map_err(|source| DriveError::Io {
                        source,
                        context: OpContext::at("seek", path.clone()),
                    })?;
                self.offset += skipped;
                if skipped < count {
                    return Err(DriveError::Io {
                        source: std::io::ErrorKind::UnexpectedEof.into(),
                        context: self.ctx("seek"),
                    });
                }
            }
            (Some(_), _) => self.offset = target,
            (None, _) => self.reopen_at(target).await?,
        }
        trace!(path = %self.path, offset = self.offset, "seek");
        Ok(self.offset)
    }

    fn check_target(&self, target: i128, limit: Option<u64>) -> DriveResult<u64> {
        let out_of_range = || DriveError::OutOfRange {
            offset: i64::try_from(target).unwrap_or(i64::MAX),
            size: limit.unwrap_or(0),
            context: self.ctx("seek"),
        };
        let target = u64::try_from(target).map_err(|_| out_of_range())?;
        match limit {
            Some(size) if target > size => Err(out_of_range()),
            _ => Ok(target),
        }
    }

    /// Opens a download of `node` at `offset`; `None` at or past the end.
    ///
    /// Borrows fields rather than the handle: `FileHandle` is not `Sync`,
    /// so holding `&self` across the download would make callers `!Send`.
    async fn open_body(
        fs: &DriveFs,
        path: &str,
        node: &Node,
        offset: u64,
    ) -> DriveResult<Option<ByteStream>> {
        if offset >= node.size {
            return Ok(None);
        }
        let start = (offset > 0).then_some(offset);
        let store = &fs.store;
        let body = with_retry(&fs.config.retry, &fs.cancel, "download", || {
            store.download(&node.id, start)
        })
        .await
        .map_err(|e| DriveError::remote(e, OpContext::at("read", path).with_node(&node.id)))?;
        debug!(path = %path, offset, "opened download");
        Ok(Some(body))
    }

    async fn begin_read(&mut self) -> DriveResult<()> {
        let Some(node) = self.node.clone() else {
            return Err(DriveError::NotFound {
                context: self.ctx("read"),
            });
        };
        if node.is_folder() {
            return Err(DriveError::IsADirectory {
                context: self.ctx("read"),
            });
        }
        let body = Self::open_body(&self.fs, &self.path, &node, self.offset).await?;
        self.state = State::Reading(body);
        Ok(())
    }

    /// Swaps in a download at `offset`. On failure the current download
    /// and offset stay as they were.
    async fn reopen_at(&mut self, offset: u64) -> DriveResult<()> {
        let node = self.node.clone().ok_or_else(|| DriveError::NotFound {
            context: self.ctx("seek"),
        })?;
        let body = Self::open_body(&self.fs, &self.path, &node, offset).await?;
        self.state = State::Reading(body);
        self.offset = offset;
        Ok(())
    }

    async fn create_empty(&mut self, op: &'static str) -> DriveResult<Node> {
        let ctx = self.ctx(op);
        let parent = self.parent.clone().ok_or_else(|| DriveError::NotFound {
            context: ctx.clone(),
        })?;
        let Some((parent_path, name)) = path::parent_and_name(&self.path) else {
            return Err(DriveError::IsADirectory { context: ctx });
        };
        let store = &self.fs.store;
        let meta = NewNode::file(name, parent.id.clone());
        let created = with_retry(&self.fs.config.retry, &self.fs.cancel, "create_node", || {
            let empty: MediaStream = Box::pin(tokio::io::empty());
            store.create_node(meta.clone(), Some(empty))
        })
        .await
        .map_err(|e| DriveError::remote(e, ctx.clone()))?;
        debug!(path = %self.path, id = %created.id, "created file");

        self.fs.resolver.remember(&self.path, &created).await?;
        self.fs
            .invalidate_listing(&parent_path, Some(&parent.id))
            .await?;
        self.node = Some(created.clone());
        Ok(created)
    }

    async fn truncate(&mut self, node: &Node) -> DriveResult<()> {
        let ctx = self.ctx("close").with_node(&node.id);
        let store = &self.fs.store;
        let updated = with_retry(&self.fs.config.retry, &self.fs.cancel, "update_node", || {
            let empty: MediaStream = Box::pin(tokio::io::empty());
            store.update_node(&node.id, None, Some(empty))
        })
        .await
        .map_err(|e| DriveError::remote(e, ctx))?;
        debug!(path = %self.path, id = %updated.id, "truncated file");
        self.fs.resolver.remember(&self.path, &updated).await?;
        if let Some(parent) = self.parent.clone()
            && let Some((parent_path, _)) = path::parent_and_name(&self.path)
        {
            self.fs.invalidate_listing(&parent_path, Some(&parent.id)).await?;
        }
        self.node = Some(updated);
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    async fn begin_write(&mut self) -> DriveResult<()> {
        let node = match self.node.clone() {
            Some(node) if node.is_folder() => {
                return Err(DriveError::IsADirectory {
                    context: self.ctx("write"),
                });
            }
            Some(node) => node,
            None => self.create_empty("write").await?,
        };

        let (pipe, consumer) = tokio::io::duplex(self.fs.config.upload_buffer);
        let store = Arc::clone(&self.fs.store);
        let id = node.id.clone();
        let task = tokio::spawn(async move {
            let body: MediaStream = Box::pin(consumer);
            store.update_node(&id, None, Some(body)).await
        });
        self.state = State::Writing(Upload { pipe, task });

        // A seek before the first write leaves a gap at the start.
        let gap = self.offset;
        if gap > 0 {
            self.pad(gap).await?;
        }
        Ok(())
    }

    async fn pad(&mut self, mut count: u64) -> DriveResult<()> {
        while count > 0 {
            let State::Writing(upload) = &mut self.state else {
                return Err(self.wrong_state("write"));
            };
            let chunk = usize::try_from(count).map_or(ZEROES.len(), |c| c.min(ZEROES.len()));
            if let Err(source) = upload.pipe.write_all(&ZEROES[..chunk]).await {
                return Err(self.abort_upload(source).await);
            }
            count -= chunk as u64;
        }
        Ok(())
    }

    /// The pipe broke, which means the upload task ended early. Its error is
    /// the interesting one.
    async fn abort_upload(&mut self, pipe_error: std::io::Error) -> DriveError {
        let ctx = self.ctx("write");
        let State::Writing(Upload { pipe, task }) = std::mem::replace(&mut self.state, State::Closed)
        else {
            return DriveError::Io {
                source: pipe_error,
                context: ctx,
            };
        };
        drop(pipe);
        match task.await {
            Ok(Err(remote)) => DriveError::remote_once(remote, ctx),
            Err(join) => DriveError::UploadTask {
                source: join,
                context: ctx,
            },
            Ok(Ok(_)) => DriveError::Io {
                source: pipe_error,
                context: ctx,
            },
        }
    }

    /// Releases the transport. For a writing handle this waits for the
    /// upload and returns its error, if any. Closing twice is a no-op.
    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub async fn close(&mut self) -> DriveResult<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed | State::Reading(_) => Ok(()),
            State::Undecided if self.create_on_close => match self.node.clone() {
                None => self.create_empty("close").await.map(drop),
                Some(node) => self.truncate(&node).await,
            },
            State::Undecided => Ok(()),
            State::Writing(Upload { mut pipe, task }) => {
                let ctx = self.ctx("close");
                if let Err(e) = pipe.shutdown().await {
                    trace!(error = %e, "pipe shutdown failed; upload already ended");
                }
                drop(pipe);
                let node = match task.await {
                    Ok(Ok(node)) => node,
                    Ok(Err(remote)) => return Err(DriveError::remote_once(remote, ctx)),
                    Err(join) => {
                        return Err(DriveError::UploadTask {
                            source: join,
                            context: ctx,
                        });
                    }
                };
                debug!(id = %node.id, size = node.size, "upload finished");

                if !self.linked {
                    self.fs.resolver.remember(&self.path, &node).await?;
                }
                if let Some((parent_path, _)) = path::parent_and_name(&self.path) {
                    let parent_id = node.parents.first().cloned();
                    self.fs
                        .invalidate_listing(&parent_path, parent_id.as_ref())
                        .await?;
                }
                self.node = Some(node);
                Ok(())
            }
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        // The upload would read EOF from the dropped pipe and commit a
        // truncated object. Abort it so the old content survives.
        if let State::Writing(upload) = &self.state {
            upload.task.abort();
            warn!(path = %self.path, "file handle dropped while writing; upload aborted");
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("node", &self.node.as_ref().map(|n| &n.id))
            .field("state", &self.state.name())
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Handle to an open directory: a snapshot of its children taken at open.
#[derive(Debug)]
pub struct DirHandle {
    path: String,
    node: Node,
    entries: VecDeque<Metadata>,
    closed: bool,
}

impl DirHandle {
    pub(crate) fn new(path: String, node: Node, children: &[Node]) -> Self {
        Self {
            path,
            node,
            entries: children.iter().map(Metadata::from_node).collect(),
            closed: false,
        }
    }

    /// Canonical path of the directory.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Metadata of the directory itself.
    pub fn stat(&self) -> Metadata {
        Metadata::from_node(&self.node)
    }

    /// Takes up to `count` entries from the snapshot.
    ///
    /// `count <= 0` returns everything left, possibly nothing. A positive
    /// `count` returns `None` once the snapshot is exhausted.
    pub fn read_dir(&mut self, count: isize) -> DriveResult<Option<Vec<Metadata>>> {
        if self.closed {
            return Err(DriveError::WrongState {
                state: "closed",
                context: OpContext::at("read_dir", self.path.clone()),
            });
        }
        let Ok(count) = usize::try_from(count) else {
            return Ok(Some(self.entries.drain(..).collect()));
        };
        if count == 0 {
            return Ok(Some(self.entries.drain(..).collect()));
        }
        if self.entries.is_empty() {
            return Ok(None);
        }
        let take = count.min(self.entries.len());
        Ok(Some(self.entries.drain(..take).collect()))
    }

    /// Closes the handle.
    pub fn close(&mut self) {
        self.closed = true;
        self.entries.clear();
    }
}

/// Result of [`DriveFs::open`](crate::DriveFs::open).
#[derive(Debug)]
pub enum Handle {
    /// A regular file.
    File(FileHandle),
    /// A directory.
    Dir(DirHandle),
}

impl Handle {
    /// Metadata of the opened node.
    pub fn stat(&self) -> DriveResult<Metadata> {
        match self {
            Self::File(f) => f.stat(),
            Self::Dir(d) => Ok(d.stat()),
        }
    }

    /// The file handle, if this is a file.
    pub fn into_file(self) -> Option<FileHandle> {
        match self {
            Self::File(f) => Some(f),
            Self::Dir(_) => None,
        }
    }

    /// The directory handle, if this is a directory.
    pub fn into_dir(self) -> Option<DirHandle> {
        match self {
            Self::Dir(d) => Some(d),
            Self::File(_) => None,
        }
    }

    /// Closes either kind of handle.
    pub async fn close(&mut self) -> DriveResult<()> {
        match self {
            Self::File(f) => f.close().await,
            Self::Dir(d) => {
                d.close();
                Ok(())
            }
        }
    }
}
