//! Filesystem configuration.
//!
//! Everything tunable is passed explicitly at construction; nothing is read
//! from process-wide state.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default TTL for resolved path entries (5 minutes).
pub const DEFAULT_PATH_TTL: Duration = Duration::from_secs(5 * 60);

/// Default TTL for directory listings (2 minutes).
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(2 * 60);

/// Default capacity of the in-process write pipe (64 KiB).
pub const DEFAULT_UPLOAD_BUFFER: usize = 64 * 1024;

/// Default number of shortcut hops followed before giving up.
pub const DEFAULT_SYMLINK_LIMIT: u32 = 40;

/// Native document types that have no byte stream to read.
pub const DEFAULT_PLACEHOLDER_MIME_TYPES: &[&str] = &[
    "application/vnd.google-apps.document",
    "application/vnd.google-apps.spreadsheet",
    "application/vnd.google-apps.presentation",
    "application/vnd.google-apps.form",
    "application/vnd.google-apps.drawing",
    "application/vnd.google-apps.map",
    "application/vnd.google-apps.site",
    "application/vnd.google-apps.jam",
    "application/vnd.google-apps.script",
];

/// Configuration for a [`DriveFs`](crate::DriveFs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// ID of the folder the filesystem is rooted at.
    pub root_id: String,

    /// How long a resolved path stays cached.
    #[serde(with = "humantime_serde")]
    pub path_ttl: Duration,

    /// How long a directory listing stays cached. Listings may be stale by
    /// up to this long.
    #[serde(with = "humantime_serde")]
    pub listing_ttl: Duration,

    /// Retry policy for remote calls.
    pub retry: RetryPolicy,

    /// Mime types hidden from listings.
    pub placeholder_mime_types: Vec<String>,

    /// Bytes buffered between a writing handle and its upload task.
    pub upload_buffer: usize,

    /// Maximum shortcut hops followed by `stat`, `open` and `read_link`.
    pub symlink_limit: u32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            root_id: "root".to_string(),
            path_ttl: DEFAULT_PATH_TTL,
            listing_ttl: DEFAULT_LISTING_TTL,
            retry: RetryPolicy::default(),
            placeholder_mime_types: DEFAULT_PLACEHOLDER_MIME_TYPES
                .iter()
                .map(ToString::to_string)
                .collect(),
            upload_buffer: DEFAULT_UPLOAD_BUFFER,
            symlink_limit: DEFAULT_SYMLINK_LIMIT,
        }
    }
}

impl DriveConfig {
    /// Sets the root folder ID.
    #[must_use]
    pub fn root_id(mut self, id: impl Into<String>) -> Self {
        self.root_id = id.into();
        self
    }

    /// Sets the path cache TTL.
    #[must_use]
    pub fn path_ttl(mut self, ttl: Duration) -> Self {
        self.path_ttl = ttl;
        self
    }

    /// Sets the listing cache TTL.
    #[must_use]
    pub fn listing_ttl(mut self, ttl: Duration) -> Self {
        self.listing_ttl = ttl;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the hidden mime types.
    #[must_use]
    pub fn placeholder_mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.placeholder_mime_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the write pipe capacity.
    #[must_use]
    pub fn upload_buffer(mut self, bytes: usize) -> Self {
        self.upload_buffer = bytes.max(1);
        self
    }

    /// Sets the shortcut hop limit.
    #[must_use]
    pub fn symlink_limit(mut self, hops: u32) -> Self {
        self.symlink_limit = hops;
        self
    }
}
