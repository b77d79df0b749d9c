//! Error types for cache backends.

use thiserror::Error;

/// Result alias used by every cache operation.
pub type CacheResult<T> = Result<T, CacheError>;

/// Failure of a cache backend.
///
/// A missing or expired key is not an error; `get` returns `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A value could not be encoded to, or decoded from, its textual form.
    #[error("{encoding} codec failed: {message}")]
    Codec {
        /// Name of the encoding that failed.
        encoding: &'static str,
        /// Underlying error description.
        message: String,
    },

    /// The SQLite backend failed.
    #[error("sqlite cache error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The remote key-value service failed.
    #[error("key-value service error on '{key}': {source}")]
    Remote {
        /// Key (or namespace) involved in the failing request.
        key: String,
        /// Error reported by the client.
        #[source]
        source: crate::KvError,
    },

    /// A blocking backend task panicked or was cancelled.
    #[error("cache worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// Writing a cache dump failed.
    #[error("cache dump failed: {0}")]
    Io(#[from] std::io::Error),

    /// A table name or namespace is not a plain identifier.
    #[error("invalid cache identifier '{0}'")]
    InvalidIdentifier(String),
}

impl CacheError {
    pub(crate) fn codec(encoding: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Codec {
            encoding,
            message: err.to_string(),
        }
    }
}
