//! Canonical error taxonomy and the remote error normalizer.
//!
//! Consumers of the filesystem (a FUSE layer, an HTTP file server) need a
//! small, fixed set of outcomes. [`ErrorKind`] is that set, convertible to
//! errno values, HTTP statuses and `std::io::ErrorKind`.
//!
//! # Mapping rules
//!
//! Applied in this order by [`normalize`]:
//!
//! 1. Status codes: 404 NotFound; 400 and 403 InvalidArgument; 401 and 429
//!    PermissionOrQuota; 409 AlreadyExists; 5xx InvalidArgument.
//! 2. Structured API errors re-apply rule 1 to their embedded code, except
//!    that a quota-failure detail always maps to PermissionOrQuota.
//! 3. A "go away" or a reset connection is Transient.
//! 4. Everything else is Unknown.
//!
//! Server faults (5xx) are deliberately not retried.

use crate::remote::RemoteError;
use std::fmt;
use std::io;

/// Canonical error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Does not exist (ENOENT, HTTP 404).
    NotFound,
    /// Invalid argument or unusable state (EINVAL, HTTP 400).
    InvalidArgument,
    /// Permission denied or quota exhausted (EACCES, HTTP 403).
    PermissionOrQuota,
    /// Already exists (EEXIST, HTTP 409).
    AlreadyExists,
    /// Expected to succeed on retry. Never leaves the filesystem surface.
    Transient,
    /// Anything else (EIO, HTTP 500).
    Unknown,
}

impl ErrorKind {
    /// POSIX errno for FUSE-style consumers.
    #[inline]
    pub fn to_errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::InvalidArgument => libc::EINVAL,
            Self::PermissionOrQuota => libc::EACCES,
            Self::AlreadyExists => libc::EEXIST,
            Self::Transient => libc::EAGAIN,
            Self::Unknown => libc::EIO,
        }
    }

    /// HTTP status for file-server consumers.
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::InvalidArgument => 400,
            Self::PermissionOrQuota => 403,
            Self::AlreadyExists => 409,
            Self::Transient => 503,
            Self::Unknown => 500,
        }
    }

    /// Closest `std::io::ErrorKind`.
    pub fn io_kind(self) -> io::ErrorKind {
        match self {
            Self::NotFound => io::ErrorKind::NotFound,
            Self::InvalidArgument => io::ErrorKind::InvalidInput,
            Self::PermissionOrQuota => io::ErrorKind::PermissionDenied,
            Self::AlreadyExists => io::ErrorKind::AlreadyExists,
            Self::Transient => io::ErrorKind::Interrupted,
            Self::Unknown => io::ErrorKind::Other,
        }
    }

    /// Kind as seen outside the engine: a Transient failure that survived
    /// the retry policy is reported as Unknown.
    pub fn settle(self) -> Self {
        match self {
            Self::Transient => Self::Unknown,
            other => other,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::InvalidArgument => "InvalidArgument",
            Self::PermissionOrQuota => "PermissionOrQuota",
            Self::AlreadyExists => "AlreadyExists",
            Self::Transient => "Transient",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Not retryable.
    Never,
    /// Connection was dropped; retry soon.
    Reset,
    /// Server asked us to slow down; retry after a cooldown.
    RateLimited,
}

/// Outcome of normalizing a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized {
    /// Canonical kind.
    pub kind: ErrorKind,
    /// Retry eligibility.
    pub retry: RetryClass,
}

/// Maps a status code following rule 1.
pub fn status_kind(code: u16) -> ErrorKind {
    match code {
        404 => ErrorKind::NotFound,
        400 | 403 => ErrorKind::InvalidArgument,
        401 | 429 => ErrorKind::PermissionOrQuota,
        409 => ErrorKind::AlreadyExists,
        500..=599 => ErrorKind::InvalidArgument,
        _ => ErrorKind::Unknown,
    }
}

fn status_retry(code: u16) -> RetryClass {
    if code == 429 {
        RetryClass::RateLimited
    } else {
        RetryClass::Never
    }
}

/// Classifies an I/O error.
pub fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionOrQuota,
        io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidArgument,
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => ErrorKind::Transient,
        _ => ErrorKind::Unknown,
    }
}

/// Normalizes a remote failure into a canonical kind and retry class.
pub fn normalize(err: &RemoteError) -> Normalized {
    match err {
        RemoteError::Status { code, .. } => Normalized {
            kind: status_kind(*code),
            retry: status_retry(*code),
        },
        RemoteError::Api {
            code,
            quota_exceeded,
            ..
        } => Normalized {
            kind: if *quota_exceeded {
                ErrorKind::PermissionOrQuota
            } else {
                status_kind(*code)
            },
            retry: status_retry(*code),
        },
        RemoteError::GoAway { .. } => Normalized {
            kind: ErrorKind::Transient,
            retry: RetryClass::Reset,
        },
        RemoteError::Io(source) => {
            let kind = io_error_kind(source);
            Normalized {
                kind,
                retry: if kind == ErrorKind::Transient {
                    RetryClass::Reset
                } else {
                    RetryClass::Never
                },
            }
        }
        RemoteError::Other(_) => Normalized {
            kind: ErrorKind::Unknown,
            retry: RetryClass::Never,
        },
    }
}

impl From<&RemoteError> for ErrorKind {
    fn from(err: &RemoteError) -> Self {
        normalize(err).kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> RemoteError {
        RemoteError::Status {
            code,
            message: String::new(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::from(&status(404)), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from(&status(400)), ErrorKind::InvalidArgument);
        assert_eq!(ErrorKind::from(&status(403)), ErrorKind::InvalidArgument);
        assert_eq!(ErrorKind::from(&status(401)), ErrorKind::PermissionOrQuota);
        assert_eq!(ErrorKind::from(&status(429)), ErrorKind::PermissionOrQuota);
        assert_eq!(ErrorKind::from(&status(409)), ErrorKind::AlreadyExists);
        assert_eq!(ErrorKind::from(&status(418)), ErrorKind::Unknown);
    }

    #[test]
    fn test_server_faults_are_not_transient() {
        for code in [500, 502, 503, 599] {
            let n = normalize(&status(code));
            assert_eq!(n.kind, ErrorKind::InvalidArgument, "status {code}");
            assert_eq!(n.retry, RetryClass::Never, "status {code}");
        }
    }

    #[test]
    fn test_only_rate_limit_status_is_retried() {
        assert_eq!(normalize(&status(429)).retry, RetryClass::RateLimited);
        assert_eq!(normalize(&status(401)).retry, RetryClass::Never);
        assert_eq!(normalize(&status(404)).retry, RetryClass::Never);
    }

    #[test]
    fn test_api_error_reapplies_embedded_code() {
        let err = RemoteError::Api {
            code: 409,
            message: "duplicate".into(),
            quota_exceeded: false,
        };
        assert_eq!(ErrorKind::from(&err), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_quota_detail_wins() {
        let err = RemoteError::Api {
            code: 404,
            message: "quota".into(),
            quota_exceeded: true,
        };
        assert_eq!(ErrorKind::from(&err), ErrorKind::PermissionOrQuota);

        let limited = RemoteError::Api {
            code: 429,
            message: "slow down".into(),
            quota_exceeded: true,
        };
        assert_eq!(normalize(&limited).retry, RetryClass::RateLimited);
    }

    #[test]
    fn test_go_away_is_transient() {
        let n = normalize(&RemoteError::GoAway {
            debug: "max streams".into(),
        });
        assert_eq!(n.kind, ErrorKind::Transient);
        assert_eq!(n.retry, RetryClass::Reset);
    }

    #[test]
    fn test_io_errors() {
        let reset = RemoteError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(normalize(&reset).retry, RetryClass::Reset);

        let denied = RemoteError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(ErrorKind::from(&denied), ErrorKind::PermissionOrQuota);

        let other = RemoteError::Io(io::Error::other("disk on fire"));
        assert_eq!(ErrorKind::from(&other), ErrorKind::Unknown);
    }

    #[test]
    fn test_other_passes_through_as_unknown() {
        assert_eq!(
            ErrorKind::from(&RemoteError::Other("weird".into())),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_errno_and_http() {
        assert_eq!(ErrorKind::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(ErrorKind::AlreadyExists.to_errno(), libc::EEXIST);
        assert_eq!(ErrorKind::PermissionOrQuota.http_status(), 403);
        assert_eq!(ErrorKind::InvalidArgument.http_status(), 400);
        assert_eq!(ErrorKind::Transient.settle(), ErrorKind::Unknown);
        assert_eq!(ErrorKind::NotFound.settle(), ErrorKind::NotFound);
    }
}
