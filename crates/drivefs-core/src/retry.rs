//! Bounded retry of remote calls.
//!
//! Only failures classified as retryable by [`normalize`](crate::normalize::normalize)
//! are repeated: abrupt connection termination after a short delay, rate
//! limiting after a long cooldown. Waiting races the caller's cancellation
//! token, so a cancelled filesystem call never sleeps out the cooldown.

use crate::normalize::{normalize, ErrorKind, RetryClass};
use crate::remote::RemoteError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default delay after the peer dropped the connection.
pub const DEFAULT_RESET_DELAY: Duration = Duration::from_millis(2);

/// Default cooldown after a rate-limit response.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);

/// How often and how long to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per call, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before retrying after a connection reset.
    #[serde(with = "humantime_serde")]
    pub reset_delay: Duration,
    /// Delay before retrying after rate limiting.
    #[serde(with = "humantime_serde")]
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            reset_delay: DEFAULT_RESET_DELAY,
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the attempt ceiling.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay used after connection resets.
    #[must_use]
    pub fn reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    /// Sets the delay used after rate limiting.
    #[must_use]
    pub fn rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    /// Delay before the next attempt, or `None` if the class is not retryable.
    pub fn delay_for(&self, class: RetryClass) -> Option<Duration> {
        match class {
            RetryClass::Never => None,
            RetryClass::Reset => Some(self.reset_delay),
            RetryClass::RateLimited => Some(self.rate_limit_delay),
        }
    }
}

/// A remote call that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError {
    /// The last attempt failed and no further attempt is allowed.
    #[error("{source} (after {attempts} attempt(s))")]
    Failed {
        /// Error of the last attempt.
        #[source]
        source: RemoteError,
        /// Its canonical kind.
        kind: ErrorKind,
        /// Attempts made.
        attempts: u32,
    },

    /// The cancellation token fired before the call could succeed.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Attempts made.
        attempts: u32,
    },
}

/// Runs `call` until it succeeds, fails permanently, runs out of attempts,
/// or `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op: &'static str,
    mut call: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts });
        }
        attempts += 1;
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let normalized = normalize(&err);
        let delay = match policy.delay_for(normalized.retry) {
            Some(delay) if attempts < max_attempts => delay,
            _ => {
                debug!(op, attempts, kind = %normalized.kind, error = %err, "remote call failed");
                return Err(RetryError::Failed {
                    source: err,
                    kind: normalized.kind,
                    attempts,
                });
            }
        };

        warn!(op, attempts, kind = %normalized.kind, ?delay, error = %err, "retrying remote call");
        tokio::select! {
            () = cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn go_away() -> RemoteError {
        RemoteError::GoAway {
            debug: String::new(),
        }
    }

    fn status(code: u16) -> RemoteError {
        RemoteError::Status {
            code,
            message: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retried_until_ceiling() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default().max_attempts(4);

        let result: Result<(), _> = with_retry(&policy, &CancellationToken::new(), "get", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(go_away()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(RetryError::Failed { kind, attempts, .. }) => {
                assert_eq!(kind, ErrorKind::Transient);
                assert_eq!(kind.settle(), ErrorKind::Unknown);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_never_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> =
            with_retry(&RetryPolicy::default(), &CancellationToken::new(), "get", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(status(404)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(RetryError::Failed {
                kind: ErrorKind::NotFound,
                attempts: 1,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_rate_limit() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = with_retry(&RetryPolicy::default(), &CancellationToken::new(), "list", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n == 0 { Err(status(429)) } else { Ok(7) } }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert!(started.elapsed() >= DEFAULT_RATE_LIMIT_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_cooldown() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), &cancel, "get", || async {
            Err(status(429))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert!(started.elapsed() < DEFAULT_RATE_LIMIT_DELAY);
    }

    #[test]
    fn test_policy_from_config_text() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 3, "rate_limit_delay": "5s"}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.rate_limit_delay, Duration::from_secs(5));
        assert_eq!(policy.reset_delay, DEFAULT_RESET_DELAY);
    }
}
