//! Lock-contention retry
//!
//! SQLite serializes writers; a transaction that cannot take the write lock
//! fails with "database is locked". Per-lead read-modify-write units are
//! retried here until they commit or the configured wait is exhausted.

use afc_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Run `attempt_fn` until it commits, backing off while the store is locked.
///
/// Only lock contention is retried; any other error returns at once. The
/// backoff starts at 10 ms and doubles up to 1 s between attempts. Once
/// `max_wait_ms` has passed the contention is reported as `Error::Internal`.
///
/// Each attempt must be self-contained (open its own transaction), since a
/// failed attempt is simply run again.
pub async fn retry_on_lock<F, Fut, T>(label: &str, max_wait_ms: u64, mut attempt_fn: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let deadline = Duration::from_millis(max_wait_ms);
    let mut attempts = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempts += 1;
        let err = match attempt_fn().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(label, attempts, "Committed after lock contention");
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let elapsed = started.elapsed();
        if elapsed >= deadline {
            tracing::error!(
                label,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "Store still locked, giving up"
            );
            return Err(Error::Internal(format!(
                "{} still locked after {} attempts ({} ms)",
                label,
                attempts,
                elapsed.as_millis()
            )));
        }

        tracing::warn!(label, attempts, backoff_ms, "Store locked, backing off");
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_uncontended_commit_runs_once() {
        let value = retry_on_lock("insert lead", 5000, || async { Ok::<u8, Error>(7) }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_contention() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("dispatch", 5000, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Error::Conflict("lead row busy".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retry_surfaces_internal() {
        let result = retry_on_lock("dispatch", 30, || async {
            Err::<i32, Error>(Error::Conflict("still busy".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("dispatch", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::Validation("bad".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
