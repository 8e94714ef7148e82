//! Storage Retry Logic
//!
//! Exponential backoff for transient catalog storage failures
//! (`StorageUnavailable`). Every other error is returned immediately.

use crate::error::CatalogResult;
use std::time::{Duration, Instant};

/// Bounded retry policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy with the default 10ms..1000ms backoff window
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(1000),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_attempts(5)
    }
}

/// Retry a storage operation with exponential backoff
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If `StorageUnavailable` and attempts remain: log WARN, backoff, retry
/// 4. If attempts are exhausted: log ERROR, return the last error
/// 5. Any other error: return immediately (no retry)
///
/// **Backoff Strategy:** initial delay doubled per attempt, capped at `max_backoff`.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> CatalogResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CatalogResult<T>>,
{
    let start_time = Instant::now();
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(
                operation = operation_name,
                attempt,
                "Retrying storage operation"
            );
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Storage operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_transient_storage() => {
                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Storage operation failed: retry attempts exhausted"
                    );
                    return Err(err);
                }

                let delay = backoff.min(policy.max_backoff);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Storage unavailable, will retry after backoff"
                );

                tokio::time::sleep(delay).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_transient("test_op", fast_policy(3), || async {
            Ok::<i32, CatalogError>(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_errors() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let result = retry_transient("test_op", fast_policy(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(CatalogError::StorageUnavailable("database is locked".to_string()))
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
    async fn test_retry_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let result = retry_transient("test_op", fast_policy(4), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(CatalogError::StorageUnavailable("down".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(CatalogError::StorageUnavailable(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let result = retry_transient("test_op", fast_policy(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(CatalogError::Conflict("lost race".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(CatalogError::Conflict(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
