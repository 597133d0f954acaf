//! Bounded fixed-backoff retry for lock conflicts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{LedgerError, Result};

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    ///
    /// Exhaustion surfaces as [`LedgerError::RetryExhausted`].
    pub async fn run<F, Fut, T>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Err(e) if e.is_retryable() => {
                    if attempt >= max_attempts {
                        warn!(
                            operation,
                            attempts = attempt,
                            error = %e,
                            "Retries exhausted"
                        );
                        return Err(LedgerError::RetryExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                        });
                    }

                    warn!(
                        operation,
                        attempt,
                        backoff_ms = self.backoff.as_millis() as u64,
                        error = %e,
                        "Retrying after lock conflict"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(1))
    }

    fn conflict() -> LedgerError {
        LedgerError::LockConflict {
            resource: "account:1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_eventual_availability() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result = fast_policy()
            .run("deposit", move || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(conflict())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<()> = fast_policy()
            .run("capture", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            })
            .await;

        assert_eq!(
            result,
            Err(LedgerError::RetryExhausted {
                operation: "capture".to_string(),
                attempts: 5
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result: Result<()> = fast_policy()
            .run("withdraw", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::AccountNotFound("X".to_string()))
            })
            .await;

        assert_eq!(result, Err(LedgerError::AccountNotFound("X".to_string())));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
