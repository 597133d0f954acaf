//! Runs units of work under retry and a per-attempt timeout.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corebank_common::{constants, LedgerError, Result, RetryPolicy};
use tracing::warn;

use crate::store::{LedgerStore, LedgerTransaction};

/// Opens a fresh unit of work per attempt and retries lock conflicts.
#[derive(Clone)]
pub struct TransactionRunner {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
    timeout: Duration,
    conflicts: Arc<AtomicU64>,
}

impl TransactionRunner {
    /// Create a runner with the default transaction timeout.
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            timeout: constants::transaction_timeout(),
            conflicts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Same store and retry policy, different per-attempt timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            store: self.store.clone(),
            retry: self.retry,
            timeout,
            conflicts: self.conflicts.clone(),
        }
    }

    /// Lock conflicts seen so far by this runner and its clones.
    pub fn lock_conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Run `work` in its own unit of work.
    ///
    /// `work` owns the unit of work and must commit it. An attempt that
    /// outlives the timeout is dropped, which rolls it back.
    pub async fn run<T, F, Fut>(&self, operation: &str, work: F) -> Result<T>
    where
        F: Fn(Box<dyn LedgerTransaction>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let work = &work;
        self.retry
            .run(operation, move || async move {
                let tx = self.store.begin().await?;
                match tokio::time::timeout(self.timeout, work(tx)).await {
                    Ok(Err(e)) if e.is_retryable() => {
                        self.conflicts.fetch_add(1, Ordering::Relaxed);
                        Err(e)
                    }
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            operation,
                            timeout_ms = self.timeout.as_millis() as u64,
                            "Operation timed out"
                        );
                        Err(LedgerError::OperationTimeout {
                            operation: operation.to_string(),
                        })
                    }
                }
            })
            .await
    }
}
