//! Background jobs: the hold-expiration sweep and end-of-day reconciliation.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use corebank_common::{next_local_time, now, yesterday_in, LedgerError, Result};
use corebank_ledger::ReconciliationReport;
use corebank_reconciliation::ReconciliationEngine;

use crate::config::SchedulerConfig;
use crate::metrics::SharedMetrics;
use crate::transfer::{ExpirySummary, TransferEngine};

/// Owns the background job tasks.
pub struct Scheduler {
    config: SchedulerConfig,
    timezone: Tz,
    transfers: Arc<TransferEngine>,
    reconciliation: Arc<ReconciliationEngine>,
    metrics: SharedMetrics,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        timezone: Tz,
        transfers: Arc<TransferEngine>,
        reconciliation: Arc<ReconciliationEngine>,
        metrics: SharedMetrics,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            config,
            timezone,
            transfers,
            reconciliation,
            metrics,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the enabled jobs.
    pub fn start(self: &Arc<Self>) {
        let _ = self.shutdown_tx.send(false);
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("Scheduler already started");
            return;
        }

        if self.config.hold_sweep_enabled {
            let scheduler = Arc::clone(self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(scheduler.config.hold_sweep_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = ticker.tick() => {
                            // A failed sweep is retried on the next tick.
                            let _ = scheduler.sweep_holds().await;
                        }
                    }
                }
                debug!("Hold sweep stopped");
            }));
        }

        if self.config.eod_enabled {
            let scheduler = Arc::clone(self);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    let current = now();
                    let next = next_local_time(current, scheduler.config.eod_time, scheduler.timezone);
                    let wait = (next - current).to_std().unwrap_or_default();
                    debug!(next_run = %next, "End-of-day reconciliation scheduled");

                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(wait) => {
                            let date = yesterday_in(scheduler.timezone);
                            let _ = scheduler.reconcile(date).await;
                        }
                    }
                }
                debug!("End-of-day job stopped");
            }));
        }

        info!(
            hold_sweep = self.config.hold_sweep_enabled,
            end_of_day = self.config.eod_enabled,
            "Scheduler started"
        );
    }

    /// Signal shutdown and wait for the jobs to finish their current run.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task panicked");
            }
        }
        info!("Scheduler stopped");
    }

    /// One hold-expiration sweep.
    pub async fn sweep_holds(&self) -> Result<ExpirySummary> {
        match self.transfers.expire_holds().await {
            Ok(summary) => {
                self.metrics.record_expired_holds(summary.expired);
                Ok(summary)
            }
            Err(e) => {
                error!(error = %e, "Hold expiry sweep failed");
                Err(e)
            }
        }
    }

    /// One reconciliation run for `date`.
    ///
    /// A run already in flight is skipped, not counted as a failure.
    pub async fn reconcile(&self, date: NaiveDate) -> Result<ReconciliationReport> {
        match self.reconciliation.run(date).await {
            Ok(report) => {
                self.metrics
                    .reconciliation_completed(report.total_discrepancies);
                Ok(report)
            }
            Err(LedgerError::ReconciliationInProgress) => {
                info!(%date, "Reconciliation already running, skipping");
                Err(LedgerError::ReconciliationInProgress)
            }
            Err(e) => {
                self.metrics.reconciliation_failed();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use corebank_common::{
        channel, AuthCode, PaymentTypeId, RetryPolicy, Transaction, TransactionStatus,
        DEFAULT_LEDGER_TIMEZONE,
    };
    use corebank_ledger::{
        EventPublisher, InMemoryAuditLog, InMemoryLedgerStore, LedgerStore, TransactionRunner,
    };
    use corebank_reconciliation::{ReconciliationConfig, ResponseEngine, TransactionGuard};
    use rust_decimal_macros::dec;

    use crate::hold_manager::HoldManager;
    use crate::metrics::Metrics;

    fn scheduler(store: Arc<InMemoryLedgerStore>, config: SchedulerConfig) -> (Arc<Scheduler>, SharedMetrics) {
        let runner = TransactionRunner::new(store.clone(), RetryPolicy::default());
        let transfers = Arc::new(TransferEngine::new(
            runner.clone(),
            TransactionGuard::new(DEFAULT_LEDGER_TIMEZONE),
            HoldManager::new(chrono::Duration::hours(24)),
            EventPublisher::disabled(),
        ));
        let response = Arc::new(ResponseEngine::new(
            runner,
            Arc::new(InMemoryAuditLog::new()),
            EventPublisher::disabled(),
            ReconciliationConfig::default(),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(store, response));
        let metrics = Arc::new(Metrics::new());
        let scheduler = Arc::new(Scheduler::new(
            config,
            DEFAULT_LEDGER_TIMEZONE,
            transfers,
            reconciliation,
            metrics.clone(),
        ));
        (scheduler, metrics)
    }

    async fn lapsed_authorization(store: &InMemoryLedgerStore) -> Transaction {
        let a = store.open_account("A", dec!(500)).await.unwrap();
        let b = store.open_account("B", dec!(0)).await.unwrap();
        let expired_at = Utc::now() - chrono::Duration::seconds(1);
        let transaction = store.force_insert_transaction(Transaction::authorized(
            a.id,
            b.id,
            dec!(200),
            PaymentTypeId::new(3),
            channel::API,
            AuthCode::generate(),
            expired_at,
        ))
        .unwrap();
        let mut tx = store.begin().await.unwrap();
        let mut acc = tx.lock_account(a.id).await.unwrap();
        HoldManager::new(chrono::Duration::hours(24))
            .place(tx.as_mut(), &mut acc, transaction.id, dec!(200), expired_at)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        transaction
    }

    #[tokio::test]
    async fn test_periodic_sweep_releases_lapsed_holds() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let transaction = lapsed_authorization(&store).await;
        let config = SchedulerConfig {
            hold_sweep_interval: Duration::from_millis(20),
            eod_enabled: false,
            ..Default::default()
        };
        let (scheduler, metrics) = scheduler(store.clone(), config);

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;

        assert_eq!(
            store.transaction(transaction.id).await.unwrap().status,
            TransactionStatus::Cancelled
        );
        let a = store.account_by_number("A").await.unwrap();
        assert_eq!(a.available_balance, Some(dec!(500)));
        assert_eq!(metrics.snapshot(0).holds_expired, 1);
    }

    #[tokio::test]
    async fn test_stop_without_jobs_returns() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let config = SchedulerConfig {
            hold_sweep_enabled: false,
            eod_enabled: true,
            ..Default::default()
        };
        let (scheduler, _) = scheduler(store, config);
        scheduler.start();
        tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
            .await
            .unwrap();
        // A second stop has nothing to join.
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_reconcile_records_metrics() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.open_account("A", dec!(100)).await.unwrap();
        let (scheduler, metrics) = scheduler(store, SchedulerConfig::default());

        let report = scheduler
            .reconcile(yesterday_in(DEFAULT_LEDGER_TIMEZONE))
            .await
            .unwrap();
        assert_eq!(report.total_discrepancies, 0);
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.reconciliation_runs, 1);
        assert_eq!(snapshot.reconciliation_failures, 0);
    }
}
