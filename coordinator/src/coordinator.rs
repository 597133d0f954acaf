//! Service facade.
//!
//! Wires the store, engines, notifier and scheduler, and gates every
//! request-facing operation on the service state.

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use corebank_common::{
    AuthCode, DiscrepancyId, JournalEntryId, LedgerError, ReportId, Result, Timestamp,
    TransactionId,
};
use corebank_ledger::{
    AccountBalance, AccountHold, AccountLimits, AccountTier, AuditLog, EventPublisher,
    HoldStatus, InMemoryLedgerStore, JournalEngine, JournalEntry, JournalFilter, LedgerEvent,
    LedgerStore, PostedJournal, PostingLine, ReconciliationDiscrepancy, ReconciliationReport,
    Severity, TracingAuditLog, TransactionRunner,
};
use corebank_reconciliation::{ReconciliationEngine, ResponseEngine, TransactionGuard};

use crate::cash::{CashEngine, CashReceipt};
use crate::config::CoordinatorConfig;
use crate::hold_manager::HoldManager;
use crate::metrics::{Metrics, MetricsSnapshot, OperationKind, SharedMetrics};
use crate::notification::Notifier;
use crate::scheduler::Scheduler;
use crate::state::CoordinatorState;
use crate::transfer::{ExpirySummary, TransferEngine, TransferReceipt};

/// Account as shown to a customer or operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountView {
    #[serde(flatten)]
    pub balance: AccountBalance,
    /// Soft limits currently in force.
    pub limits: Option<AccountLimits>,
    /// Active holds.
    pub holds: Vec<AccountHold>,
}

/// The core-banking service.
pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
    state: Arc<RwLock<CoordinatorState>>,
    store: Arc<dyn LedgerStore>,
    runner: TransactionRunner,
    journal: JournalEngine,
    cash: CashEngine,
    transfers: Arc<TransferEngine>,
    reconciliation: Arc<ReconciliationEngine>,
    notifier: Arc<Notifier>,
    scheduler: Arc<Scheduler>,
    metrics: SharedMetrics,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LedgerEvent>>>,
    notifier_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Coordinator {
    /// Service over a fresh in-memory ledger.
    pub fn new(config: CoordinatorConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::with_lock_wait_timeout(
            config.transaction.lock_wait_timeout,
        ));
        Self::with_store(config, store, Arc::new(TracingAuditLog))
    }

    /// Service over an existing store and audit sink.
    pub fn with_store(
        config: CoordinatorConfig,
        store: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| format!("corebank-{}", uuid::Uuid::new_v4()));

        let runner = TransactionRunner::new(store.clone(), config.transaction.retry_policy())
            .with_timeout(config.transaction.operation_timeout);
        let (events, events_rx) = EventPublisher::channel();
        let metrics = Arc::new(Metrics::new());
        let timezone = config.reconciliation.timezone;
        let guard = TransactionGuard::new(timezone);

        let journal = JournalEngine::new(runner.clone(), audit.clone());
        let response = Arc::new(ResponseEngine::new(
            runner.clone(),
            audit,
            events.clone(),
            config.reconciliation.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(store.clone(), response));
        let cash = CashEngine::new(runner.clone(), guard, events.clone());
        let transfers = Arc::new(TransferEngine::new(
            runner.clone(),
            guard,
            HoldManager::new(config.transaction.authorization_ttl),
            events,
        ));
        let notifier = Arc::new(Notifier::new(config.notification.clone(), metrics.clone()));
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            timezone,
            transfers.clone(),
            reconciliation.clone(),
            metrics.clone(),
        ));
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            config,
            node_id,
            state: Arc::new(RwLock::new(CoordinatorState::Starting)),
            store,
            runner,
            journal,
            cash,
            transfers,
            reconciliation,
            notifier,
            scheduler,
            metrics,
            events_rx: Mutex::new(Some(events_rx)),
            notifier_handle: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Seed the pool account, start the notifier and the background jobs.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn start(&self) -> Result<()> {
        if *self.state.read() != CoordinatorState::Starting {
            return Err(LedgerError::ServiceUnavailable(format!(
                "cannot start from state {}",
                self.state().as_str()
            )));
        }
        info!("Starting core banking service");

        self.ensure_pool_account().await?;

        if let Some(events_rx) = self.events_rx.lock().take() {
            let handle = self
                .notifier
                .clone()
                .spawn(events_rx, self.shutdown_tx.subscribe());
            *self.notifier_handle.lock() = Some(handle);
        }
        self.scheduler.start();

        *self.state.write() = CoordinatorState::Running;
        info!("Core banking service started");
        Ok(())
    }

    /// Stop accepting requests, stop the jobs and drain the notifier.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if matches!(
                *state,
                CoordinatorState::ShuttingDown | CoordinatorState::Stopped
            ) {
                return Ok(());
            }
            *state = CoordinatorState::ShuttingDown;
        }
        info!("Stopping core banking service");

        self.scheduler.stop().await;
        let _ = self.shutdown_tx.send(true);
        let handle = self.notifier_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Notifier task panicked");
            }
        }

        *self.state.write() = CoordinatorState::Stopped;
        info!("Core banking service stopped");
        Ok(())
    }

    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Notification router, e.g. to register contact details.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.runner.lock_conflicts())
    }

    // --- Accounts ---

    pub async fn open_account(
        &self,
        account_number: &str,
        opening_balance: Decimal,
    ) -> Result<AccountView> {
        self.ensure_running()?;
        let account = self.store.open_account(account_number, opening_balance).await?;
        info!(account = %account.account_number, balance = %account.balance, "Account opened");
        self.view(account_number).await
    }

    /// Balances, limits and active holds of an account.
    pub async fn account(&self, account_number: &str) -> Result<AccountView> {
        self.ensure_running()?;
        self.view(account_number).await
    }

    // --- Cash ---

    pub async fn deposit(&self, account_number: &str, amount: Decimal) -> Result<CashReceipt> {
        self.ensure_running()?;
        let result = self.cash.deposit(account_number, amount).await;
        self.metrics.record(OperationKind::Deposit, &result);
        result
    }

    pub async fn withdraw(&self, account_number: &str, amount: Decimal) -> Result<CashReceipt> {
        self.ensure_running()?;
        let result = self.cash.withdraw(account_number, amount).await;
        self.metrics.record(OperationKind::Withdrawal, &result);
        result
    }

    // --- Transfers ---

    pub async fn authorize(
        &self,
        source_account: &str,
        destination_account: &str,
        amount: Decimal,
        channel: Option<&str>,
    ) -> Result<TransferReceipt> {
        self.ensure_running()?;
        let result = self
            .transfers
            .authorize(source_account, destination_account, amount, channel)
            .await;
        self.metrics.record(OperationKind::Authorize, &result);
        result
    }

    pub async fn capture(&self, auth_code: &AuthCode) -> Result<TransferReceipt> {
        self.ensure_running()?;
        let result = self.transfers.capture(auth_code).await;
        self.metrics.record(OperationKind::Capture, &result);
        result
    }

    pub async fn settle(&self, auth_code: &AuthCode) -> Result<TransferReceipt> {
        self.ensure_running()?;
        let result = self.transfers.settle(auth_code).await;
        self.metrics.record(OperationKind::Settle, &result);
        result
    }

    pub async fn cancel(&self, auth_code: &AuthCode) -> Result<TransferReceipt> {
        self.ensure_running()?;
        let result = self.transfers.cancel(auth_code).await;
        self.metrics.record(OperationKind::Cancel, &result);
        result
    }

    /// Run the hold-expiration sweep now.
    pub async fn expire_holds(&self) -> Result<ExpirySummary> {
        self.ensure_running()?;
        self.scheduler.sweep_holds().await
    }

    // --- Journal ---

    pub async fn post_journal(
        &self,
        lines: Vec<PostingLine>,
        reason: &str,
        created_by: Option<String>,
    ) -> Result<PostedJournal> {
        self.ensure_running()?;
        let result = self.journal.post(lines, reason, created_by).await;
        self.metrics.record(OperationKind::JournalPost, &result);
        result
    }

    pub async fn reverse_journal(
        &self,
        transaction_id: TransactionId,
        reason: &str,
        created_by: Option<String>,
    ) -> Result<PostedJournal> {
        self.ensure_running()?;
        let result = self.journal.reverse(transaction_id, reason, created_by).await;
        self.metrics.record(OperationKind::JournalReverse, &result);
        result
    }

    pub async fn journal_entry(&self, id: JournalEntryId) -> Result<JournalEntry> {
        self.ensure_running()?;
        self.journal.journal_entry(id).await
    }

    pub async fn search_journal(&self, filter: &JournalFilter) -> Result<Vec<JournalEntry>> {
        self.ensure_running()?;
        self.journal.search(filter).await
    }

    // --- Reconciliation ---

    /// Reconcile one local calendar day.
    pub async fn run_reconciliation(&self, date: NaiveDate) -> Result<ReconciliationReport> {
        self.ensure_running()?;
        self.scheduler.reconcile(date).await
    }

    pub async fn latest_report(&self) -> Result<Option<ReconciliationReport>> {
        self.ensure_running()?;
        self.reconciliation.latest_report().await
    }

    pub async fn report(&self, id: ReportId) -> Result<ReconciliationReport> {
        self.ensure_running()?;
        self.reconciliation.report(id).await
    }

    pub async fn discrepancies(
        &self,
        report_id: ReportId,
        severity: Option<Severity>,
    ) -> Result<Vec<ReconciliationDiscrepancy>> {
        self.ensure_running()?;
        self.reconciliation.discrepancies(report_id, severity).await
    }

    pub async fn discrepancy(&self, id: DiscrepancyId) -> Result<ReconciliationDiscrepancy> {
        self.ensure_running()?;
        self.reconciliation.discrepancy(id).await
    }

    /// Lift the block, shadow balance and limits of an account.
    pub async fn unblock_account(
        &self,
        account_number: &str,
        justification: &str,
        actor: Option<String>,
    ) -> Result<AccountView> {
        self.ensure_running()?;
        let account = self.store.account_by_number(account_number).await?;
        self.reconciliation
            .response()
            .unblock_account(account.id, justification, actor)
            .await?;
        self.view(account_number).await
    }

    /// Put an account under a restricted tier.
    pub async fn restrict_account(
        &self,
        account_number: &str,
        tier: AccountTier,
        reason: &str,
        expires_at: Option<Timestamp>,
        actor: Option<String>,
    ) -> Result<AccountLimits> {
        self.ensure_running()?;
        let account = self.store.account_by_number(account_number).await?;
        self.reconciliation
            .response()
            .restrict_account(account.id, tier, reason, expires_at, actor)
            .await
    }

    // --- Private methods ---

    fn ensure_running(&self) -> Result<()> {
        let state = self.state();
        if state.accepts_requests() {
            Ok(())
        } else {
            Err(LedgerError::ServiceUnavailable(format!(
                "service is {}",
                state.as_str()
            )))
        }
    }

    async fn ensure_pool_account(&self) -> Result<()> {
        let pool = &self.config.reconciliation.pool;
        match self.store.account_by_number(&pool.account_number).await {
            Ok(_) => Ok(()),
            Err(LedgerError::AccountNotFound(_)) => {
                self.store
                    .open_account(&pool.account_number, pool.opening_balance)
                    .await?;
                info!(
                    account = %pool.account_number,
                    balance = %pool.opening_balance,
                    "Reconciliation pool account opened"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn view(&self, account_number: &str) -> Result<AccountView> {
        let account = self.store.account_by_number(account_number).await?;
        let holds: Vec<AccountHold> = self
            .store
            .holds_for_account(account.id)
            .await?
            .into_iter()
            .filter(|h| h.status == HoldStatus::Active)
            .collect();
        let held = holds.iter().map(|h| h.amount).sum();
        let limits = self.store.limits(account.id).await?;
        Ok(AccountView {
            balance: AccountBalance::of(&account, held),
            limits,
            holds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_config() -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.node_id = Some("test-node-1".to_string());
        config.scheduler.eod_enabled = false;
        config.scheduler.hold_sweep_enabled = false;
        config
    }

    #[tokio::test]
    async fn test_coordinator_creation() {
        let coordinator = Coordinator::new(create_test_config());

        assert_eq!(coordinator.state(), CoordinatorState::Starting);
        assert_eq!(coordinator.node_id(), "test-node-1");
        assert!(!coordinator.is_accepting_requests());
    }

    #[tokio::test]
    async fn test_coordinator_start_stop() {
        let coordinator = Coordinator::new(create_test_config());

        coordinator.start().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Running);
        let pool = coordinator.account("RECONCILIATION-POOL").await.unwrap();
        assert_eq!(pool.balance.balance, dec!(100000.00));

        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        coordinator.stop().await.unwrap();
        assert!(coordinator.start().await.is_err());
    }

    #[tokio::test]
    async fn test_requests_rejected_unless_running() {
        let coordinator = Coordinator::new(create_test_config());
        let err = coordinator.deposit("A", dec!(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::ServiceUnavailable(_)));
        assert_eq!(err.error_code(), "service_unavailable");

        coordinator.start().await.unwrap();
        coordinator.open_account("A", dec!(10)).await.unwrap();
        coordinator.stop().await.unwrap();
        assert!(matches!(
            coordinator.withdraw("A", dec!(1)).await,
            Err(LedgerError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_account_view_and_metrics() {
        let coordinator = Coordinator::new(create_test_config());
        coordinator.start().await.unwrap();
        coordinator.open_account("A", dec!(1000)).await.unwrap();
        coordinator.open_account("B", dec!(0)).await.unwrap();

        coordinator.authorize("A", "B", dec!(400), None).await.unwrap();
        assert!(coordinator.withdraw("A", dec!(700)).await.is_err());

        let view = coordinator.account("A").await.unwrap();
        assert_eq!(view.balance.balance, dec!(1000));
        assert_eq!(view.balance.available_balance, dec!(600));
        assert_eq!(view.balance.customer_available_balance, dec!(600));
        assert_eq!(view.holds.len(), 1);
        assert!(view.balance.is_consistent());
        assert!(view.limits.is_none());

        let metrics = coordinator.metrics();
        assert_eq!(metrics.operation(OperationKind::Authorize).unwrap().succeeded, 1);
        assert_eq!(metrics.operation(OperationKind::Withdrawal).unwrap().failed, 1);
        coordinator.stop().await.unwrap();
    }
}
