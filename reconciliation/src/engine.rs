//! End-of-day reconciliation.
//!
//! A run snapshots the ledger for one local day, checks it, persists every
//! finding against a new report and hands each to the [`ResponseEngine`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use corebank_common::{
    DayWindow, DiscrepancyId, LedgerError, ReportId, Result, TransactionStatus,
};
use corebank_ledger::{
    DiscrepancyType, EntityType, EntryTotals, LedgerSnapshot, LedgerStore,
    ReconciliationDiscrepancy, ReconciliationReport, Severity,
};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SeverityThresholds;
use crate::response::ResponseEngine;

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Detects drift between balances, holds and the journal.
pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    response: Arc<ResponseEngine>,
    running: AtomicBool,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn LedgerStore>, response: Arc<ResponseEngine>) -> Self {
        Self {
            store,
            response,
            running: AtomicBool::new(false),
        }
    }

    pub fn response(&self) -> &Arc<ResponseEngine> {
        &self.response
    }

    /// Check whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Reconcile one local calendar day.
    ///
    /// Fails `ReconciliationInProgress` while another run is in flight. Any
    /// other failure marks the report FAILED and is returned.
    #[instrument(skip(self))]
    pub async fn run(&self, date: NaiveDate) -> Result<ReconciliationReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(%date, "Reconciliation already in progress");
            return Err(LedgerError::ReconciliationInProgress);
        }
        let _guard = RunGuard(&self.running);

        info!(%date, "Starting reconciliation");
        let mut report = self
            .store
            .insert_report(ReconciliationReport::start(date))
            .await?;

        match self.reconcile(&mut report).await {
            Ok(found) => {
                report.complete(found);
                self.store.save_report(&report).await?;
                info!(
                    %date,
                    report_id = %report.id,
                    discrepancies = found,
                    system_balanced = report.system_balanced,
                    "Reconciliation completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(%date, report_id = %report.id, error = %e, "Reconciliation failed");
                report.fail(e.to_string());
                if let Err(save_err) = self.store.save_report(&report).await {
                    error!(report_id = %report.id, error = %save_err, "Failed to save failed report");
                }
                Err(e)
            }
        }
    }

    async fn reconcile(&self, report: &mut ReconciliationReport) -> Result<usize> {
        let config = self.response.config();
        let window = DayWindow::for_date(report.reconciliation_date, config.timezone);
        let snapshot = self.store.snapshot(&window).await?;
        debug!(
            start = %window.start,
            end = %window.end,
            accounts = snapshot.accounts.len(),
            entries = snapshot.entries.len(),
            "Snapshot taken"
        );

        let findings = run_checks(report, &snapshot, &config.severity_thresholds);

        let mut persisted = Vec::with_capacity(findings.len());
        for mut discrepancy in findings {
            discrepancy.report_id = report.id;
            persisted.push(self.store.insert_discrepancy(discrepancy).await?);
        }

        for discrepancy in persisted.iter_mut() {
            self.response.handle(discrepancy).await?;
        }

        Ok(persisted.len())
    }

    pub async fn latest_report(&self) -> Result<Option<ReconciliationReport>> {
        self.store.latest_report().await
    }

    pub async fn report(&self, id: ReportId) -> Result<ReconciliationReport> {
        self.store.report(id).await
    }

    /// Findings of a report, optionally only one severity.
    pub async fn discrepancies(
        &self,
        report_id: ReportId,
        severity: Option<Severity>,
    ) -> Result<Vec<ReconciliationDiscrepancy>> {
        let mut found = self.store.discrepancies_for_report(report_id).await?;
        if let Some(severity) = severity {
            found.retain(|d| d.severity == severity);
        }
        Ok(found)
    }

    pub async fn discrepancy(&self, id: DiscrepancyId) -> Result<ReconciliationDiscrepancy> {
        self.store.discrepancy(id).await
    }
}

/// Every check over one snapshot, in a fixed order.
///
/// Writes the day's totals and the balanced flag into `report`.
pub fn run_checks(
    report: &mut ReconciliationReport,
    snapshot: &LedgerSnapshot,
    thresholds: &SeverityThresholds,
) -> Vec<ReconciliationDiscrepancy> {
    let mut found = Vec::new();
    found.extend(check_double_entry(report, snapshot));
    found.extend(check_account_balances(snapshot, thresholds));
    found.extend(check_transaction_completeness(snapshot, thresholds));
    found.extend(check_available_balances(snapshot, thresholds));
    found.extend(check_orphaned_transactions(snapshot, thresholds));
    found
}

fn check_double_entry(
    report: &mut ReconciliationReport,
    snapshot: &LedgerSnapshot,
) -> Option<ReconciliationDiscrepancy> {
    let totals = EntryTotals::from_entries(&snapshot.entries);
    report.total_debits = totals.debits;
    report.total_credits = totals.credits;
    report.system_balanced = totals.is_balanced();

    if totals.is_balanced() {
        return None;
    }

    let difference = totals.debits - totals.credits;
    warn!(
        debits = %totals.debits,
        credits = %totals.credits,
        "System-wide unbalanced entries"
    );
    Some(
        ReconciliationDiscrepancy::new(
            DiscrepancyType::UnbalancedEntries,
            EntityType::System,
            0,
            totals.debits.to_string(),
            totals.credits.to_string(),
            Severity::Critical,
            format!(
                "System-wide unbalanced entries. Total debits ({}) != Total credits ({}). Difference: {}",
                totals.debits,
                totals.credits,
                difference.abs()
            ),
        )
        .with_difference(difference),
    )
}

/// Compare each balance with its reconciled snapshot plus what has been
/// posted since. Without a snapshot the live balance plus the day's net is
/// used instead.
fn check_account_balances(
    snapshot: &LedgerSnapshot,
    thresholds: &SeverityThresholds,
) -> Vec<ReconciliationDiscrepancy> {
    let by_account = snapshot.entries_by_account();
    let mut found = Vec::new();

    for account in &snapshot.accounts {
        let expected = match (account.reconciled_balance, account.last_reconciled_at) {
            (Some(reconciled), Some(_)) => {
                reconciled + snapshot.posted_since_reconciled(account.id)
            }
            (baseline, _) => {
                let day = by_account
                    .get(&account.id)
                    .map(|entries| EntryTotals::from_entries(entries.iter().copied()).net())
                    .unwrap_or(Decimal::ZERO);
                baseline.unwrap_or(account.balance) + day
            }
        };
        let actual = account.balance;
        if expected == actual {
            continue;
        }

        let difference = actual - expected;
        warn!(
            account = %account.account_number,
            expected = %expected,
            actual = %actual,
            difference = %difference,
            "Account balance mismatch"
        );
        found.push(
            ReconciliationDiscrepancy::new(
                DiscrepancyType::AccountBalanceMismatch,
                EntityType::BankAccount,
                account.id.value(),
                expected.to_string(),
                actual.to_string(),
                thresholds.classify(difference),
                format!(
                    "Account {} balance mismatch. Calculated from journal entries: {}, Actual balance: {}, Difference: {}",
                    account.account_number, expected, actual, difference
                ),
            )
            .with_difference(difference),
        );
    }
    found
}

fn check_transaction_completeness(
    snapshot: &LedgerSnapshot,
    thresholds: &SeverityThresholds,
) -> Vec<ReconciliationDiscrepancy> {
    snapshot
        .transactions
        .iter()
        .filter(|t| {
            matches!(
                t.status,
                TransactionStatus::Completed | TransactionStatus::Settled
            )
        })
        .filter(|t| snapshot.entry_count(t.id) == 0)
        .map(|t| {
            warn!(transaction_id = %t.id, "Transaction has no journal entries");
            ReconciliationDiscrepancy::new(
                DiscrepancyType::MissingJournalEntries,
                EntityType::Transaction,
                t.id.value(),
                "1 or more",
                "0",
                thresholds.classify(t.amount),
                format!(
                    "Transaction {} ({:?}) has no journal entries. Amount: {}",
                    t.id, t.status, t.amount
                ),
            )
            .with_difference(t.amount)
        })
        .collect()
}

fn check_available_balances(
    snapshot: &LedgerSnapshot,
    thresholds: &SeverityThresholds,
) -> Vec<ReconciliationDiscrepancy> {
    let mut found = Vec::new();
    for account in &snapshot.accounts {
        let recomputed = account.balance - snapshot.hold_total(account.id);
        match account.available_balance {
            None => found.push(ReconciliationDiscrepancy::new(
                DiscrepancyType::AvailableBalanceMismatch,
                EntityType::BankAccount,
                account.id.value(),
                account.balance.to_string(),
                "NULL",
                Severity::Low,
                format!("Account {} has null available balance", account.account_number),
            )),
            Some(available) if available != recomputed => {
                let difference = available - recomputed;
                found.push(
                    ReconciliationDiscrepancy::new(
                        DiscrepancyType::AvailableBalanceMismatch,
                        EntityType::BankAccount,
                        account.id.value(),
                        recomputed.to_string(),
                        available.to_string(),
                        thresholds.classify(difference),
                        format!(
                            "Account {} available balance {} does not match balance minus active holds {}",
                            account.account_number, available, recomputed
                        ),
                    )
                    .with_difference(difference),
                );
            }
            Some(_) => {}
        }
    }
    found
}

fn check_orphaned_transactions(
    snapshot: &LedgerSnapshot,
    thresholds: &SeverityThresholds,
) -> Vec<ReconciliationDiscrepancy> {
    snapshot
        .transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Authorized)
        .filter(|t| !snapshot.active_hold_transactions.contains(&t.id))
        .map(|t| {
            warn!(transaction_id = %t.id, "Authorized transaction without an active hold");
            ReconciliationDiscrepancy::new(
                DiscrepancyType::OrphanedTransaction,
                EntityType::Transaction,
                t.id.value(),
                "ACTIVE hold",
                "none",
                thresholds.classify(t.amount),
                format!(
                    "Authorized transaction {} has no active hold. Amount: {}",
                    t.id, t.amount
                ),
            )
            .with_difference(t.amount)
        })
        .collect()
}
