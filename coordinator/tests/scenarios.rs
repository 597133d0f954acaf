//! End-to-end flows through the `Coordinator`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{drift, started, test_config};
use corebank_common::{today_in, LedgerError, TransactionStatus, DEFAULT_LEDGER_TIMEZONE};
use corebank_coordinator::{Coordinator, OperationKind};
use corebank_ledger::{
    actions, AccountTier, DiscrepancyType, EntityType, EntryType, HoldStatus, JournalFilter,
    LedgerStore, PostingLine, Severity,
};
use rust_decimal_macros::dec;

async fn entries_for(coordinator: &Coordinator, account: &str) -> Vec<corebank_ledger::JournalEntry> {
    coordinator
        .search_journal(&JournalFilter {
            account_number: Some(account.to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_authorize_capture_settle_balances() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("A", dec!(1000)).await.unwrap();
    c.open_account("B", dec!(250)).await.unwrap();

    // Authorize: funds earmarked, nothing moved.
    let auth = c.authorize("A", "B", dec!(500), None).await.unwrap();
    let code = auth.auth_code().unwrap().clone();
    assert_eq!(auth.transaction.status, TransactionStatus::Authorized);
    let a = c.account("A").await.unwrap();
    assert_eq!(a.balance.balance, dec!(1000));
    assert_eq!(a.balance.available_balance, dec!(500));
    assert_eq!(a.holds.len(), 1);
    assert_eq!(a.holds[0].status, HoldStatus::Active);
    assert_eq!(a.holds[0].amount, dec!(500));

    // Capture: source debited, hold consumed.
    let captured = c.capture(&code).await.unwrap();
    assert_eq!(captured.transaction.status, TransactionStatus::Captured);
    let a = c.account("A").await.unwrap();
    assert_eq!(a.balance.balance, dec!(500));
    assert_eq!(a.balance.available_balance, dec!(500));
    assert!(a.holds.is_empty());
    let a_entries = entries_for(c, "A").await;
    assert_eq!(a_entries.len(), 1);
    assert_eq!(a_entries[0].entry_type, EntryType::Debit);
    assert_eq!(a_entries[0].amount, dec!(500));

    // Settle: destination credited.
    let settled = c.settle(&code).await.unwrap();
    assert_eq!(settled.transaction.status, TransactionStatus::Settled);
    let b = c.account("B").await.unwrap();
    assert_eq!(b.balance.balance, dec!(750));
    assert_eq!(b.balance.available_balance, dec!(750));
    let b_entries = entries_for(c, "B").await;
    assert_eq!(b_entries.len(), 1);
    assert_eq!(b_entries[0].entry_type, EntryType::Credit);
    assert_eq!(b_entries[0].amount, dec!(500));

    let metrics = c.metrics();
    for kind in [OperationKind::Authorize, OperationKind::Capture, OperationKind::Settle] {
        assert_eq!(metrics.operation(kind).unwrap().succeeded, 1);
    }
    c.stop().await.unwrap();
}

#[tokio::test]
async fn test_state_machine_legality() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("A", dec!(1000)).await.unwrap();
    c.open_account("B", dec!(0)).await.unwrap();

    let code = c
        .authorize("A", "B", dec!(100), None)
        .await
        .unwrap()
        .auth_code()
        .unwrap()
        .clone();
    assert!(matches!(
        c.settle(&code).await,
        Err(LedgerError::InvalidTransactionStatus { .. })
    ));
    c.capture(&code).await.unwrap();
    assert_eq!(
        c.capture(&code).await.unwrap_err(),
        LedgerError::TransferAlreadyCaptured(code.clone())
    );

    let cancelled = c
        .authorize("A", "B", dec!(100), None)
        .await
        .unwrap()
        .auth_code()
        .unwrap()
        .clone();
    c.cancel(&cancelled).await.unwrap();
    assert_eq!(
        c.capture(&cancelled).await.unwrap_err(),
        LedgerError::AuthorizationNotFound(cancelled)
    );

    let metrics = c.metrics();
    assert_eq!(metrics.operation(OperationKind::Capture).unwrap().failed, 2);
    assert_eq!(metrics.operation(OperationKind::Settle).unwrap().failed, 1);
}

#[tokio::test]
async fn test_unbalanced_manual_entry_posts_nothing() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("ACC-1", dec!(500)).await.unwrap();
    c.open_account("ACC-2", dec!(500)).await.unwrap();

    let err = c
        .post_journal(
            vec![
                PostingLine::debit("ACC-1", dec!(100)),
                PostingLine::credit("ACC-2", dec!(60)),
            ],
            "fix",
            Some("ops".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnbalancedJournalEntry { .. }));
    assert!(c
        .search_journal(&JournalFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(c.account("ACC-1").await.unwrap().balance.balance, dec!(500));
}

#[tokio::test]
async fn test_manual_entry_and_reversal() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("ACC-1", dec!(500)).await.unwrap();
    c.open_account("ACC-2", dec!(500)).await.unwrap();

    let posted = c
        .post_journal(
            vec![
                PostingLine::debit("ACC-1", dec!(100)),
                PostingLine::credit("ACC-2", dec!(100)),
            ],
            "fee transfer",
            Some("ops".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(posted.entries.len(), 2);
    assert_eq!(c.account("ACC-1").await.unwrap().balance.balance, dec!(400));
    assert_eq!(c.account("ACC-2").await.unwrap().balance.balance, dec!(600));
    let first = c.journal_entry(posted.entries[0].id).await.unwrap();
    assert_eq!(first.transaction_id, posted.transaction.id);

    c.reverse_journal(posted.transaction.id, "posted in error", None)
        .await
        .unwrap();
    assert_eq!(c.account("ACC-1").await.unwrap().balance.balance, dec!(500));
    assert_eq!(c.account("ACC-2").await.unwrap().balance.balance, dec!(500));
    assert!(matches!(
        c.reverse_journal(posted.transaction.id, "again", None).await,
        Err(LedgerError::TransactionAlreadyReversed(_))
    ));

    assert_eq!(
        h.audit
            .with_action(actions::MANUAL_JOURNAL_ENTRY_CREATED)
            .len(),
        1
    );
    assert_eq!(
        h.audit
            .with_action(actions::MANUAL_JOURNAL_ENTRY_REVERSAL)
            .len(),
        1
    );
}

#[tokio::test]
async fn test_low_drift_moves_difference_to_pool() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("X", dec!(1000.00)).await.unwrap();
    drift(&h.store, "X", dec!(5.00)).await;

    let report = c
        .run_reconciliation(today_in(DEFAULT_LEDGER_TIMEZONE))
        .await
        .unwrap();
    assert_eq!(report.total_discrepancies, 1);

    let found = c.discrepancies(report.id, None).await.unwrap();
    assert_eq!(found.len(), 1);
    let d = &found[0];
    assert_eq!(d.discrepancy_type, DiscrepancyType::AccountBalanceMismatch);
    assert_eq!(d.entity_type, EntityType::BankAccount);
    assert_eq!(d.severity, Severity::Low);
    assert_eq!(d.difference, Some(dec!(5.00)));
    assert!(d.auto_corrected);
    assert_eq!(c.discrepancy(d.id).await.unwrap(), *d);

    assert_eq!(c.account("X").await.unwrap().balance.balance, dec!(1000.00));
    let pool = c.account("RECONCILIATION-POOL").await.unwrap();
    assert_eq!(pool.balance.balance, dec!(100005.00));
    assert_eq!(
        h.audit.with_action(actions::DISCREPANCY_AUTO_CORRECTED).len(),
        1
    );
    assert_eq!(c.latest_report().await.unwrap().unwrap().id, report.id);

    // The correction leaves nothing for the next run.
    let again = c
        .run_reconciliation(today_in(DEFAULT_LEDGER_TIMEZONE))
        .await
        .unwrap();
    assert_eq!(again.total_discrepancies, 0);
}

#[tokio::test]
async fn test_critical_drift_blocks_until_unblocked() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("X", dec!(1000)).await.unwrap();
    drift(&h.store, "X", dec!(2000)).await;

    let report = c
        .run_reconciliation(today_in(DEFAULT_LEDGER_TIMEZONE))
        .await
        .unwrap();
    let critical = c
        .discrepancies(report.id, Some(Severity::Critical))
        .await
        .unwrap();
    assert_eq!(critical.len(), 1);
    assert!(c.account("X").await.unwrap().balance.reconciliation_blocked);

    let err = c.withdraw("X", dec!(10)).await.unwrap_err();
    assert_eq!(err, LedgerError::AccountReconciliationBlocked("X".to_string()));
    assert_eq!(err.error_code(), "account_reconciliation_blocked");
    // Credits still land.
    c.deposit("X", dec!(10)).await.unwrap();

    let view = c
        .unblock_account("X", "reviewed with finance", Some("ops".to_string()))
        .await
        .unwrap();
    assert!(!view.balance.reconciliation_blocked);
    assert_eq!(view.balance.reconciled_balance, Some(dec!(3010)));

    let receipt = c.withdraw("X", dec!(10)).await.unwrap();
    assert_eq!(receipt.balance, dec!(3000));
    assert_eq!(h.audit.with_action(actions::ACCOUNT_UNBLOCKED).len(), 1);
}

#[tokio::test]
async fn test_medium_drift_applies_soft_limits_and_shadow_balance() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("X", dec!(10000)).await.unwrap();
    drift(&h.store, "X", dec!(50)).await;

    c.run_reconciliation(today_in(DEFAULT_LEDGER_TIMEZONE))
        .await
        .unwrap();
    let view = c.account("X").await.unwrap();
    assert_eq!(view.limits.as_ref().unwrap().tier, AccountTier::Tier3Limited);
    assert_eq!(view.balance.pending_correction, Some(dec!(-50)));
    assert_eq!(view.balance.customer_available_balance, dec!(10000));

    assert!(matches!(
        c.withdraw("X", dec!(2500)).await,
        Err(LedgerError::TransactionLimitExceeded { .. })
    ));
    c.withdraw("X", dec!(1000)).await.unwrap();
}

#[tokio::test]
async fn test_manual_restriction() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("X", dec!(10000)).await.unwrap();

    let limits = c
        .restrict_account("X", AccountTier::Tier4Minimal, "suspicious activity", None, None)
        .await
        .unwrap();
    assert_eq!(limits.tier, AccountTier::Tier4Minimal);
    assert!(matches!(
        c.authorize("X", "RECONCILIATION-POOL", dec!(600), None).await,
        Err(LedgerError::TransactionLimitExceeded { .. })
    ));
    assert!(matches!(
        c.restrict_account("X", AccountTier::Tier5Blocked, "no", None, None)
            .await,
        Err(LedgerError::InvalidTransaction(_))
    ));

    c.unblock_account("X", "cleared", None).await.unwrap();
    assert!(c.account("X").await.unwrap().limits.is_none());
}

#[tokio::test]
async fn test_reconciliation_is_deterministic() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("A", dec!(1000)).await.unwrap();
    // A deposit is single-entry, so the day does not balance system-wide.
    c.deposit("A", dec!(100)).await.unwrap();
    let today = today_in(DEFAULT_LEDGER_TIMEZONE);

    let first = c.run_reconciliation(today).await.unwrap();
    let second = c.run_reconciliation(today).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(first.total_discrepancies, second.total_discrepancies);
    assert_eq!(first.total_debits, second.total_debits);
    assert_eq!(first.total_credits, second.total_credits);
    assert!(!first.system_balanced);

    let fingerprints = |found: &[corebank_ledger::ReconciliationDiscrepancy]| {
        found
            .iter()
            .map(|d| {
                let (kind, entity, id, expected, actual, severity) = d.fingerprint();
                (kind, entity, id, expected.to_string(), actual.to_string(), severity)
            })
            .collect::<Vec<_>>()
    };
    let a = c.discrepancies(first.id, None).await.unwrap();
    let b = c.discrepancies(second.id, None).await.unwrap();
    assert_eq!(fingerprints(&a), fingerprints(&b));
    assert_eq!(a[0].discrepancy_type, DiscrepancyType::UnbalancedEntries);
    assert_eq!(c.metrics().reconciliation_runs, 2);
}

#[tokio::test]
async fn test_negative_balance_guard_leaves_state_unchanged() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("A", dec!(100)).await.unwrap();
    c.open_account("B", dec!(0)).await.unwrap();

    assert!(matches!(
        c.withdraw("A", dec!(100.01)).await,
        Err(LedgerError::BalanceInsufficient { .. })
    ));
    assert!(matches!(
        c.post_journal(
            vec![
                PostingLine::debit("A", dec!(150)),
                PostingLine::credit("B", dec!(150)),
            ],
            "overdraw",
            None,
        )
        .await,
        Err(LedgerError::NegativeBalanceNotAllowed { .. })
    ));
    assert!(matches!(
        c.authorize("A", "B", dec!(101), None).await,
        Err(LedgerError::InsufficientAvailableBalance { .. })
    ));

    let a = c.account("A").await.unwrap();
    assert_eq!(a.balance.balance, dec!(100));
    assert_eq!(a.balance.available_balance, dec!(100));
    assert_eq!(c.account("B").await.unwrap().balance.balance, dec!(0));
    assert!(c
        .search_journal(&JournalFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_lock_conflicts_are_retried_then_exhausted() {
    let mut config = test_config();
    config.transaction.lock_wait_timeout = Duration::from_millis(20);
    config.transaction.retry_max_attempts = 3;
    let h = started(config).await;
    let c = &h.coordinator;
    let a = c.open_account("A", dec!(100)).await.unwrap();

    // Another unit of work holds the row for the whole retry budget.
    let mut holder = h.store.begin().await.unwrap();
    holder.lock_account(a.balance.account_id).await.unwrap();

    let err = c.withdraw("A", dec!(10)).await.unwrap_err();
    assert!(matches!(err, LedgerError::RetryExhausted { attempts: 3, .. }));
    assert_eq!(c.metrics().lock_conflicts, 3);
    drop(holder);

    assert_eq!(c.withdraw("A", dec!(10)).await.unwrap().balance, dec!(90));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_serialize() {
    let h = started(test_config()).await;
    h.coordinator.open_account("HOT", dec!(1000)).await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.withdraw("HOT", dec!(10)).await })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }

    let hot = h.coordinator.account("HOT").await.unwrap();
    assert_eq!(hot.balance.balance, dec!(800));
    assert!(hot.balance.is_consistent());
    assert_eq!(entries_for(&h.coordinator, "HOT").await.len(), 20);
}

#[tokio::test]
async fn test_hold_expiry_through_facade() {
    let h = started(test_config()).await;
    let c = &h.coordinator;
    c.open_account("A", dec!(1000)).await.unwrap();
    c.open_account("B", dec!(0)).await.unwrap();
    let auth = c.authorize("A", "B", dec!(400), None).await.unwrap();

    let mut lapsed = h.store.transaction(auth.transaction.id).await.unwrap();
    lapsed.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
    let mut tx = h.store.begin().await.unwrap();
    tx.lock_transaction(lapsed.id).await.unwrap();
    tx.save_transaction(&lapsed).await.unwrap();
    let mut hold = tx
        .active_hold_for_transaction(lapsed.id)
        .await
        .unwrap()
        .unwrap();
    hold.expires_at = lapsed.expires_at.unwrap();
    tx.save_hold(&hold).await.unwrap();
    tx.commit().await.unwrap();

    let summary = c.expire_holds().await.unwrap();
    assert_eq!(summary.expired, 1);
    let a = c.account("A").await.unwrap();
    assert_eq!(a.balance.available_balance, dec!(1000));
    assert_eq!(
        h.store.transaction(lapsed.id).await.unwrap().status,
        TransactionStatus::Cancelled
    );
    assert_eq!(c.metrics().holds_expired, 1);
}

#[tokio::test]
async fn test_account_view_serializes_flat() {
    let h = started(test_config()).await;
    let view = h.coordinator.open_account("A", dec!(12.5)).await.unwrap();
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["account_number"], "A");
    assert!(json.get("balance").is_some());
    assert!(json["holds"].as_array().unwrap().is_empty());
}
