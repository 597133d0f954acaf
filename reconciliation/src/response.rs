//! Severity-graded remediation of reconciliation findings.
//!
//! LOW findings are corrected through the pool account, MEDIUM and HIGH put
//! the account under soft limits with a shadow balance, CRITICAL hard-blocks
//! it. System and transaction findings are left for manual review.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use corebank_common::{AccountId, LedgerError, Result, Timestamp};
use corebank_ledger::{
    actions, Account, AccountLimits, AccountTier, AuditLog, AuditRecord, DiscrepancyType,
    EntityType, EventPublisher, LedgerEvent, ReconciliationDiscrepancy, Severity,
    TransactionRunner,
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::config::ReconciliationConfig;

/// What was done about one finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Balance moved to or from the pool.
    AutoCorrected,
    /// Available balance recomputed from active holds.
    AvailableRecomputed,
    /// Pending correction recorded, account keeps operating.
    ShadowBalance,
    /// Soft limits of the tier applied.
    SoftLimits(AccountTier),
    /// Debits rejected until manual review.
    HardBlocked,
    /// Nothing automatic, flagged for an operator.
    ManualReview,
}

/// Applies the remediation policy.
pub struct ResponseEngine {
    runner: TransactionRunner,
    audit: Arc<dyn AuditLog>,
    events: EventPublisher,
    config: ReconciliationConfig,
}

impl ResponseEngine {
    pub fn new(
        runner: TransactionRunner,
        audit: Arc<dyn AuditLog>,
        events: EventPublisher,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            runner,
            audit,
            events,
            config,
        }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Audit a persisted finding and route it by scope and severity.
    ///
    /// `auto_corrected` is updated and saved when a correction lands.
    #[instrument(
        skip(self, discrepancy),
        fields(
            id = %discrepancy.id,
            kind = ?discrepancy.discrepancy_type,
            severity = ?discrepancy.severity
        )
    )]
    pub async fn handle(&self, discrepancy: &mut ReconciliationDiscrepancy) -> Result<ResponseAction> {
        self.audit_discrepancy(actions::DISCREPANCY_DETECTED, discrepancy)
            .await;

        match discrepancy.entity_type {
            EntityType::System => {
                if discrepancy.severity == Severity::Critical {
                    error!(
                        description = %discrepancy.description,
                        "System-wide discrepancy, manual intervention required"
                    );
                    self.audit_discrepancy(actions::SYSTEM_WIDE_DISCREPANCY, discrepancy)
                        .await;
                }
                Ok(ResponseAction::ManualReview)
            }
            EntityType::Transaction => {
                warn!(
                    transaction_id = discrepancy.entity_id,
                    description = %discrepancy.description,
                    "Transaction discrepancy flagged for manual review"
                );
                Ok(ResponseAction::ManualReview)
            }
            EntityType::BankAccount => self.handle_account(discrepancy).await,
        }
    }

    async fn handle_account(
        &self,
        discrepancy: &mut ReconciliationDiscrepancy,
    ) -> Result<ResponseAction> {
        let account_id = AccountId::new(discrepancy.entity_id);

        if discrepancy.discrepancy_type == DiscrepancyType::AvailableBalanceMismatch {
            self.recompute_available(account_id).await?;
            return match discrepancy.severity {
                Severity::Low => {
                    self.mark_corrected(discrepancy).await?;
                    Ok(ResponseAction::AvailableRecomputed)
                }
                Severity::Medium => self.soft_limits(discrepancy, AccountTier::Tier3Limited, None).await,
                Severity::High => self.soft_limits(discrepancy, AccountTier::Tier4Minimal, None).await,
                Severity::Critical => self.hard_block(discrepancy).await,
            };
        }

        let (expected, actual) = parse_values(discrepancy)?;
        match discrepancy.severity {
            Severity::Low => self.handle_low(discrepancy, expected, actual).await,
            Severity::Medium => {
                self.soft_limits(discrepancy, AccountTier::Tier3Limited, Some((expected, actual)))
                    .await
            }
            Severity::High => {
                self.soft_limits(discrepancy, AccountTier::Tier4Minimal, Some((expected, actual)))
                    .await
            }
            Severity::Critical => self.hard_block(discrepancy).await,
        }
    }

    async fn handle_low(
        &self,
        discrepancy: &mut ReconciliationDiscrepancy,
        expected: Decimal,
        actual: Decimal,
    ) -> Result<ResponseAction> {
        let account_id = AccountId::new(discrepancy.entity_id);

        if !self.config.auto_correct_enabled {
            info!(account_id = %account_id, "Auto-correction disabled, tracking shadow balance");
            self.enable_shadow_balance(account_id, expected, actual).await?;
            return Ok(ResponseAction::ShadowBalance);
        }

        match self.auto_correct(account_id, expected, actual).await {
            Ok(()) => {
                self.mark_corrected(discrepancy).await?;
                Ok(ResponseAction::AutoCorrected)
            }
            Err(e) => {
                warn!(
                    account_id = %account_id,
                    error = %e,
                    "Auto-correction failed, falling back to shadow balance"
                );
                self.enable_shadow_balance(account_id, expected, actual).await?;
                Ok(ResponseAction::ShadowBalance)
            }
        }
    }

    /// Move `expected - actual` between the account and the pool.
    async fn auto_correct(
        &self,
        account_id: AccountId,
        expected: Decimal,
        actual: Decimal,
    ) -> Result<()> {
        let pool_number = self.config.pool.account_number.as_str();
        let pool_id = self.runner.store().account_by_number(pool_number).await?.id;
        if pool_id == account_id {
            return Err(LedgerError::Internal(
                "pool account cannot be corrected against itself".to_string(),
            ));
        }
        let difference = expected - actual;

        let pool = self
            .runner
            .run("reconciliation_auto_correct", |mut tx| async move {
                let (first, second) = if account_id < pool_id {
                    (account_id, pool_id)
                } else {
                    (pool_id, account_id)
                };
                let a = tx.lock_account(first).await?;
                let b = tx.lock_account(second).await?;
                let (mut account, mut pool) = if a.id == account_id { (a, b) } else { (b, a) };

                if difference > Decimal::ZERO {
                    if pool.balance < difference {
                        error!(
                            pool_balance = %pool.balance,
                            required = %difference,
                            "Reconciliation pool has insufficient funds"
                        );
                        return Err(LedgerError::ReconciliationPoolInsufficientFunds {
                            required: difference,
                            available: pool.balance,
                        });
                    }
                    pool.debit(difference)?;
                    account.credit(difference)?;
                } else {
                    let excess = -difference;
                    account.debit(excess)?;
                    pool.credit(excess)?;
                }
                // The pool moved without a posting, so its snapshot moves with it.
                pool.reconciled_balance = pool.reconciled_balance.map(|r| r - difference);

                let held = tx.active_hold_total(account.id).await?;
                account.refresh_available(held);
                let held = tx.active_hold_total(pool.id).await?;
                pool.refresh_available(held);

                tx.save_account(&account).await?;
                tx.save_account(&pool).await?;
                tx.commit().await?;
                Ok(pool)
            })
            .await?;

        info!(
            account_id = %account_id,
            difference = %difference,
            pool_balance = %pool.balance,
            "Auto-correction applied"
        );

        if pool.balance < self.config.pool.low_balance_threshold {
            warn!(
                pool = %pool.account_number,
                balance = %pool.balance,
                threshold = %self.config.pool.low_balance_threshold,
                "Reconciliation pool below threshold"
            );
            self.events.publish(LedgerEvent::PoolLowBalance {
                account_number: pool.account_number.clone(),
                balance: pool.balance,
                threshold: self.config.pool.low_balance_threshold,
            });
        }
        Ok(())
    }

    async fn enable_shadow_balance(
        &self,
        account_id: AccountId,
        expected: Decimal,
        actual: Decimal,
    ) -> Result<Account> {
        let account = self
            .runner
            .run("reconciliation_shadow_balance", |mut tx| async move {
                let mut account = tx.lock_account(account_id).await?;
                account.enable_shadow_balance(expected, actual);
                tx.save_account(&account).await?;
                tx.commit().await?;
                Ok(account)
            })
            .await?;
        info!(
            account = %account.account_number,
            pending_correction = ?account.pending_correction,
            "Shadow balance enabled"
        );
        Ok(account)
    }

    async fn soft_limits(
        &self,
        discrepancy: &ReconciliationDiscrepancy,
        tier: AccountTier,
        shadow: Option<(Decimal, Decimal)>,
    ) -> Result<ResponseAction> {
        let account_id = AccountId::new(discrepancy.entity_id);
        let reason = format!(
            "Reconciliation discrepancy: {}",
            discrepancy.discrepancy_type.as_str()
        );
        self.apply_limits(account_id, tier, &reason, None, shadow)
            .await?;
        self.audit_discrepancy(actions::SOFT_LIMITS_APPLIED, discrepancy)
            .await;
        Ok(ResponseAction::SoftLimits(tier))
    }

    async fn apply_limits(
        &self,
        account_id: AccountId,
        tier: AccountTier,
        reason: &str,
        expires_at: Option<Timestamp>,
        shadow: Option<(Decimal, Decimal)>,
    ) -> Result<AccountLimits> {
        let caps = self.config.tier_limits.caps_for(tier).ok_or_else(|| {
            LedgerError::InvalidTransaction(format!("tier {tier:?} has no configured limits"))
        })?;

        let limits = self
            .runner
            .run("reconciliation_soft_limits", |mut tx| async move {
                let mut account = tx.lock_account(account_id).await?;
                let limits = tx
                    .save_limits(AccountLimits::new(account_id, tier, caps, reason, expires_at))
                    .await?;
                if let Some((expected, actual)) = shadow {
                    account.enable_shadow_balance(expected, actual);
                    tx.save_account(&account).await?;
                }
                tx.commit().await?;
                Ok(limits)
            })
            .await?;

        info!(account_id = %account_id, tier = ?tier, "Soft limits applied");
        Ok(limits)
    }

    async fn hard_block(&self, discrepancy: &ReconciliationDiscrepancy) -> Result<ResponseAction> {
        let account_id = AccountId::new(discrepancy.entity_id);
        let account = self
            .runner
            .run("reconciliation_hard_block", |mut tx| async move {
                let mut account = tx.lock_account(account_id).await?;
                account.reconciliation_blocked = true;
                account.updated_at = Utc::now();
                tx.save_account(&account).await?;
                tx.commit().await?;
                Ok(account)
            })
            .await?;

        warn!(account = %account.account_number, "Account hard blocked");
        self.audit_discrepancy(actions::ACCOUNT_HARD_BLOCKED, discrepancy)
            .await;
        Ok(ResponseAction::HardBlocked)
    }

    async fn recompute_available(&self, account_id: AccountId) -> Result<Account> {
        self.runner
            .run("reconciliation_recompute_available", |mut tx| async move {
                let mut account = tx.lock_account(account_id).await?;
                let held = tx.active_hold_total(account_id).await?;
                account.refresh_available(held);
                tx.save_account(&account).await?;
                tx.commit().await?;
                Ok(account)
            })
            .await
    }

    async fn mark_corrected(&self, discrepancy: &mut ReconciliationDiscrepancy) -> Result<()> {
        discrepancy.auto_corrected = true;
        self.runner.store().save_discrepancy(discrepancy).await?;
        self.audit_discrepancy(actions::DISCREPANCY_AUTO_CORRECTED, discrepancy)
            .await;
        Ok(())
    }

    /// Lift every reconciliation control from an account.
    ///
    /// Clears the block and any pending correction, takes the current balance
    /// as reconciled and removes soft limits. Safe to repeat.
    #[instrument(skip(self, justification, actor))]
    pub async fn unblock_account(
        &self,
        account_id: AccountId,
        justification: &str,
        actor: Option<String>,
    ) -> Result<Account> {
        let account = self
            .runner
            .run("reconciliation_unblock", |mut tx| async move {
                let mut account = tx.lock_account(account_id).await?;
                account.clear_reconciliation_state();
                tx.delete_limits(account_id).await?;
                tx.save_account(&account).await?;
                tx.commit().await?;
                Ok(account)
            })
            .await?;

        info!(account = %account.account_number, "Account unblocked");
        self.audit
            .record(
                AuditRecord::new(
                    actions::ACCOUNT_UNBLOCKED,
                    "BANK_ACCOUNT",
                    account_id.value(),
                    json!({
                        "account_number": account.account_number,
                        "justification": justification,
                    }),
                )
                .by(actor),
            )
            .await;
        Ok(account)
    }

    /// Put an account under a restricted tier by hand.
    #[instrument(skip(self, reason, actor))]
    pub async fn restrict_account(
        &self,
        account_id: AccountId,
        tier: AccountTier,
        reason: &str,
        expires_at: Option<Timestamp>,
        actor: Option<String>,
    ) -> Result<AccountLimits> {
        if !matches!(
            tier,
            AccountTier::Tier2Restricted | AccountTier::Tier3Limited | AccountTier::Tier4Minimal
        ) {
            return Err(LedgerError::InvalidTransaction(format!(
                "tier {tier:?} cannot be applied manually"
            )));
        }
        if reason.trim().is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "a reason is required".to_string(),
            ));
        }

        let limits = self
            .apply_limits(account_id, tier, reason, expires_at, None)
            .await?;
        self.audit
            .record(
                AuditRecord::new(
                    actions::SOFT_LIMITS_APPLIED,
                    "BANK_ACCOUNT",
                    account_id.value(),
                    json!({
                        "tier": limits.tier,
                        "reason": reason,
                        "expires_at": expires_at,
                    }),
                )
                .by(actor),
            )
            .await;
        Ok(limits)
    }

    async fn audit_discrepancy(&self, action: &str, discrepancy: &ReconciliationDiscrepancy) {
        self.audit
            .record(AuditRecord::new(
                action,
                "RECONCILIATION_DISCREPANCY",
                discrepancy.id.value(),
                json!({
                    "report_id": discrepancy.report_id,
                    "type": discrepancy.discrepancy_type,
                    "severity": discrepancy.severity,
                    "entity_type": discrepancy.entity_type,
                    "entity_id": discrepancy.entity_id,
                    "description": discrepancy.description,
                }),
            ))
            .await;
    }
}

fn parse_values(discrepancy: &ReconciliationDiscrepancy) -> Result<(Decimal, Decimal)> {
    let parse = |value: &str| {
        Decimal::from_str(value).map_err(|_| {
            LedgerError::Internal(format!(
                "discrepancy {} carries a non-numeric value: {value}",
                discrepancy.id
            ))
        })
    };
    Ok((
        parse(&discrepancy.expected_value)?,
        parse(&discrepancy.actual_value)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_common::RetryPolicy;
    use corebank_ledger::{InMemoryAuditLog, InMemoryLedgerStore, LedgerStore, ReconciliationReport};
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        audit: Arc<InMemoryAuditLog>,
        engine: ResponseEngine,
        events: tokio::sync::mpsc::UnboundedReceiver<LedgerEvent>,
    }

    async fn fixture(config: ReconciliationConfig, pool_balance: Decimal) -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::new());
        store
            .open_account(&config.pool.account_number, pool_balance)
            .await
            .unwrap();
        let audit = Arc::new(InMemoryAuditLog::new());
        let (publisher, events) = EventPublisher::channel();
        let runner = TransactionRunner::new(store.clone(), RetryPolicy::default());
        let engine = ResponseEngine::new(runner, audit.clone(), publisher, config);
        Fixture {
            store,
            audit,
            engine,
            events,
        }
    }

    async fn persisted(
        store: &InMemoryLedgerStore,
        mut discrepancy: ReconciliationDiscrepancy,
    ) -> ReconciliationDiscrepancy {
        let report = store
            .insert_report(ReconciliationReport::start(Utc::now().date_naive()))
            .await
            .unwrap();
        discrepancy.report_id = report.id;
        store.insert_discrepancy(discrepancy).await.unwrap()
    }

    fn balance_mismatch(
        account: &Account,
        expected: Decimal,
        actual: Decimal,
        severity: Severity,
    ) -> ReconciliationDiscrepancy {
        ReconciliationDiscrepancy::new(
            DiscrepancyType::AccountBalanceMismatch,
            EntityType::BankAccount,
            account.id.value(),
            expected.to_string(),
            actual.to_string(),
            severity,
            "mismatch",
        )
        .with_difference(actual - expected)
    }

    #[tokio::test]
    async fn test_low_excess_moves_to_pool() {
        let mut fx = fixture(ReconciliationConfig::default(), dec!(100000)).await;
        let account = fx.store.open_account("X", dec!(1005.00)).await.unwrap();
        let mut d = persisted(
            &fx.store,
            balance_mismatch(&account, dec!(1000.00), dec!(1005.00), Severity::Low),
        )
        .await;

        let action = fx.engine.handle(&mut d).await.unwrap();

        assert_eq!(action, ResponseAction::AutoCorrected);
        let account = fx.store.account(account.id).await.unwrap();
        assert_eq!(account.balance, dec!(1000.00));
        assert_eq!(account.available_balance, Some(dec!(1000.00)));
        let pool = fx.store.account_by_number("RECONCILIATION-POOL").await.unwrap();
        assert_eq!(pool.balance, dec!(100005.00));
        assert!(fx.store.discrepancy(d.id).await.unwrap().auto_corrected);
        assert_eq!(fx.audit.with_action(actions::DISCREPANCY_DETECTED).len(), 1);
        assert_eq!(fx.audit.with_action(actions::DISCREPANCY_AUTO_CORRECTED).len(), 1);
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_low_shortfall_drawn_from_pool_and_alerts() {
        let mut fx = fixture(ReconciliationConfig::default(), dec!(10003)).await;
        let account = fx.store.open_account("X", dec!(995)).await.unwrap();
        let mut d = persisted(
            &fx.store,
            balance_mismatch(&account, dec!(1000), dec!(995), Severity::Low),
        )
        .await;

        assert_eq!(
            fx.engine.handle(&mut d).await.unwrap(),
            ResponseAction::AutoCorrected
        );
        assert_eq!(fx.store.account(account.id).await.unwrap().balance, dec!(1000));
        let pool = fx.store.account_by_number("RECONCILIATION-POOL").await.unwrap();
        assert_eq!(pool.balance, dec!(9998));
        assert_eq!(pool.reconciled_balance, Some(dec!(9998)));

        match fx.events.try_recv().unwrap() {
            LedgerEvent::PoolLowBalance { balance, .. } => assert_eq!(balance, dec!(9998)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_pool_falls_back_to_shadow_balance() {
        let fx = fixture(ReconciliationConfig::default(), dec!(2)).await;
        let account = fx.store.open_account("X", dec!(995)).await.unwrap();
        let mut d = persisted(
            &fx.store,
            balance_mismatch(&account, dec!(1000), dec!(995), Severity::Low),
        )
        .await;

        let action = fx.engine.handle(&mut d).await.unwrap();

        assert_eq!(action, ResponseAction::ShadowBalance);
        let account = fx.store.account(account.id).await.unwrap();
        assert_eq!(account.balance, dec!(995));
        assert_eq!(account.pending_correction, Some(dec!(5)));
        assert_eq!(account.reconciled_balance, Some(dec!(995)));
        assert!(!fx.store.discrepancy(d.id).await.unwrap().auto_corrected);
        let pool = fx.store.account_by_number("RECONCILIATION-POOL").await.unwrap();
        assert_eq!(pool.balance, dec!(2));
    }

    #[tokio::test]
    async fn test_auto_correct_disabled_tracks_shadow_balance() {
        let config = ReconciliationConfig {
            auto_correct_enabled: false,
            ..ReconciliationConfig::default()
        };
        let fx = fixture(config, dec!(100000)).await;
        let account = fx.store.open_account("X", dec!(1005)).await.unwrap();
        let mut d = persisted(
            &fx.store,
            balance_mismatch(&account, dec!(1000), dec!(1005), Severity::Low),
        )
        .await;

        assert_eq!(
            fx.engine.handle(&mut d).await.unwrap(),
            ResponseAction::ShadowBalance
        );
        let account = fx.store.account(account.id).await.unwrap();
        assert_eq!(account.balance, dec!(1005));
        assert_eq!(account.customer_available_balance(), dec!(1000));
    }

    #[tokio::test]
    async fn test_medium_and_high_apply_tiers() {
        let fx = fixture(ReconciliationConfig::default(), dec!(100000)).await;
        let medium = fx.store.open_account("M", dec!(1050)).await.unwrap();
        let high = fx.store.open_account("H", dec!(1500)).await.unwrap();

        let mut d = persisted(
            &fx.store,
            balance_mismatch(&medium, dec!(1000), dec!(1050), Severity::Medium),
        )
        .await;
        assert_eq!(
            fx.engine.handle(&mut d).await.unwrap(),
            ResponseAction::SoftLimits(AccountTier::Tier3Limited)
        );
        let limits = fx.store.limits(medium.id).await.unwrap().unwrap();
        assert_eq!(limits.caps.max_withdrawal, Some(dec!(2000)));
        assert_eq!(limits.reason, "Reconciliation discrepancy: ACCOUNT_BALANCE_MISMATCH");
        assert!(limits.expires_at.is_none());
        assert_eq!(
            fx.store.account(medium.id).await.unwrap().pending_correction,
            Some(dec!(-50))
        );

        let mut d = persisted(
            &fx.store,
            balance_mismatch(&high, dec!(1000), dec!(1500), Severity::High),
        )
        .await;
        assert_eq!(
            fx.engine.handle(&mut d).await.unwrap(),
            ResponseAction::SoftLimits(AccountTier::Tier4Minimal)
        );
        let limits = fx.store.limits(high.id).await.unwrap().unwrap();
        assert_eq!(limits.caps.daily_limit, Some(dec!(1000)));
        assert_eq!(fx.audit.with_action(actions::SOFT_LIMITS_APPLIED).len(), 2);
    }

    #[tokio::test]
    async fn test_critical_blocks_then_unblock_clears_everything() {
        let fx = fixture(ReconciliationConfig::default(), dec!(100000)).await;
        let account = fx.store.open_account("X", dec!(5000)).await.unwrap();
        fx.engine
            .restrict_account(account.id, AccountTier::Tier2Restricted, "review", None, None)
            .await
            .unwrap();
        let mut d = persisted(
            &fx.store,
            balance_mismatch(&account, dec!(1000), dec!(5000), Severity::Critical),
        )
        .await;

        assert_eq!(
            fx.engine.handle(&mut d).await.unwrap(),
            ResponseAction::HardBlocked
        );
        assert!(fx.store.account(account.id).await.unwrap().reconciliation_blocked);
        assert_eq!(fx.audit.with_action(actions::ACCOUNT_HARD_BLOCKED).len(), 1);

        let unblocked = fx
            .engine
            .unblock_account(account.id, "verified with branch", Some("ops".into()))
            .await
            .unwrap();
        assert!(!unblocked.reconciliation_blocked);
        assert_eq!(unblocked.reconciled_balance, Some(dec!(5000)));
        assert!(fx.store.limits(account.id).await.unwrap().is_none());

        // Unblocking again is harmless.
        fx.engine
            .unblock_account(account.id, "again", None)
            .await
            .unwrap();
        let records = fx.audit.with_action(actions::ACCOUNT_UNBLOCKED);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].actor.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_system_and_transaction_findings_are_manual() {
        let fx = fixture(ReconciliationConfig::default(), dec!(100000)).await;
        let mut system = persisted(
            &fx.store,
            ReconciliationDiscrepancy::new(
                DiscrepancyType::UnbalancedEntries,
                EntityType::System,
                0,
                "100",
                "60",
                Severity::Critical,
                "unbalanced",
            ),
        )
        .await;
        let mut missing = persisted(
            &fx.store,
            ReconciliationDiscrepancy::new(
                DiscrepancyType::MissingJournalEntries,
                EntityType::Transaction,
                42,
                "1 or more",
                "0",
                Severity::High,
                "missing",
            ),
        )
        .await;

        assert_eq!(
            fx.engine.handle(&mut system).await.unwrap(),
            ResponseAction::ManualReview
        );
        assert_eq!(
            fx.engine.handle(&mut missing).await.unwrap(),
            ResponseAction::ManualReview
        );
        assert_eq!(fx.audit.with_action(actions::SYSTEM_WIDE_DISCREPANCY).len(), 1);
        assert_eq!(fx.audit.with_action(actions::DISCREPANCY_DETECTED).len(), 2);
    }

    #[tokio::test]
    async fn test_null_available_is_recomputed() {
        let fx = fixture(ReconciliationConfig::default(), dec!(100000)).await;
        let mut account = fx.store.open_account("X", dec!(300)).await.unwrap();
        account.available_balance = None;
        fx.store.force_update_account(account.clone()).unwrap();

        let mut d = persisted(
            &fx.store,
            ReconciliationDiscrepancy::new(
                DiscrepancyType::AvailableBalanceMismatch,
                EntityType::BankAccount,
                account.id.value(),
                "300",
                "NULL",
                Severity::Low,
                "null available",
            ),
        )
        .await;

        assert_eq!(
            fx.engine.handle(&mut d).await.unwrap(),
            ResponseAction::AvailableRecomputed
        );
        assert_eq!(
            fx.store.account(account.id).await.unwrap().available_balance,
            Some(dec!(300))
        );
        assert!(d.auto_corrected);
    }

    #[tokio::test]
    async fn test_restrict_rejects_unsupported_tiers() {
        let fx = fixture(ReconciliationConfig::default(), dec!(100000)).await;
        let account = fx.store.open_account("X", dec!(10)).await.unwrap();
        let err = fx
            .engine
            .restrict_account(account.id, AccountTier::Tier5Blocked, "x", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransaction(_)));
    }
}
