//! Pre-transaction checks driven by reconciliation controls.

use chrono::Utc;
use corebank_common::{day_window_containing, LedgerError, Result};
use corebank_ledger::{Account, LedgerTransaction};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Operation being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedOperation {
    Deposit,
    Withdrawal,
    TransferOut,
}

impl GuardedOperation {
    /// Whether the operation moves money out of the account.
    pub fn is_debit(self) -> bool {
        !matches!(self, GuardedOperation::Deposit)
    }
}

/// Checks blocks and soft limits before money moves.
#[derive(Debug, Clone, Copy)]
pub struct TransactionGuard {
    timezone: Tz,
}

impl TransactionGuard {
    /// Create a guard. Daily limits use calendar days in `timezone`.
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// Reject a hard-blocked account.
    pub fn ensure_not_blocked(account: &Account) -> Result<()> {
        if account.reconciliation_blocked {
            warn!(account = %account.account_number, "Account is reconciliation blocked");
            return Err(LedgerError::AccountReconciliationBlocked(
                account.account_number.clone(),
            ));
        }
        Ok(())
    }

    /// Check `operation` of `amount` against the account's controls.
    ///
    /// Runs inside the caller's unit of work so the limits and today's
    /// debits are read under the account lock.
    ///
    /// The daily limit counts today's debits plus every active hold, whichever day it was placed.
    pub async fn check(
        &self,
        tx: &mut dyn LedgerTransaction,
        account: &Account,
        operation: GuardedOperation,
        amount: Decimal,
    ) -> Result<()> {
        if !operation.is_debit() {
            if self.has_reconciliation_issues(tx, account).await? {
                info!(
                    account = %account.account_number,
                    "Crediting account with open reconciliation issues"
                );
            }
            return Ok(());
        }

        Self::ensure_not_blocked(account)?;

        let now = Utc::now();
        let limits = match tx.active_limits(account.id, now).await? {
            Some(limits) => limits,
            None => {
                debug!(account = %account.account_number, "No active limits");
                return Ok(());
            }
        };

        let (kind, cap) = match operation {
            GuardedOperation::Withdrawal => ("max_withdrawal", limits.caps.max_withdrawal),
            GuardedOperation::TransferOut => ("max_transfer_out", limits.caps.max_transfer_out),
            GuardedOperation::Deposit => return Ok(()),
        };
        if let Some(cap) = cap {
            if amount > cap {
                warn!(
                    account = %account.account_number,
                    tier = ?limits.tier,
                    limit = %cap,
                    amount = %amount,
                    "Amount exceeds soft limit"
                );
                return Err(LedgerError::TransactionLimitExceeded {
                    limit_kind: kind.to_string(),
                    limit: cap,
                    amount,
                });
            }
        }

        if let Some(daily) = limits.caps.daily_limit {
            let window = day_window_containing(now, self.timezone);
            let debited = tx
                .debit_total_between(account.id, window.start, window.end)
                .await?;
            let held = tx.active_hold_total(account.id).await?;
            let projected = debited + held + amount;
            if projected > daily {
                warn!(
                    account = %account.account_number,
                    limit = %daily,
                    projected = %projected,
                    "Daily limit exceeded"
                );
                return Err(LedgerError::TransactionLimitExceeded {
                    limit_kind: "daily_limit".to_string(),
                    limit: daily,
                    amount,
                });
            }
        }

        Ok(())
    }

    /// Blocked, carrying a shadow correction, or under active limits.
    pub async fn has_reconciliation_issues(
        &self,
        tx: &mut dyn LedgerTransaction,
        account: &Account,
    ) -> Result<bool> {
        if account.reconciliation_blocked || account.has_pending_correction() {
            return Ok(true);
        }
        Ok(tx.active_limits(account.id, Utc::now()).await?.is_some())
    }
}
