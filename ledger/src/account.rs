//! Account definitions for ledger.

use corebank_common::{AccountId, LedgerError, Result, Timestamp};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::journal::EntryType;

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Account is active and can transact.
    Active,
    /// Account is frozen (no transactions allowed).
    Frozen,
    /// Account is closed.
    Closed,
}

/// A customer or internal ledger account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Store-assigned identifier.
    pub id: AccountId,
    /// Unique account number.
    pub account_number: String,
    /// Account status.
    pub status: AccountStatus,
    /// Booked balance.
    pub balance: Decimal,
    /// Balance minus active holds. `None` on rows never touched by a hold-aware operation.
    pub available_balance: Option<Decimal>,
    /// Last-known-good balance snapshot.
    pub reconciled_balance: Option<Decimal>,
    /// Shadow correction (expected minus actual) awaiting review.
    pub pending_correction: Option<Decimal>,
    /// Hard block set by reconciliation.
    pub reconciliation_blocked: bool,
    /// When a reviewer last reconciled the account.
    pub last_reconciled_at: Option<Timestamp>,
    /// When the account was opened.
    pub opened_at: Timestamp,
    /// When the account was last updated.
    pub updated_at: Timestamp,
}

impl Account {
    /// Create a new account. The store assigns the identifier.
    pub fn new(account_number: impl Into<String>, opening_balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(0),
            account_number: account_number.into(),
            status: AccountStatus::Active,
            balance: opening_balance,
            available_balance: Some(opening_balance),
            reconciled_balance: Some(opening_balance),
            pending_correction: None,
            reconciliation_blocked: false,
            last_reconciled_at: Some(now),
            opened_at: now,
            updated_at: now,
        }
    }

    /// Check if account can transact.
    pub fn can_transact(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Fail unless the account can transact.
    pub fn ensure_active(&self) -> Result<()> {
        if !self.can_transact() {
            return Err(LedgerError::BankAccountNotActive(self.account_number.clone()));
        }
        Ok(())
    }

    /// Available balance, falling back to the booked balance when unset.
    pub fn available(&self) -> Decimal {
        self.available_balance.unwrap_or(self.balance)
    }

    /// Increase the booked balance. Fails instead of overflowing.
    pub fn credit(&mut self, amount: Decimal) -> Result<()> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow {
                account: self.account_number.clone(),
                amount,
            })?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Decrease the booked balance. Never lets it go below zero.
    pub fn debit(&mut self, amount: Decimal) -> Result<()> {
        if self.balance < amount {
            return Err(LedgerError::NegativeBalanceNotAllowed {
                account: self.account_number.clone(),
                balance: self.balance,
                amount,
            });
        }
        self.balance -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a posting of the given side.
    pub fn apply(&mut self, entry_type: EntryType, amount: Decimal) -> Result<()> {
        match entry_type {
            EntryType::Debit => self.debit(amount),
            EntryType::Credit => self.credit(amount),
        }
    }

    /// Recompute the available balance from the active hold total.
    pub fn refresh_available(&mut self, active_holds: Decimal) {
        self.available_balance = Some(self.balance - active_holds);
        self.updated_at = Utc::now();
    }

    /// Check whether a shadow correction is pending.
    pub fn has_pending_correction(&self) -> bool {
        self.pending_correction
            .map(|c| !c.is_zero())
            .unwrap_or(false)
    }

    /// Take the current balance as the new known-good snapshot.
    pub fn mark_reconciled(&mut self) {
        let now = Utc::now();
        self.reconciled_balance = Some(self.balance);
        self.last_reconciled_at = Some(now);
        self.updated_at = now;
    }

    /// Record a shadow balance: keep operating, track the gap separately.
    pub fn enable_shadow_balance(&mut self, expected: Decimal, actual: Decimal) {
        self.pending_correction = Some(expected - actual);
        self.mark_reconciled();
    }

    /// Clear reconciliation controls after manual review.
    pub fn clear_reconciliation_state(&mut self) {
        self.reconciliation_blocked = false;
        self.pending_correction = None;
        self.mark_reconciled();
    }

    /// Balance a customer may rely on while a shadow correction is pending.
    ///
    /// Takes the lower of the snapshot and the live balance and subtracts the
    /// size of the pending correction.
    pub fn customer_available_balance(&self) -> Decimal {
        if !self.has_pending_correction() {
            return self.available();
        }
        let base = self
            .reconciled_balance
            .map(|r| r.min(self.balance))
            .unwrap_or(self.balance);
        let correction = self.pending_correction.unwrap_or_default().abs();
        (base - correction).min(self.available())
    }

    /// Freeze the account.
    pub fn freeze(&mut self) {
        self.status = AccountStatus::Frozen;
        self.updated_at = Utc::now();
    }

    /// Reactivate a frozen account.
    pub fn unfreeze(&mut self) {
        self.status = AccountStatus::Active;
        self.updated_at = Utc::now();
    }
}
