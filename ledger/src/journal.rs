//! Journal entry types for double-entry bookkeeping.

use corebank_common::{
    validate_amount, AccountId, JournalEntryId, LedgerError, Result, Timestamp, TransactionId,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Type of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Debit entry. Decreases the account balance.
    Debit,
    /// Credit entry. Increases the account balance.
    Credit,
}

impl EntryType {
    /// The opposite side, used when reversing.
    pub fn inverse(self) -> Self {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }

    /// Signed effect on an account balance.
    pub fn balance_effect(self, amount: Decimal) -> Decimal {
        match self {
            EntryType::Debit => -amount,
            EntryType::Credit => amount,
        }
    }
}

/// A single immutable posting against one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Store-assigned identifier.
    pub id: JournalEntryId,
    /// Transaction this entry belongs to.
    pub transaction_id: TransactionId,
    /// Account affected.
    pub account_id: AccountId,
    /// Entry type (debit or credit).
    pub entry_type: EntryType,
    /// Amount, always positive.
    pub amount: Decimal,
    /// Account balance right after this entry.
    pub balance_after: Decimal,
    /// When this entry was created.
    pub created_at: Timestamp,
}

impl JournalEntry {
    fn new(
        transaction_id: TransactionId,
        account_id: AccountId,
        entry_type: EntryType,
        amount: Decimal,
        balance_after: Decimal,
    ) -> Self {
        Self {
            id: JournalEntryId::new(0),
            transaction_id,
            account_id,
            entry_type,
            amount,
            balance_after,
            created_at: Utc::now(),
        }
    }

    /// Create a debit entry.
    pub fn debit(
        transaction_id: TransactionId,
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
    ) -> Self {
        Self::new(transaction_id, account_id, EntryType::Debit, amount, balance_after)
    }

    /// Create a credit entry.
    pub fn credit(
        transaction_id: TransactionId,
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
    ) -> Self {
        Self::new(transaction_id, account_id, EntryType::Credit, amount, balance_after)
    }

    /// Create an entry of the given side.
    pub fn of_type(
        entry_type: EntryType,
        transaction_id: TransactionId,
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
    ) -> Self {
        Self::new(transaction_id, account_id, entry_type, amount, balance_after)
    }
}

/// One requested line of a manual posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingLine {
    /// Account number to post against.
    pub account_number: String,
    /// Debit or credit.
    pub entry_type: EntryType,
    /// Amount, must be positive.
    pub amount: Decimal,
}

impl PostingLine {
    /// Create a debit line.
    pub fn debit(account_number: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_number: account_number.into(),
            entry_type: EntryType::Debit,
            amount,
        }
    }

    /// Create a credit line.
    pub fn credit(account_number: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_number: account_number.into(),
            entry_type: EntryType::Credit,
            amount,
        }
    }
}

/// A batch of posting lines that must be committed together.
#[derive(Debug, Clone)]
pub struct JournalBatch {
    lines: Vec<PostingLine>,
}

impl JournalBatch {
    /// Validate and wrap a set of lines.
    ///
    /// Requires at least two lines, every amount positive, and equal debit
    /// and credit totals.
    pub fn validate(lines: Vec<PostingLine>) -> Result<Self> {
        if lines.len() < 2 {
            return Err(LedgerError::InvalidJournalEntry(format!(
                "at least 2 entries required, got {}",
                lines.len()
            )));
        }
        for line in &lines {
            if line.account_number.trim().is_empty() {
                return Err(LedgerError::InvalidJournalEntry(
                    "account number is required".to_string(),
                ));
            }
            validate_amount(line.amount)?;
        }

        let debits = checked_total(&lines, EntryType::Debit)?;
        let credits = checked_total(&lines, EntryType::Credit)?;
        if debits != credits {
            return Err(LedgerError::UnbalancedJournalEntry { debits, credits });
        }
        Ok(Self { lines })
    }

    /// Lines in the batch.
    pub fn lines(&self) -> &[PostingLine] {
        &self.lines
    }

    /// Get total debits.
    pub fn total_debits(&self) -> Decimal {
        self.total_of(EntryType::Debit)
    }

    /// Get total credits.
    pub fn total_credits(&self) -> Decimal {
        self.total_of(EntryType::Credit)
    }

    fn total_of(&self, side: EntryType) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.entry_type == side)
            .map(|l| l.amount)
            .sum()
    }
}

/// Sum one side of a batch, failing instead of overflowing.
fn checked_total(lines: &[PostingLine], side: EntryType) -> Result<Decimal> {
    lines
        .iter()
        .filter(|l| l.entry_type == side)
        .try_fold(Decimal::ZERO, |total, line| {
            total
                .checked_add(line.amount)
                .ok_or_else(|| LedgerError::BalanceOverflow {
                    account: line.account_number.clone(),
                    amount: line.amount,
                })
        })
}

/// Debit and credit totals over a set of entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTotals {
    pub debits: Decimal,
    pub credits: Decimal,
}

impl EntryTotals {
    /// Sum entries by side.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a JournalEntry>) -> Self {
        let mut totals = Self::default();
        for entry in entries {
            match entry.entry_type {
                EntryType::Debit => totals.debits += entry.amount,
                EntryType::Credit => totals.credits += entry.amount,
            }
        }
        totals
    }

    /// Net effect on balances (credits minus debits).
    pub fn net(&self) -> Decimal {
        self.credits - self.debits
    }

    /// Check debits equal credits.
    pub fn is_balanced(&self) -> bool {
        self.debits == self.credits
    }
}

/// Journal search criteria. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalFilter {
    pub account_number: Option<String>,
    pub entry_type: Option<EntryType>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl JournalFilter {
    /// Check an entry against every criterion except the account number,
    /// which the store resolves to an id first.
    pub fn matches(&self, entry: &JournalEntry, account: Option<AccountId>) -> bool {
        account.map_or(true, |id| entry.account_id == id)
            && self.entry_type.map_or(true, |t| entry.entry_type == t)
            && self.from.map_or(true, |from| entry.created_at >= from)
            && self.to.map_or(true, |to| entry.created_at <= to)
    }
}
