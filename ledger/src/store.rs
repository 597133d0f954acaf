//! Persistence seams for the ledger.
//!
//! [`LedgerStore`] serves committed reads and record CRUD. Money-moving work
//! goes through a [`LedgerTransaction`], which row-locks what it reads and
//! stages every write until [`LedgerTransaction::commit`]. Dropping a unit
//! of work without committing discards everything it staged.
//!
//! Lock order: transactions before accounts, and accounts in ascending id.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use corebank_common::{
    AccountId, AuthCode, DayWindow, DiscrepancyId, JournalEntryId, PaymentType, ReportId, Result,
    Timestamp, Transaction, TransactionId,
};
use rust_decimal::Decimal;

use crate::account::Account;
use crate::hold::AccountHold;
use crate::journal::{JournalEntry, JournalFilter};
use crate::limits::AccountLimits;
use crate::report::{ReconciliationDiscrepancy, ReconciliationReport};

/// One unit of work: row locks held until commit or drop.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Lock an account row and return its working copy.
    async fn lock_account(&mut self, id: AccountId) -> Result<Account>;

    /// Resolve an account number and lock the row.
    async fn lock_account_by_number(&mut self, account_number: &str) -> Result<Account>;

    /// Lock a transaction row and return its working copy.
    async fn lock_transaction(&mut self, id: TransactionId) -> Result<Transaction>;

    /// Lock the transaction carrying `auth_code`, if any.
    async fn lock_transaction_by_auth_code(
        &mut self,
        auth_code: &AuthCode,
    ) -> Result<Option<Transaction>>;

    /// Stage an account update. The account must be locked.
    async fn save_account(&mut self, account: &Account) -> Result<()>;

    /// Stage a new transaction and return it with its assigned id.
    async fn insert_transaction(&mut self, transaction: Transaction) -> Result<Transaction>;

    /// Stage a transaction update. The row must be locked or new.
    async fn save_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    /// Stage a journal entry and return it with its assigned id.
    async fn append_journal_entry(&mut self, entry: JournalEntry) -> Result<JournalEntry>;

    /// Entries of a transaction, committed and staged.
    async fn journal_entries_for_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Vec<JournalEntry>>;

    /// Check whether any transaction reverses `transaction_id`.
    async fn has_reversal(&mut self, transaction_id: TransactionId) -> Result<bool>;

    /// Sum of DEBIT entries on an account with `from <= created_at < to`.
    async fn debit_total_between(
        &mut self,
        account_id: AccountId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Decimal>;

    /// Stage a new hold. The account must be locked.
    async fn insert_hold(&mut self, hold: AccountHold) -> Result<AccountHold>;

    /// Stage a hold update. The account must be locked.
    async fn save_hold(&mut self, hold: &AccountHold) -> Result<()>;

    /// The active hold of a transaction, if any.
    async fn active_hold_for_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<AccountHold>>;

    /// Sum of active holds on an account.
    async fn active_hold_total(&mut self, account_id: AccountId) -> Result<Decimal>;

    /// Limits in force on an account at `now`.
    async fn active_limits(
        &mut self,
        account_id: AccountId,
        now: Timestamp,
    ) -> Result<Option<AccountLimits>>;

    /// Replace the account's limits row. The account must be locked.
    async fn save_limits(&mut self, limits: AccountLimits) -> Result<AccountLimits>;

    /// Remove the account's limits row. The account must be locked.
    async fn delete_limits(&mut self, account_id: AccountId) -> Result<()>;

    /// Apply every staged write atomically and release the locks.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Committed reads and record CRUD.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    /// Create an account with a unique number.
    async fn open_account(&self, account_number: &str, opening_balance: Decimal) -> Result<Account>;

    async fn account(&self, id: AccountId) -> Result<Account>;

    async fn account_by_number(&self, account_number: &str) -> Result<Account>;

    /// All accounts ordered by id.
    async fn accounts(&self) -> Result<Vec<Account>>;

    async fn payment_type(&self, name: &str) -> Result<PaymentType>;

    async fn transaction(&self, id: TransactionId) -> Result<Transaction>;

    async fn journal_entry(&self, id: JournalEntryId) -> Result<JournalEntry>;

    async fn journal_entries_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<JournalEntry>>;

    /// Entries matching `filter`, ordered by creation time.
    async fn search_journal(&self, filter: &JournalFilter) -> Result<Vec<JournalEntry>>;

    async fn holds_for_account(&self, account_id: AccountId) -> Result<Vec<AccountHold>>;

    /// Active holds past their expiry at `now`.
    async fn expired_holds(&self, now: Timestamp) -> Result<Vec<AccountHold>>;

    async fn limits(&self, account_id: AccountId) -> Result<Option<AccountLimits>>;

    /// A consistent view of everything reconciliation reads for one day.
    async fn snapshot(&self, window: &DayWindow) -> Result<LedgerSnapshot>;

    async fn insert_report(&self, report: ReconciliationReport) -> Result<ReconciliationReport>;

    async fn save_report(&self, report: &ReconciliationReport) -> Result<()>;

    async fn report(&self, id: ReportId) -> Result<ReconciliationReport>;

    async fn latest_report(&self) -> Result<Option<ReconciliationReport>>;

    async fn insert_discrepancy(
        &self,
        discrepancy: ReconciliationDiscrepancy,
    ) -> Result<ReconciliationDiscrepancy>;

    async fn save_discrepancy(&self, discrepancy: &ReconciliationDiscrepancy) -> Result<()>;

    async fn discrepancy(&self, id: DiscrepancyId) -> Result<ReconciliationDiscrepancy>;

    /// Discrepancies of a report ordered by id.
    async fn discrepancies_for_report(
        &self,
        report_id: ReportId,
    ) -> Result<Vec<ReconciliationDiscrepancy>>;
}

/// Committed state as of one instant.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub window: DayWindow,
    /// Every account, ordered by id.
    pub accounts: Vec<Account>,
    /// Entries created inside the window, ordered by id.
    pub entries: Vec<JournalEntry>,
    /// Transactions created inside the window, ordered by id.
    pub transactions: Vec<Transaction>,
    /// Number of journal entries per transaction, across all time.
    pub entry_counts: HashMap<TransactionId, usize>,
    /// Sum of active holds per account.
    pub active_holds: HashMap<AccountId, Decimal>,
    /// Transactions that own an active hold.
    pub active_hold_transactions: HashSet<TransactionId>,
    /// Net balance effect of entries posted after each account's last
    /// reconciled snapshot. Accounts without a snapshot are absent.
    pub posted_since_reconciled: HashMap<AccountId, Decimal>,
}

impl LedgerSnapshot {
    /// Window entries grouped by account.
    pub fn entries_by_account(&self) -> HashMap<AccountId, Vec<&JournalEntry>> {
        let mut grouped: HashMap<AccountId, Vec<&JournalEntry>> = HashMap::new();
        for entry in &self.entries {
            grouped.entry(entry.account_id).or_default().push(entry);
        }
        grouped
    }

    /// Active hold total of an account.
    pub fn hold_total(&self, account_id: AccountId) -> Decimal {
        self.active_holds
            .get(&account_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Net effect of entries posted since the account's snapshot.
    pub fn posted_since_reconciled(&self, account_id: AccountId) -> Decimal {
        self.posted_since_reconciled
            .get(&account_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Number of entries a transaction owns.
    pub fn entry_count(&self, transaction_id: TransactionId) -> usize {
        self.entry_counts.get(&transaction_id).copied().unwrap_or(0)
    }
}
