//! In-memory ledger store with row locks and staged commits.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corebank_common::{
    constants, AccountId, AuthCode, DayWindow, DiscrepancyId, HoldId, JournalEntryId, LedgerError,
    LimitsId, PaymentType, PaymentTypeId, ReportId, Result, Timestamp, Transaction, TransactionId,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::account::Account;
use crate::hold::AccountHold;
use crate::journal::{EntryType, JournalEntry, JournalFilter};
use crate::limits::AccountLimits;
use crate::report::{ReconciliationDiscrepancy, ReconciliationReport};
use crate::store::{LedgerSnapshot, LedgerStore, LedgerTransaction};

type RowLock = Arc<Mutex<()>>;

#[derive(Default)]
struct Sequences {
    account: AtomicI64,
    transaction: AtomicI64,
    journal_entry: AtomicI64,
    hold: AtomicI64,
    limits: AtomicI64,
    payment_type: AtomicI64,
    report: AtomicI64,
    discrepancy: AtomicI64,
}

fn next(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

struct StoreInner {
    accounts: DashMap<AccountId, Account>,
    account_numbers: DashMap<String, AccountId>,
    account_locks: DashMap<AccountId, RowLock>,
    transactions: DashMap<TransactionId, Transaction>,
    auth_codes: DashMap<AuthCode, TransactionId>,
    transaction_locks: DashMap<TransactionId, RowLock>,
    journal: RwLock<Vec<JournalEntry>>,
    holds: DashMap<HoldId, AccountHold>,
    limits: DashMap<AccountId, AccountLimits>,
    payment_types: DashMap<String, PaymentType>,
    reports: DashMap<ReportId, ReconciliationReport>,
    discrepancies: DashMap<DiscrepancyId, ReconciliationDiscrepancy>,
    /// Held for writing while a commit applies, for reading while a snapshot copies.
    commit_gate: RwLock<()>,
    seq: Sequences,
    lock_wait_timeout: Duration,
}

/// Ledger store kept in process memory.
///
/// Cloning shares the same tables.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    inner: Arc<StoreInner>,
}

impl InMemoryLedgerStore {
    /// Create an empty store with the payment types seeded.
    pub fn new() -> Self {
        Self::with_lock_wait_timeout(constants::lock_wait_timeout())
    }

    /// Create a store whose row-lock waits give up after `wait`.
    pub fn with_lock_wait_timeout(wait: Duration) -> Self {
        let inner = StoreInner {
            accounts: DashMap::new(),
            account_numbers: DashMap::new(),
            account_locks: DashMap::new(),
            transactions: DashMap::new(),
            auth_codes: DashMap::new(),
            transaction_locks: DashMap::new(),
            journal: RwLock::new(Vec::new()),
            holds: DashMap::new(),
            limits: DashMap::new(),
            payment_types: DashMap::new(),
            reports: DashMap::new(),
            discrepancies: DashMap::new(),
            commit_gate: RwLock::new(()),
            seq: Sequences::default(),
            lock_wait_timeout: wait,
        };

        for name in PaymentType::SEEDED {
            let id = PaymentTypeId::new(next(&inner.seq.payment_type));
            inner.payment_types.insert(
                name.to_string(),
                PaymentType {
                    id,
                    name: name.to_string(),
                },
            );
        }

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Overwrite a committed account row, bypassing locks and the journal.
    ///
    /// Used to inject drift for reconciliation drills and tests.
    pub fn force_update_account(&self, account: Account) -> Result<()> {
        let _gate = self.inner.commit_gate.write();
        if !self.inner.accounts.contains_key(&account.id) {
            return Err(LedgerError::AccountNotFound(account.id.to_string()));
        }
        self.inner.accounts.insert(account.id, account);
        Ok(())
    }

    /// Insert a committed transaction without any journal entries.
    pub fn force_insert_transaction(&self, mut transaction: Transaction) -> Result<Transaction> {
        let _gate = self.inner.commit_gate.write();
        if let Some(code) = &transaction.auth_code {
            if self.inner.auth_codes.contains_key(code) {
                return Err(LedgerError::DuplicateAuthCode(code.clone()));
            }
        }
        transaction.id = TransactionId::new(next(&self.inner.seq.transaction));
        if let Some(code) = &transaction.auth_code {
            self.inner.auth_codes.insert(code.clone(), transaction.id);
        }
        self.inner
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    fn account_id_for_number(&self, account_number: &str) -> Result<AccountId> {
        self.inner
            .account_numbers
            .get(account_number)
            .map(|id| *id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn acquire_row<K>(
    locks: &DashMap<K, RowLock>,
    key: K,
    wait: Duration,
    resource: String,
) -> Result<OwnedMutexGuard<()>>
where
    K: Eq + Hash + Send + Sync,
{
    let lock = locks
        .entry(key)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .value()
        .clone();

    match tokio::time::timeout(wait, lock.lock_owned()).await {
        Ok(guard) => Ok(guard),
        Err(_) => {
            debug!(resource = %resource, "Row lock wait timed out");
            Err(LedgerError::LockConflict { resource })
        }
    }
}

/// A unit of work against [`InMemoryLedgerStore`].
pub struct MemoryTransaction {
    inner: Arc<StoreInner>,
    account_guards: HashMap<AccountId, OwnedMutexGuard<()>>,
    accounts: HashMap<AccountId, Account>,
    dirty_accounts: HashSet<AccountId>,
    transaction_guards: HashMap<TransactionId, OwnedMutexGuard<()>>,
    transactions: HashMap<TransactionId, Transaction>,
    new_transactions: HashSet<TransactionId>,
    dirty_transactions: HashSet<TransactionId>,
    journal: Vec<JournalEntry>,
    holds: HashMap<HoldId, AccountHold>,
    /// `None` marks a deletion.
    limits: HashMap<AccountId, Option<AccountLimits>>,
}

impl MemoryTransaction {
    fn new(inner: Arc<StoreInner>) -> Self {
        Self {
            inner,
            account_guards: HashMap::new(),
            accounts: HashMap::new(),
            dirty_accounts: HashSet::new(),
            transaction_guards: HashMap::new(),
            transactions: HashMap::new(),
            new_transactions: HashSet::new(),
            dirty_transactions: HashSet::new(),
            journal: Vec::new(),
            holds: HashMap::new(),
            limits: HashMap::new(),
        }
    }

    fn ensure_account_locked(&self, id: AccountId) -> Result<()> {
        if self.account_guards.contains_key(&id) {
            Ok(())
        } else {
            Err(LedgerError::Internal(format!(
                "account {id} written without holding its lock"
            )))
        }
    }

    /// Committed holds overlaid with the ones staged here.
    fn merged_holds(&self, pred: impl Fn(&AccountHold) -> bool) -> Vec<AccountHold> {
        let mut merged: HashMap<HoldId, AccountHold> = self
            .inner
            .holds
            .iter()
            .filter(|h| pred(h.value()))
            .map(|h| (*h.key(), h.value().clone()))
            .collect();

        for (id, hold) in &self.holds {
            if pred(hold) {
                merged.insert(*id, hold.clone());
            } else {
                merged.remove(id);
            }
        }

        let mut holds: Vec<AccountHold> = merged.into_values().collect();
        holds.sort_by_key(|h| h.id);
        holds
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn lock_account(&mut self, id: AccountId) -> Result<Account> {
        if let Some(account) = self.accounts.get(&id) {
            return Ok(account.clone());
        }
        if !self.inner.accounts.contains_key(&id) {
            return Err(LedgerError::AccountNotFound(id.to_string()));
        }

        let guard = acquire_row(
            &self.inner.account_locks,
            id,
            self.inner.lock_wait_timeout,
            format!("account:{id}"),
        )
        .await?;

        let account = self
            .inner
            .accounts
            .get(&id)
            .map(|a| a.clone())
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;

        self.account_guards.insert(id, guard);
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn lock_account_by_number(&mut self, account_number: &str) -> Result<Account> {
        let id = self
            .inner
            .account_numbers
            .get(account_number)
            .map(|id| *id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;
        self.lock_account(id).await
    }

    async fn lock_transaction(&mut self, id: TransactionId) -> Result<Transaction> {
        if let Some(tx) = self.transactions.get(&id) {
            return Ok(tx.clone());
        }
        if !self.inner.transactions.contains_key(&id) {
            return Err(LedgerError::TransactionNotFound(id));
        }

        let guard = acquire_row(
            &self.inner.transaction_locks,
            id,
            self.inner.lock_wait_timeout,
            format!("transaction:{id}"),
        )
        .await?;

        let tx = self
            .inner
            .transactions
            .get(&id)
            .map(|t| t.clone())
            .ok_or(LedgerError::TransactionNotFound(id))?;

        self.transaction_guards.insert(id, guard);
        self.transactions.insert(id, tx.clone());
        Ok(tx)
    }

    async fn lock_transaction_by_auth_code(
        &mut self,
        auth_code: &AuthCode,
    ) -> Result<Option<Transaction>> {
        let staged = self
            .transactions
            .values()
            .find(|t| t.auth_code.as_ref() == Some(auth_code))
            .cloned();
        if staged.is_some() {
            return Ok(staged);
        }

        let id = match self.inner.auth_codes.get(auth_code).map(|id| *id) {
            Some(id) => id,
            None => return Ok(None),
        };
        self.lock_transaction(id).await.map(Some)
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        self.ensure_account_locked(account.id)?;
        self.accounts.insert(account.id, account.clone());
        self.dirty_accounts.insert(account.id);
        Ok(())
    }

    async fn insert_transaction(&mut self, mut transaction: Transaction) -> Result<Transaction> {
        if let Some(code) = &transaction.auth_code {
            let staged = self
                .new_transactions
                .iter()
                .filter_map(|id| self.transactions.get(id))
                .any(|t| t.auth_code.as_ref() == Some(code));
            if staged || self.inner.auth_codes.contains_key(code) {
                return Err(LedgerError::DuplicateAuthCode(code.clone()));
            }
        }
        transaction.id = TransactionId::new(next(&self.inner.seq.transaction));
        self.new_transactions.insert(transaction.id);
        self.dirty_transactions.insert(transaction.id);
        self.transactions
            .insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn save_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let id = transaction.id;
        if !self.transaction_guards.contains_key(&id) && !self.new_transactions.contains(&id) {
            return Err(LedgerError::Internal(format!(
                "transaction {id} written without holding its lock"
            )));
        }
        self.transactions.insert(id, transaction.clone());
        self.dirty_transactions.insert(id);
        Ok(())
    }

    async fn append_journal_entry(&mut self, mut entry: JournalEntry) -> Result<JournalEntry> {
        if entry.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: entry.amount,
            });
        }
        entry.id = JournalEntryId::new(next(&self.inner.seq.journal_entry));
        self.journal.push(entry.clone());
        Ok(entry)
    }

    async fn journal_entries_for_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Vec<JournalEntry>> {
        let mut entries: Vec<JournalEntry> = self
            .inner
            .journal
            .read()
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect();
        entries.extend(
            self.journal
                .iter()
                .filter(|e| e.transaction_id == transaction_id)
                .cloned(),
        );
        Ok(entries)
    }

    async fn has_reversal(&mut self, transaction_id: TransactionId) -> Result<bool> {
        let staged = self
            .transactions
            .values()
            .any(|t| t.reversal_of == Some(transaction_id));
        let committed = self
            .inner
            .transactions
            .iter()
            .any(|t| t.reversal_of == Some(transaction_id));
        Ok(staged || committed)
    }

    async fn debit_total_between(
        &mut self,
        account_id: AccountId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Decimal> {
        let counts = |e: &&JournalEntry| {
            e.account_id == account_id
                && e.entry_type == EntryType::Debit
                && e.created_at >= from
                && e.created_at < to
        };
        let committed: Decimal = self
            .inner
            .journal
            .read()
            .iter()
            .filter(counts)
            .map(|e| e.amount)
            .sum();
        let staged: Decimal = self.journal.iter().filter(counts).map(|e| e.amount).sum();
        Ok(committed + staged)
    }

    async fn insert_hold(&mut self, mut hold: AccountHold) -> Result<AccountHold> {
        self.ensure_account_locked(hold.account_id)?;
        hold.id = HoldId::new(next(&self.inner.seq.hold));
        self.holds.insert(hold.id, hold.clone());
        Ok(hold)
    }

    async fn save_hold(&mut self, hold: &AccountHold) -> Result<()> {
        self.ensure_account_locked(hold.account_id)?;
        self.holds.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn active_hold_for_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<AccountHold>> {
        Ok(self
            .merged_holds(|h| h.transaction_id == transaction_id && h.is_active())
            .into_iter()
            .next())
    }

    async fn active_hold_total(&mut self, account_id: AccountId) -> Result<Decimal> {
        Ok(self
            .merged_holds(|h| h.account_id == account_id && h.is_active())
            .iter()
            .map(|h| h.amount)
            .sum())
    }

    async fn active_limits(
        &mut self,
        account_id: AccountId,
        now: Timestamp,
    ) -> Result<Option<AccountLimits>> {
        let limits = match self.limits.get(&account_id) {
            Some(staged) => staged.clone(),
            None => self.inner.limits.get(&account_id).map(|l| l.clone()),
        };
        Ok(limits.filter(|l| l.is_active(now)))
    }

    async fn save_limits(&mut self, mut limits: AccountLimits) -> Result<AccountLimits> {
        self.ensure_account_locked(limits.account_id)?;
        limits.id = LimitsId::new(next(&self.inner.seq.limits));
        self.limits.insert(limits.account_id, Some(limits.clone()));
        Ok(limits)
    }

    async fn delete_limits(&mut self, account_id: AccountId) -> Result<()> {
        self.ensure_account_locked(account_id)?;
        self.limits.insert(account_id, None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            inner,
            account_guards: _account_guards,
            accounts,
            dirty_accounts,
            transaction_guards: _transaction_guards,
            transactions,
            dirty_transactions,
            journal,
            holds,
            limits,
            ..
        } = *self;

        let _gate = inner.commit_gate.write();

        // A concurrent unit of work may have committed the same code since insert.
        for id in &dirty_transactions {
            let Some(code) = transactions.get(id).and_then(|t| t.auth_code.as_ref()) else {
                continue;
            };
            if let Some(owner) = inner.auth_codes.get(code) {
                if *owner != *id {
                    return Err(LedgerError::DuplicateAuthCode(code.clone()));
                }
            }
        }

        for id in &dirty_accounts {
            if let Some(account) = accounts.get(id) {
                inner.accounts.insert(*id, account.clone());
            }
        }
        for id in &dirty_transactions {
            if let Some(tx) = transactions.get(id) {
                if let Some(code) = &tx.auth_code {
                    inner.auth_codes.insert(code.clone(), *id);
                }
                inner.transactions.insert(*id, tx.clone());
            }
        }
        let entries = journal.len();
        inner.journal.write().extend(journal);
        for (id, hold) in holds {
            inner.holds.insert(id, hold);
        }
        for (account_id, row) in limits {
            match row {
                Some(l) => {
                    inner.limits.insert(account_id, l);
                }
                None => {
                    inner.limits.remove(&account_id);
                }
            }
        }

        debug!(
            accounts = dirty_accounts.len(),
            transactions = dirty_transactions.len(),
            entries,
            "Unit of work committed"
        );
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        Ok(Box::new(MemoryTransaction::new(self.inner.clone())))
    }

    async fn open_account(&self, account_number: &str, opening_balance: Decimal) -> Result<Account> {
        if account_number.trim().is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "account number is required".to_string(),
            ));
        }
        if opening_balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: opening_balance,
            });
        }

        let _gate = self.inner.commit_gate.read();
        match self.inner.account_numbers.entry(account_number.to_string()) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateAccountNumber(
                account_number.to_string(),
            )),
            Entry::Vacant(slot) => {
                let mut account = Account::new(account_number, opening_balance);
                account.id = AccountId::new(next(&self.inner.seq.account));
                self.inner.accounts.insert(account.id, account.clone());
                slot.insert(account.id);
                Ok(account)
            }
        }
    }

    async fn account(&self, id: AccountId) -> Result<Account> {
        self.inner
            .accounts
            .get(&id)
            .map(|a| a.clone())
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
    }

    async fn account_by_number(&self, account_number: &str) -> Result<Account> {
        let id = self.account_id_for_number(account_number)?;
        self.account(id).await
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> =
            self.inner.accounts.iter().map(|a| a.value().clone()).collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn payment_type(&self, name: &str) -> Result<PaymentType> {
        self.inner
            .payment_types
            .get(name)
            .map(|p| p.clone())
            .ok_or_else(|| LedgerError::PaymentTypeNotFound(name.to_string()))
    }

    async fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.inner
            .transactions
            .get(&id)
            .map(|t| t.clone())
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    async fn journal_entry(&self, id: JournalEntryId) -> Result<JournalEntry> {
        self.inner
            .journal
            .read()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(LedgerError::JournalEntryNotFound(id))
    }

    async fn journal_entries_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<JournalEntry>> {
        Ok(self
            .inner
            .journal
            .read()
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn search_journal(&self, filter: &JournalFilter) -> Result<Vec<JournalEntry>> {
        let account = match &filter.account_number {
            Some(number) => Some(self.account_id_for_number(number)?),
            None => None,
        };

        let mut entries: Vec<JournalEntry> = self
            .inner
            .journal
            .read()
            .iter()
            .filter(|e| filter.matches(e, account))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn holds_for_account(&self, account_id: AccountId) -> Result<Vec<AccountHold>> {
        let mut holds: Vec<AccountHold> = self
            .inner
            .holds
            .iter()
            .filter(|h| h.account_id == account_id)
            .map(|h| h.value().clone())
            .collect();
        holds.sort_by_key(|h| h.id);
        Ok(holds)
    }

    async fn expired_holds(&self, now: Timestamp) -> Result<Vec<AccountHold>> {
        let mut holds: Vec<AccountHold> = self
            .inner
            .holds
            .iter()
            .filter(|h| h.is_active() && h.is_expired(now))
            .map(|h| h.value().clone())
            .collect();
        holds.sort_by_key(|h| h.id);
        Ok(holds)
    }

    async fn limits(&self, account_id: AccountId) -> Result<Option<AccountLimits>> {
        Ok(self.inner.limits.get(&account_id).map(|l| l.clone()))
    }

    async fn snapshot(&self, window: &DayWindow) -> Result<LedgerSnapshot> {
        let _gate = self.inner.commit_gate.read();

        let mut accounts: Vec<Account> =
            self.inner.accounts.iter().map(|a| a.value().clone()).collect();
        accounts.sort_by_key(|a| a.id);

        let snapshots: HashMap<AccountId, Timestamp> = accounts
            .iter()
            .filter_map(|a| a.last_reconciled_at.map(|at| (a.id, at)))
            .collect();

        let journal = self.inner.journal.read();
        let mut entry_counts: HashMap<TransactionId, usize> = HashMap::new();
        let mut posted_since_reconciled: HashMap<AccountId, Decimal> = HashMap::new();
        for entry in journal.iter() {
            *entry_counts.entry(entry.transaction_id).or_insert(0) += 1;
            if let Some(since) = snapshots.get(&entry.account_id) {
                if entry.created_at > *since {
                    *posted_since_reconciled
                        .entry(entry.account_id)
                        .or_insert(Decimal::ZERO) += entry.entry_type.balance_effect(entry.amount);
                }
            }
        }
        let mut entries: Vec<JournalEntry> = journal
            .iter()
            .filter(|e| window.contains(e.created_at))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        drop(journal);

        let mut transactions: Vec<Transaction> = self
            .inner
            .transactions
            .iter()
            .filter(|t| window.contains(t.created_at))
            .map(|t| t.value().clone())
            .collect();
        transactions.sort_by_key(|t| t.id);

        let mut active_holds: HashMap<AccountId, Decimal> = HashMap::new();
        let mut active_hold_transactions = HashSet::new();
        for hold in self.inner.holds.iter().filter(|h| h.is_active()) {
            *active_holds.entry(hold.account_id).or_insert(Decimal::ZERO) += hold.amount;
            active_hold_transactions.insert(hold.transaction_id);
        }

        Ok(LedgerSnapshot {
            window: *window,
            accounts,
            entries,
            transactions,
            entry_counts,
            active_holds,
            active_hold_transactions,
            posted_since_reconciled,
        })
    }

    async fn insert_report(&self, mut report: ReconciliationReport) -> Result<ReconciliationReport> {
        report.id = ReportId::new(next(&self.inner.seq.report));
        self.inner.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn save_report(&self, report: &ReconciliationReport) -> Result<()> {
        match self.inner.reports.get_mut(&report.id) {
            Some(mut row) => {
                *row = report.clone();
                Ok(())
            }
            None => Err(LedgerError::ReconciliationNotFound(report.id)),
        }
    }

    async fn report(&self, id: ReportId) -> Result<ReconciliationReport> {
        self.inner
            .reports
            .get(&id)
            .map(|r| r.clone())
            .ok_or(LedgerError::ReconciliationNotFound(id))
    }

    async fn latest_report(&self) -> Result<Option<ReconciliationReport>> {
        Ok(self
            .inner
            .reports
            .iter()
            .max_by_key(|r| *r.key())
            .map(|r| r.value().clone()))
    }

    async fn insert_discrepancy(
        &self,
        mut discrepancy: ReconciliationDiscrepancy,
    ) -> Result<ReconciliationDiscrepancy> {
        if !self.inner.reports.contains_key(&discrepancy.report_id) {
            return Err(LedgerError::ReconciliationNotFound(discrepancy.report_id));
        }
        discrepancy.id = DiscrepancyId::new(next(&self.inner.seq.discrepancy));
        self.inner
            .discrepancies
            .insert(discrepancy.id, discrepancy.clone());
        Ok(discrepancy)
    }

    async fn save_discrepancy(&self, discrepancy: &ReconciliationDiscrepancy) -> Result<()> {
        match self.inner.discrepancies.get_mut(&discrepancy.id) {
            Some(mut row) => {
                *row = discrepancy.clone();
                Ok(())
            }
            None => Err(LedgerError::DiscrepancyNotFound(discrepancy.id)),
        }
    }

    async fn discrepancy(&self, id: DiscrepancyId) -> Result<ReconciliationDiscrepancy> {
        self.inner
            .discrepancies
            .get(&id)
            .map(|d| d.clone())
            .ok_or(LedgerError::DiscrepancyNotFound(id))
    }

    async fn discrepancies_for_report(
        &self,
        report_id: ReportId,
    ) -> Result<Vec<ReconciliationDiscrepancy>> {
        if !self.inner.reports.contains_key(&report_id) {
            return Err(LedgerError::ReconciliationNotFound(report_id));
        }
        let mut rows: Vec<ReconciliationDiscrepancy> = self
            .inner
            .discrepancies
            .iter()
            .filter(|d| d.report_id == report_id)
            .map(|d| d.value().clone())
            .collect();
        rows.sort_by_key(|d| d.id);
        Ok(rows)
    }
}
