//! Journal engine: manual double-entry postings and their reversals.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use corebank_common::{
    channel, constants, AccountId, JournalEntryId, LedgerError, PaymentType, Result, Transaction,
    TransactionId,
};

use crate::account::Account;
use crate::audit::{actions, AuditLog, AuditRecord};
use crate::journal::{EntryType, JournalBatch, JournalEntry, JournalFilter, PostingLine};
use crate::runner::TransactionRunner;
use crate::store::LedgerTransaction;

/// Result of a posting or reversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedJournal {
    /// The transaction that owns the entries.
    pub transaction: Transaction,
    /// Entries in posting order.
    pub entries: Vec<JournalEntry>,
}

/// Validates and posts balanced journal entries.
pub struct JournalEngine {
    runner: TransactionRunner,
    audit: Arc<dyn AuditLog>,
}

impl JournalEngine {
    /// Create a journal engine. Postings run under the journal timeout.
    pub fn new(runner: TransactionRunner, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            runner: runner.with_timeout(constants::journal_timeout()),
            audit,
        }
    }

    /// Post a balanced set of lines as one COMPLETED transaction.
    ///
    /// All-or-nothing: if any debit would drive its account negative,
    /// nothing is posted.
    #[instrument(skip(self, lines, created_by), fields(lines = lines.len()))]
    pub async fn post(
        &self,
        lines: Vec<PostingLine>,
        reason: &str,
        created_by: Option<String>,
    ) -> Result<PostedJournal> {
        let batch = JournalBatch::validate(lines)?;
        let store = self.runner.store();

        let mut ids: BTreeMap<&str, AccountId> = BTreeMap::new();
        for line in batch.lines() {
            let account = store.account_by_number(&line.account_number).await?;
            ids.insert(line.account_number.as_str(), account.id);
        }
        let lock_order = sorted_ids(ids.values().copied());
        let payment_type = store.payment_type(PaymentType::MANUAL_ADJUSTMENT).await?.id;
        let total = batch.total_debits();

        let (batch, ids, lock_order, created_by) = (&batch, &ids, &lock_order, &created_by);
        let posted = self
            .runner
            .run("journal_post", |mut tx| async move {
                let mut accounts = lock_accounts(tx.as_mut(), lock_order).await?;

                let transaction = tx
                    .insert_transaction(
                        Transaction::completed(None, None, total, payment_type, channel::MANUAL)
                            .with_info(reason)
                            .with_created_by(created_by.clone()),
                    )
                    .await?;

                let mut entries = Vec::with_capacity(batch.lines().len());
                for line in batch.lines() {
                    let account_id = ids
                        .get(line.account_number.as_str())
                        .copied()
                        .ok_or_else(|| LedgerError::AccountNotFound(line.account_number.clone()))?;
                    let entry =
                        apply_line(&mut accounts, account_id, line.entry_type, line.amount, transaction.id)?;
                    entries.push(tx.append_journal_entry(entry).await?);
                }

                save_accounts(tx.as_mut(), &mut accounts, lock_order).await?;
                tx.commit().await?;
                Ok(PostedJournal {
                    transaction,
                    entries,
                })
            })
            .await?;

        self.audit
            .record(
                AuditRecord::new(
                    actions::MANUAL_JOURNAL_ENTRY_CREATED,
                    "TRANSACTION",
                    posted.transaction.id.value(),
                    json!({
                        "reason": reason,
                        "total": total,
                        "entries": posted.entries.len(),
                    }),
                )
                .by(created_by.clone()),
            )
            .await;

        info!(
            transaction_id = %posted.transaction.id,
            total = %total,
            entries = posted.entries.len(),
            "Manual journal entry posted"
        );

        Ok(posted)
    }

    /// Post the inverse of every entry of `transaction_id`.
    #[instrument(skip(self, created_by))]
    pub async fn reverse(
        &self,
        transaction_id: TransactionId,
        reason: &str,
        created_by: Option<String>,
    ) -> Result<PostedJournal> {
        let store = self.runner.store();
        let original_entries = store.journal_entries_for_transaction(transaction_id).await?;
        if original_entries.is_empty() {
            return Err(LedgerError::InvalidJournalEntry(format!(
                "transaction {transaction_id} has no journal entries"
            )));
        }
        let lock_order = sorted_ids(original_entries.iter().map(|e| e.account_id));
        let payment_type = store.payment_type(PaymentType::MANUAL_REVERSAL).await?.id;
        let info = format!("Reversal of transaction {transaction_id}: {reason}");

        let (original_entries, lock_order, created_by, info) =
            (&original_entries, &lock_order, &created_by, &info);
        let posted = self
            .runner
            .run("journal_reverse", |mut tx| async move {
                let original = tx.lock_transaction(transaction_id).await?;
                if tx.has_reversal(transaction_id).await? {
                    return Err(LedgerError::TransactionAlreadyReversed(transaction_id));
                }

                let mut accounts = lock_accounts(tx.as_mut(), lock_order).await?;

                let reversal = tx
                    .insert_transaction(
                        Transaction::completed(
                            None,
                            None,
                            original.amount,
                            payment_type,
                            channel::MANUAL_REVERSAL,
                        )
                        .with_info(info.clone())
                        .with_created_by(created_by.clone())
                        .with_reversal_of(transaction_id),
                    )
                    .await?;

                let mut entries = Vec::with_capacity(original_entries.len());
                for entry in original_entries {
                    let inverse = apply_line(
                        &mut accounts,
                        entry.account_id,
                        entry.entry_type.inverse(),
                        entry.amount,
                        reversal.id,
                    )?;
                    entries.push(tx.append_journal_entry(inverse).await?);
                }

                save_accounts(tx.as_mut(), &mut accounts, lock_order).await?;
                tx.commit().await?;
                Ok(PostedJournal {
                    transaction: reversal,
                    entries,
                })
            })
            .await?;

        self.audit
            .record(
                AuditRecord::new(
                    actions::MANUAL_JOURNAL_ENTRY_REVERSAL,
                    "TRANSACTION",
                    transaction_id.value(),
                    json!({
                        "reason": reason,
                        "reversal_transaction_id": posted.transaction.id,
                    }),
                )
                .by(created_by.clone()),
            )
            .await;

        info!(
            original = %transaction_id,
            reversal = %posted.transaction.id,
            "Journal entry reversed"
        );

        Ok(posted)
    }

    /// Get one journal entry.
    pub async fn journal_entry(&self, id: JournalEntryId) -> Result<JournalEntry> {
        self.runner.store().journal_entry(id).await
    }

    /// Search journal entries.
    pub async fn search(&self, filter: &JournalFilter) -> Result<Vec<JournalEntry>> {
        self.runner.store().search_journal(filter).await
    }
}

fn sorted_ids(ids: impl Iterator<Item = AccountId>) -> Vec<AccountId> {
    let mut ids: Vec<AccountId> = ids.collect();
    ids.sort();
    ids.dedup();
    ids
}

async fn lock_accounts(
    tx: &mut dyn LedgerTransaction,
    lock_order: &[AccountId],
) -> Result<HashMap<AccountId, Account>> {
    let mut accounts = HashMap::with_capacity(lock_order.len());
    for id in lock_order {
        let account = tx.lock_account(*id).await?;
        account.ensure_active()?;
        accounts.insert(*id, account);
    }
    Ok(accounts)
}

fn apply_line(
    accounts: &mut HashMap<AccountId, Account>,
    account_id: AccountId,
    entry_type: EntryType,
    amount: Decimal,
    transaction_id: TransactionId,
) -> Result<JournalEntry> {
    let account = accounts
        .get_mut(&account_id)
        .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
    if let Err(e) = account.apply(entry_type, amount) {
        warn!(account = %account.account_number, amount = %amount, "Posting would overdraw account");
        return Err(e);
    }
    Ok(JournalEntry::of_type(
        entry_type,
        transaction_id,
        account_id,
        amount,
        account.balance,
    ))
}

async fn save_accounts(
    tx: &mut dyn LedgerTransaction,
    accounts: &mut HashMap<AccountId, Account>,
    lock_order: &[AccountId],
) -> Result<()> {
    for id in lock_order {
        let held = tx.active_hold_total(*id).await?;
        if let Some(account) = accounts.get_mut(id) {
            account.refresh_available(held);
            tx.save_account(account).await?;
        }
    }
    Ok(())
}
