//! Cash in and cash out.
//!
//! Deposits and withdrawals are single-entry: one CREDIT or DEBIT on the
//! customer account, no counter-leg.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use corebank_common::{
    channel, validate_amount, LedgerError, PaymentType, Result, Transaction, TransactionId,
};
use corebank_ledger::{EventPublisher, JournalEntry, LedgerEvent, TransactionRunner};
use corebank_reconciliation::{GuardedOperation, TransactionGuard};

use crate::hold_manager::HoldManager;

/// Outcome of a deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashReceipt {
    pub transaction_id: TransactionId,
    pub account_number: String,
    pub amount: Decimal,
    /// Booked balance after the operation.
    pub balance: Decimal,
    pub available_balance: Decimal,
}

/// Deposit/withdrawal engine.
pub struct CashEngine {
    runner: TransactionRunner,
    guard: TransactionGuard,
    events: EventPublisher,
}

impl CashEngine {
    pub fn new(runner: TransactionRunner, guard: TransactionGuard, events: EventPublisher) -> Self {
        Self {
            runner,
            guard,
            events,
        }
    }

    #[instrument(skip(self))]
    pub async fn deposit(&self, account_number: &str, amount: Decimal) -> Result<CashReceipt> {
        validate_amount(amount)?;

        let receipt = self
            .runner
            .run("deposit", |mut tx| async move {
                let store = self.runner.store();
                let (account, payment_type) = futures::join!(
                    tx.lock_account_by_number(account_number),
                    store.payment_type(PaymentType::DEPOSIT),
                );
                let mut account = account?;
                let payment_type = payment_type?;
                account.ensure_active()?;
                self.guard
                    .check(tx.as_mut(), &account, GuardedOperation::Deposit, amount)
                    .await?;

                account.credit(amount)?;
                HoldManager::refresh_available(tx.as_mut(), &mut account).await?;

                let transaction = tx
                    .insert_transaction(Transaction::completed(
                        None,
                        Some(account.id),
                        amount,
                        payment_type.id,
                        channel::ATM,
                    ))
                    .await?;
                tx.append_journal_entry(JournalEntry::credit(
                    transaction.id,
                    account.id,
                    amount,
                    account.balance,
                ))
                .await?;

                tx.commit().await?;
                Ok(CashReceipt {
                    transaction_id: transaction.id,
                    account_number: account.account_number.clone(),
                    amount,
                    balance: account.balance,
                    available_balance: account.available(),
                })
            })
            .await?;

        info!(balance = %receipt.balance, "Deposit completed");
        self.events.publish(LedgerEvent::DepositSucceeded {
            account_number: receipt.account_number.clone(),
            transaction_id: receipt.transaction_id,
            amount,
            balance: receipt.balance,
        });
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn withdraw(&self, account_number: &str, amount: Decimal) -> Result<CashReceipt> {
        validate_amount(amount)?;

        let receipt = self
            .runner
            .run("withdraw", |mut tx| async move {
                let store = self.runner.store();
                let (account, payment_type) = futures::join!(
                    tx.lock_account_by_number(account_number),
                    store.payment_type(PaymentType::WITHDRAWAL),
                );
                let mut account = account?;
                let payment_type = payment_type?;
                account.ensure_active()?;
                self.guard
                    .check(tx.as_mut(), &account, GuardedOperation::Withdrawal, amount)
                    .await?;

                if account.balance < amount {
                    return Err(LedgerError::BalanceInsufficient {
                        required: amount,
                        balance: account.balance,
                    });
                }
                let available = account.available();
                if available < amount {
                    return Err(LedgerError::InsufficientAvailableBalance {
                        required: amount,
                        available,
                    });
                }

                account.debit(amount)?;
                HoldManager::refresh_available(tx.as_mut(), &mut account).await?;

                let transaction = tx
                    .insert_transaction(Transaction::completed(
                        Some(account.id),
                        None,
                        amount,
                        payment_type.id,
                        channel::ATM,
                    ))
                    .await?;
                tx.append_journal_entry(JournalEntry::debit(
                    transaction.id,
                    account.id,
                    amount,
                    account.balance,
                ))
                .await?;

                tx.commit().await?;
                Ok(CashReceipt {
                    transaction_id: transaction.id,
                    account_number: account.account_number.clone(),
                    amount,
                    balance: account.balance,
                    available_balance: account.available(),
                })
            })
            .await?;

        info!(balance = %receipt.balance, "Withdrawal completed");
        self.events.publish(LedgerEvent::WithdrawalSucceeded {
            account_number: receipt.account_number.clone(),
            transaction_id: receipt.transaction_id,
            amount,
            balance: receipt.balance,
        });
        Ok(receipt)
    }
}
