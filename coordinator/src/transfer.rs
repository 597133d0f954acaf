//! Transfer protocol: authorize, capture, settle, cancel and hold expiry.
//!
//! An authorization earmarks funds with a hold and moves nothing. Capture
//! debits the source and consumes the hold, settle credits the destination.
//! Each call is its own unit of work under the runner's retry and timeout.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use corebank_common::{
    channel, validate_amount, AccountId, AuthCode, LedgerError, PaymentType, Result, Timestamp,
    Transaction, TransactionStatus,
};
use corebank_ledger::{
    Account, AccountHold, EventPublisher, JournalEntry, LedgerEvent, LedgerTransaction,
    TransactionRunner,
};
use corebank_reconciliation::{GuardedOperation, TransactionGuard};

use crate::hold_manager::HoldManager;

/// Fresh codes tried before a collision is reported.
const AUTH_CODE_ATTEMPTS: u32 = 3;

/// Outcome of one protocol step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// The transfer after the step.
    pub transaction: Transaction,
    /// Account the step touched: the source, or the destination for settle.
    pub account_number: String,
    /// Booked balance of that account.
    pub balance: Decimal,
    /// Available balance of that account.
    pub available_balance: Decimal,
}

impl TransferReceipt {
    fn of(transaction: Transaction, account: &Account) -> Self {
        Self {
            transaction,
            account_number: account.account_number.clone(),
            balance: account.balance,
            available_balance: account.available(),
        }
    }

    /// Authorization code of the transfer.
    pub fn auth_code(&self) -> Option<&AuthCode> {
        self.transaction.auth_code.as_ref()
    }
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySummary {
    /// Holds released and transfers cancelled.
    pub expired: usize,
    /// Holds that could not be processed this time.
    pub failed: usize,
}

/// Runs the transfer state machine.
pub struct TransferEngine {
    runner: TransactionRunner,
    guard: TransactionGuard,
    holds: HoldManager,
    events: EventPublisher,
}

impl TransferEngine {
    pub fn new(
        runner: TransactionRunner,
        guard: TransactionGuard,
        holds: HoldManager,
        events: EventPublisher,
    ) -> Self {
        Self {
            runner,
            guard,
            holds,
            events,
        }
    }

    pub fn holds(&self) -> &HoldManager {
        &self.holds
    }

    /// Earmark `amount` on the source for a later capture.
    ///
    /// `channel` defaults to `API`.
    #[instrument(skip(self, channel_name))]
    pub async fn authorize(
        &self,
        source_number: &str,
        destination_number: &str,
        amount: Decimal,
        channel_name: Option<&str>,
    ) -> Result<TransferReceipt> {
        validate_amount(amount)?;
        if source_number == destination_number {
            return Err(LedgerError::InvalidTransaction(
                "source and destination accounts must differ".to_string(),
            ));
        }
        let channel_name = channel_name.unwrap_or(channel::API);
        let expires_at = self.holds.expiry();

        let mut attempt = 1;
        let (auth_code, receipt) = loop {
            let auth_code = AuthCode::generate();
            let outcome = self
                .authorize_with_code(
                    source_number,
                    destination_number,
                    amount,
                    channel_name,
                    expires_at,
                    &auth_code,
                )
                .await;
            match outcome {
                Err(LedgerError::DuplicateAuthCode(taken)) if attempt < AUTH_CODE_ATTEMPTS => {
                    warn!(auth_code = %taken, attempt, "Authorization code collision, regenerating");
                    attempt += 1;
                }
                outcome => break (auth_code, outcome),
            }
        };

        let (receipt, destination) = receipt?;
        info!(
            auth_code = %auth_code,
            source = %source_number,
            destination = %destination.account_number,
            amount = %amount,
            "Transfer authorized"
        );
        self.events.publish(LedgerEvent::TransferAuthorized {
            auth_code,
            source_account: receipt.account_number.clone(),
            destination_account: destination.account_number,
            amount,
        });
        Ok(receipt)
    }

    /// One authorization attempt under a caller-chosen code.
    async fn authorize_with_code(
        &self,
        source_number: &str,
        destination_number: &str,
        amount: Decimal,
        channel_name: &str,
        expires_at: Timestamp,
        code: &AuthCode,
    ) -> Result<(TransferReceipt, Account)> {
        self.runner
            .run("transfer_authorize", |mut tx| async move {
                let store = self.runner.store();
                let (source, destination, payment_type) = futures::join!(
                    tx.lock_account_by_number(source_number),
                    store.account_by_number(destination_number),
                    store.payment_type(PaymentType::TRANSFER_AUTH),
                );
                let mut source = source?;
                let destination = destination?;
                let payment_type = payment_type?;
                source.ensure_active()?;
                destination.ensure_active()?;

                self.guard
                    .check(tx.as_mut(), &source, GuardedOperation::TransferOut, amount)
                    .await?;

                let available = source.available();
                if available < amount {
                    return Err(LedgerError::InsufficientAvailableBalance {
                        required: amount,
                        available,
                    });
                }

                let transaction = tx
                    .insert_transaction(Transaction::authorized(
                        source.id,
                        destination.id,
                        amount,
                        payment_type.id,
                        channel_name,
                        code.clone(),
                        expires_at,
                    ))
                    .await?;
                self.holds
                    .place(tx.as_mut(), &mut source, transaction.id, amount, expires_at)
                    .await?;

                tx.commit().await?;
                Ok((TransferReceipt::of(transaction, &source), destination))
            })
            .await
    }

    /// Debit the source and consume the hold.
    #[instrument(skip(self, auth_code), fields(auth_code = %auth_code))]
    pub async fn capture(&self, auth_code: &AuthCode) -> Result<TransferReceipt> {
        let receipt = self
            .runner
            .run("transfer_capture", |mut tx| async move {
                let mut transaction = lock_by_code(tx.as_mut(), auth_code).await?;
                match transaction.status {
                    TransactionStatus::Authorized => {}
                    TransactionStatus::Captured | TransactionStatus::Settled => {
                        return Err(LedgerError::TransferAlreadyCaptured(auth_code.clone()));
                    }
                    _ => return Err(LedgerError::AuthorizationNotFound(auth_code.clone())),
                }
                if transaction.is_expired() {
                    return Err(LedgerError::AuthorizationExpired(auth_code.clone()));
                }

                let mut source = tx.lock_account(source_of(&transaction)?).await?;
                TransactionGuard::ensure_not_blocked(&source)?;
                source.ensure_active()?;

                if self.holds.release(tx.as_mut(), transaction.id).await?.is_none() {
                    return Err(LedgerError::AuthorizationNotFound(auth_code.clone()));
                }
                source.debit(transaction.amount)?;
                HoldManager::refresh_available(tx.as_mut(), &mut source).await?;

                transaction.transition_to(TransactionStatus::Captured)?;
                tx.save_transaction(&transaction).await?;
                tx.append_journal_entry(JournalEntry::debit(
                    transaction.id,
                    source.id,
                    transaction.amount,
                    source.balance,
                ))
                .await?;

                tx.commit().await?;
                Ok(TransferReceipt::of(transaction, &source))
            })
            .await?;

        info!(
            source = %receipt.account_number,
            amount = %receipt.transaction.amount,
            balance = %receipt.balance,
            "Transfer captured"
        );
        self.events.publish(LedgerEvent::TransferCaptured {
            auth_code: auth_code.clone(),
            source_account: receipt.account_number.clone(),
            amount: receipt.transaction.amount,
        });
        Ok(receipt)
    }

    /// Credit the destination of a captured transfer.
    #[instrument(skip(self, auth_code), fields(auth_code = %auth_code))]
    pub async fn settle(&self, auth_code: &AuthCode) -> Result<TransferReceipt> {
        let receipt = self
            .runner
            .run("transfer_settle", |mut tx| async move {
                let mut transaction = lock_by_code(tx.as_mut(), auth_code).await?;
                match transaction.status {
                    TransactionStatus::Captured => {}
                    TransactionStatus::Settled => {
                        return Err(LedgerError::TransferAlreadySettled(auth_code.clone()));
                    }
                    from => {
                        return Err(LedgerError::InvalidTransactionStatus {
                            from,
                            to: TransactionStatus::Settled,
                        });
                    }
                }

                let destination_id = transaction.destination_account.ok_or_else(|| {
                    LedgerError::Internal(format!("transfer {} has no destination", transaction.id))
                })?;
                let mut destination = tx.lock_account(destination_id).await?;
                destination.ensure_active()?;

                destination.credit(transaction.amount)?;
                HoldManager::refresh_available(tx.as_mut(), &mut destination).await?;

                transaction.transition_to(TransactionStatus::Settled)?;
                tx.save_transaction(&transaction).await?;
                tx.append_journal_entry(JournalEntry::credit(
                    transaction.id,
                    destination.id,
                    transaction.amount,
                    destination.balance,
                ))
                .await?;

                tx.commit().await?;
                Ok(TransferReceipt::of(transaction, &destination))
            })
            .await?;

        info!(
            destination = %receipt.account_number,
            amount = %receipt.transaction.amount,
            balance = %receipt.balance,
            "Transfer settled"
        );
        self.events.publish(LedgerEvent::TransferSettled {
            auth_code: auth_code.clone(),
            destination_account: receipt.account_number.clone(),
            amount: receipt.transaction.amount,
        });
        Ok(receipt)
    }

    /// Release the hold of an authorized transfer and cancel it.
    #[instrument(skip(self, auth_code), fields(auth_code = %auth_code))]
    pub async fn cancel(&self, auth_code: &AuthCode) -> Result<TransferReceipt> {
        let receipt = self
            .runner
            .run("transfer_cancel", |mut tx| async move {
                let mut transaction = lock_by_code(tx.as_mut(), auth_code).await?;
                let not_cancellable = |from| LedgerError::InvalidTransactionStatus {
                    from,
                    to: TransactionStatus::Cancelled,
                };
                if transaction.status != TransactionStatus::Authorized {
                    return Err(not_cancellable(transaction.status));
                }

                let mut source = tx.lock_account(source_of(&transaction)?).await?;
                if self.holds.release(tx.as_mut(), transaction.id).await?.is_none() {
                    return Err(not_cancellable(transaction.status));
                }
                HoldManager::refresh_available(tx.as_mut(), &mut source).await?;

                transaction.transition_to(TransactionStatus::Cancelled)?;
                tx.save_transaction(&transaction).await?;

                tx.commit().await?;
                Ok(TransferReceipt::of(transaction, &source))
            })
            .await?;

        info!(
            source = %receipt.account_number,
            available = %receipt.available_balance,
            "Transfer cancelled"
        );
        self.events.publish(LedgerEvent::TransferCancelled {
            auth_code: auth_code.clone(),
            source_account: receipt.account_number.clone(),
            amount: receipt.transaction.amount,
        });
        Ok(receipt)
    }

    /// Release every active hold past its expiry and cancel its transfer.
    ///
    /// Each hold is processed in its own unit of work. A failure is logged
    /// and counted, and the sweep moves on.
    #[instrument(skip(self))]
    pub async fn expire_holds(&self) -> Result<ExpirySummary> {
        let now = Utc::now();
        let expired = self.holds.expired(self.runner.store().as_ref(), now).await?;
        if expired.is_empty() {
            debug!("No expired holds");
            return Ok(ExpirySummary::default());
        }

        let mut summary = ExpirySummary::default();
        for hold in &expired {
            match self.expire_one(hold).await {
                Ok(Some(account_number)) => {
                    summary.expired += 1;
                    self.events.publish(LedgerEvent::HoldReleased {
                        transaction_id: hold.transaction_id,
                        account_number,
                        amount: hold.amount,
                    });
                }
                Ok(None) => {
                    debug!(hold_id = %hold.id, "Hold already released");
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        hold_id = %hold.id,
                        transaction_id = %hold.transaction_id,
                        error = %e,
                        "Failed to expire hold"
                    );
                }
            }
        }

        info!(
            expired = summary.expired,
            failed = summary.failed,
            "Hold expiry sweep finished"
        );
        Ok(summary)
    }

    /// Returns the account number on success, `None` if the hold was
    /// released concurrently.
    async fn expire_one(&self, hold: &AccountHold) -> Result<Option<String>> {
        let transaction_id = hold.transaction_id;
        let account_id = hold.account_id;
        self.runner
            .run("hold_expire", |mut tx| async move {
                let mut transaction = tx.lock_transaction(transaction_id).await?;
                let mut account = tx.lock_account(account_id).await?;

                if self.holds.release(tx.as_mut(), transaction_id).await?.is_none() {
                    return Ok(None);
                }
                HoldManager::refresh_available(tx.as_mut(), &mut account).await?;

                if transaction.status == TransactionStatus::Authorized {
                    transaction.transition_to(TransactionStatus::Cancelled)?;
                    tx.save_transaction(&transaction).await?;
                }

                tx.commit().await?;
                Ok(Some(account.account_number))
            })
            .await
    }
}

async fn lock_by_code(tx: &mut dyn LedgerTransaction, auth_code: &AuthCode) -> Result<Transaction> {
    tx.lock_transaction_by_auth_code(auth_code)
        .await?
        .ok_or_else(|| LedgerError::AuthorizationNotFound(auth_code.clone()))
}

fn source_of(transaction: &Transaction) -> Result<AccountId> {
    transaction
        .source_account
        .ok_or_else(|| LedgerError::Internal(format!("transfer {} has no source", transaction.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use corebank_common::{RetryPolicy, DEFAULT_LEDGER_TIMEZONE};
    use corebank_ledger::{
        EntryType, HoldStatus, InMemoryLedgerStore, JournalFilter, LedgerStore,
    };
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        engine: TransferEngine,
        events: tokio::sync::mpsc::UnboundedReceiver<LedgerEvent>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.open_account("A", dec!(1000)).await.unwrap();
        store.open_account("B", dec!(0)).await.unwrap();
        let (publisher, events) = EventPublisher::channel();
        let engine = TransferEngine::new(
            TransactionRunner::new(store.clone(), RetryPolicy::default()),
            TransactionGuard::new(DEFAULT_LEDGER_TIMEZONE),
            HoldManager::new(Duration::hours(24)),
            publisher,
        );
        Fixture {
            store,
            engine,
            events,
        }
    }

    #[tokio::test]
    async fn test_taken_auth_code_leaves_no_trace() {
        let f = fixture().await;
        let auth = f.engine.authorize("A", "B", dec!(300), None).await.unwrap();
        let code = auth.auth_code().unwrap().clone();

        let err = f
            .engine
            .authorize_with_code("A", "B", dec!(100), channel::API, f.engine.holds().expiry(), &code)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateAuthCode(code.clone()));

        let a = f.store.account_by_number("A").await.unwrap();
        assert_eq!(a.available_balance, Some(dec!(700)));
        assert_eq!(f.store.holds_for_account(a.id).await.unwrap().len(), 1);

        // The code still resolves to the first authorization.
        let captured = f.engine.capture(&code).await.unwrap();
        assert_eq!(captured.transaction.id, auth.transaction.id);
        assert_eq!(captured.balance, dec!(700));
    }

    #[tokio::test]
    async fn test_authorize_capture_settle() {
        let mut f = fixture().await;

        let auth = f.engine.authorize("A", "B", dec!(500), None).await.unwrap();
        let code = auth.auth_code().unwrap().clone();
        assert!(code.as_str().starts_with(AuthCode::PREFIX));
        assert_eq!(auth.transaction.status, TransactionStatus::Authorized);
        assert_eq!(auth.transaction.channel, channel::API);
        assert_eq!(auth.balance, dec!(1000));
        assert_eq!(auth.available_balance, dec!(500));

        let a = f.store.account_by_number("A").await.unwrap();
        let holds = f.store.holds_for_account(a.id).await.unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].status, HoldStatus::Active);
        assert_eq!(holds[0].amount, dec!(500));

        let captured = f.engine.capture(&code).await.unwrap();
        assert_eq!(captured.transaction.status, TransactionStatus::Captured);
        assert!(captured.transaction.captured_at.is_some());
        assert_eq!(captured.balance, dec!(500));
        assert_eq!(captured.available_balance, dec!(500));
        let holds = f.store.holds_for_account(a.id).await.unwrap();
        assert_eq!(holds[0].status, HoldStatus::Released);

        let settled = f.engine.settle(&code).await.unwrap();
        assert_eq!(settled.transaction.status, TransactionStatus::Settled);
        assert_eq!(settled.account_number, "B");
        assert_eq!(settled.balance, dec!(500));
        assert_eq!(settled.available_balance, dec!(500));

        let entries = f
            .store
            .journal_entries_for_transaction(settled.transaction.id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::Debit);
        assert_eq!(entries[1].entry_type, EntryType::Credit);

        let names: Vec<&str> = std::iter::from_fn(|| f.events.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(
            names,
            vec!["transfer_authorized", "transfer_captured", "transfer_settled"]
        );
    }

    #[tokio::test]
    async fn test_illegal_transitions() {
        let f = fixture().await;
        let auth = f.engine.authorize("A", "B", dec!(100), None).await.unwrap();
        let code = auth.auth_code().unwrap().clone();

        let err = f.engine.settle(&code).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransactionStatus { .. }));

        f.engine.capture(&code).await.unwrap();
        assert_eq!(
            f.engine.capture(&code).await.unwrap_err(),
            LedgerError::TransferAlreadyCaptured(code.clone())
        );
        assert!(matches!(
            f.engine.cancel(&code).await.unwrap_err(),
            LedgerError::InvalidTransactionStatus { .. }
        ));

        f.engine.settle(&code).await.unwrap();
        assert_eq!(
            f.engine.settle(&code).await.unwrap_err(),
            LedgerError::TransferAlreadySettled(code.clone())
        );
        assert_eq!(
            f.engine.capture(&code).await.unwrap_err(),
            LedgerError::TransferAlreadyCaptured(code)
        );

        let unknown = AuthCode::new("AUTH-NOPE0000");
        assert_eq!(
            f.engine.capture(&unknown).await.unwrap_err(),
            LedgerError::AuthorizationNotFound(unknown)
        );
    }

    #[tokio::test]
    async fn test_authorize_validation() {
        let f = fixture().await;

        assert!(matches!(
            f.engine.authorize("A", "B", dec!(0), None).await,
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            f.engine.authorize("A", "A", dec!(1), None).await,
            Err(LedgerError::InvalidTransaction(_))
        ));
        assert!(matches!(
            f.engine.authorize("A", "NOPE", dec!(1), None).await,
            Err(LedgerError::AccountNotFound(_))
        ));

        f.engine.authorize("A", "B", dec!(600), None).await.unwrap();
        assert_eq!(
            f.engine.authorize("A", "B", dec!(500), None).await.unwrap_err(),
            LedgerError::InsufficientAvailableBalance {
                required: dec!(500),
                available: dec!(400)
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_restores_available() {
        let f = fixture().await;
        let auth = f.engine.authorize("A", "B", dec!(300), Some("MOBILE")).await.unwrap();
        let code = auth.auth_code().unwrap().clone();
        assert_eq!(auth.transaction.channel, "MOBILE");

        let cancelled = f.engine.cancel(&code).await.unwrap();
        assert_eq!(cancelled.transaction.status, TransactionStatus::Cancelled);
        assert_eq!(cancelled.available_balance, dec!(1000));

        assert_eq!(
            f.engine.capture(&code).await.unwrap_err(),
            LedgerError::AuthorizationNotFound(code)
        );
        let debits = JournalFilter {
            entry_type: Some(EntryType::Debit),
            ..Default::default()
        };
        assert!(f.store.search_journal(&debits).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capture_after_expiry() {
        let f = fixture().await;
        let auth = f.engine.authorize("A", "B", dec!(100), None).await.unwrap();
        let code = auth.auth_code().unwrap().clone();

        let mut lapsed = auth.transaction.clone();
        lapsed.expires_at = Some(Utc::now() - Duration::seconds(1));
        let mut tx = f.store.begin().await.unwrap();
        tx.lock_transaction(lapsed.id).await.unwrap();
        tx.save_transaction(&lapsed).await.unwrap();
        tx.commit().await.unwrap();

        assert!(lapsed.is_expired());
        assert_eq!(
            f.engine.capture(&code).await.unwrap_err(),
            LedgerError::AuthorizationExpired(code)
        );
    }

    #[tokio::test]
    async fn test_expire_holds_sweep() {
        let mut f = fixture().await;
        let a = f.store.account_by_number("A").await.unwrap();

        // Lapsed authorization placed straight through the store.
        let transaction = f.store.force_insert_transaction(Transaction::authorized(
            a.id,
            f.store.account_by_number("B").await.unwrap().id,
            dec!(250),
            corebank_common::PaymentTypeId::new(3),
            channel::API,
            AuthCode::generate(),
            Utc::now() - Duration::seconds(1),
        ))
        .unwrap();
        let mut tx = f.store.begin().await.unwrap();
        let mut acc = tx.lock_account(a.id).await.unwrap();
        f.engine
            .holds()
            .place(
                tx.as_mut(),
                &mut acc,
                transaction.id,
                dec!(250),
                Utc::now() - Duration::seconds(1),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        f.engine.authorize("A", "B", dec!(100), None).await.unwrap();
        assert_eq!(
            f.store.account(a.id).await.unwrap().available_balance,
            Some(dec!(650))
        );
        while f.events.try_recv().is_ok() {}

        let summary = f.engine.expire_holds().await.unwrap();
        assert_eq!(summary, ExpirySummary { expired: 1, failed: 0 });
        assert_eq!(
            f.store.transaction(transaction.id).await.unwrap().status,
            TransactionStatus::Cancelled
        );
        assert_eq!(
            f.store.account(a.id).await.unwrap().available_balance,
            Some(dec!(900))
        );
        assert_eq!(f.events.try_recv().unwrap().name(), "hold_released");

        let again = f.engine.expire_holds().await.unwrap();
        assert_eq!(again, ExpirySummary::default());
    }

    #[tokio::test]
    async fn test_blocked_source_cannot_capture() {
        let f = fixture().await;
        let auth = f.engine.authorize("A", "B", dec!(100), None).await.unwrap();
        let code = auth.auth_code().unwrap().clone();

        let mut a = f.store.account_by_number("A").await.unwrap();
        a.reconciliation_blocked = true;
        f.store.force_update_account(a).unwrap();

        assert!(matches!(
            f.engine.capture(&code).await,
            Err(LedgerError::AccountReconciliationBlocked(_))
        ));
        assert!(matches!(
            f.engine.authorize("A", "B", dec!(1), None).await,
            Err(LedgerError::AccountReconciliationBlocked(_))
        ));
        // Cancel only releases funds.
        f.engine.cancel(&code).await.unwrap();
    }
}
