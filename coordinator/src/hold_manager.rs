//! Fund holds for authorized transfers.
//!
//! Every method runs inside the caller's unit of work and expects the
//! account row to be locked already.

use chrono::Duration;
use rust_decimal::Decimal;
use tracing::debug;

use corebank_common::{expires_in, Result, Timestamp, TransactionId};
use corebank_ledger::{Account, AccountHold, HoldType, LedgerStore, LedgerTransaction};

/// Places, releases and sweeps holds, keeping available balance in step.
#[derive(Debug, Clone, Copy)]
pub struct HoldManager {
    ttl: Duration,
}

impl HoldManager {
    /// Create a hold manager whose holds live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Expiry of a hold placed now.
    pub fn expiry(&self) -> Timestamp {
        expires_in(self.ttl)
    }

    /// Reserve `amount` on `account` for `transaction_id`.
    pub async fn place(
        &self,
        tx: &mut dyn LedgerTransaction,
        account: &mut Account,
        transaction_id: TransactionId,
        amount: Decimal,
        expires_at: Timestamp,
    ) -> Result<AccountHold> {
        let hold = tx
            .insert_hold(AccountHold::new(
                account.id,
                transaction_id,
                HoldType::TransferAuth,
                amount,
                expires_at,
            ))
            .await?;
        Self::refresh_available(tx, account).await?;

        debug!(
            hold_id = %hold.id,
            account = %account.account_number,
            amount = %amount,
            expires_at = %expires_at,
            "Hold placed"
        );
        Ok(hold)
    }

    /// Release the active hold of `transaction_id`.
    ///
    /// Returns `None` when the transaction has no active hold. The account's
    /// available balance is not touched; call [`Self::refresh_available`]
    /// once every balance change of the unit of work is applied.
    pub async fn release(
        &self,
        tx: &mut dyn LedgerTransaction,
        transaction_id: TransactionId,
    ) -> Result<Option<AccountHold>> {
        let mut hold = match tx.active_hold_for_transaction(transaction_id).await? {
            Some(hold) => hold,
            None => return Ok(None),
        };
        hold.release();
        tx.save_hold(&hold).await?;

        debug!(hold_id = %hold.id, transaction_id = %transaction_id, "Hold released");
        Ok(Some(hold))
    }

    /// Recompute `available = balance - active holds` and stage the account.
    ///
    /// Returns the active hold total.
    pub async fn refresh_available(
        tx: &mut dyn LedgerTransaction,
        account: &mut Account,
    ) -> Result<Decimal> {
        let held = tx.active_hold_total(account.id).await?;
        account.refresh_available(held);
        tx.save_account(account).await?;
        Ok(held)
    }

    /// Active holds past their expiry at `now`.
    pub async fn expired(&self, store: &dyn LedgerStore, now: Timestamp) -> Result<Vec<AccountHold>> {
        store.expired_holds(now).await
    }
}
