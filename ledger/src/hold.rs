//! Fund holds reserved against an account for one authorized transfer.

use corebank_common::{AccountId, HoldId, Timestamp, TransactionId};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why funds are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldType {
    /// Reserved by a transfer authorization.
    TransferAuth,
}

/// Hold status. `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Released,
}

/// A reservation of funds that lowers available balance without moving money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountHold {
    /// Store-assigned identifier.
    pub id: HoldId,
    /// Account the funds are held on.
    pub account_id: AccountId,
    /// Transfer the hold belongs to.
    pub transaction_id: TransactionId,
    /// Hold type.
    pub hold_type: HoldType,
    /// Amount held.
    pub amount: Decimal,
    /// Current status.
    pub status: HoldStatus,
    /// When the hold was placed.
    pub created_at: Timestamp,
    /// When the hold was released.
    pub released_at: Option<Timestamp>,
    /// When the hold lapses.
    pub expires_at: Timestamp,
}

impl AccountHold {
    /// Place a new active hold.
    pub fn new(
        account_id: AccountId,
        transaction_id: TransactionId,
        hold_type: HoldType,
        amount: Decimal,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            id: HoldId::new(0),
            account_id,
            transaction_id,
            hold_type,
            amount,
            status: HoldStatus::Active,
            created_at: Utc::now(),
            released_at: None,
            expires_at,
        }
    }

    /// Check if the hold still reserves funds.
    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// Check if the hold is past its expiry at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }

    /// Release the hold. Returns false if it was already released.
    pub fn release(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = HoldStatus::Released;
        self.released_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_release_is_terminal() {
        let mut hold = AccountHold::new(
            AccountId::new(1),
            TransactionId::new(7),
            HoldType::TransferAuth,
            dec!(500),
            Utc::now() + Duration::hours(24),
        );
        assert!(hold.is_active());

        assert!(hold.release());
        assert_eq!(hold.status, HoldStatus::Released);
        assert!(hold.released_at.is_some());

        assert!(!hold.release());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let hold = AccountHold::new(
            AccountId::new(1),
            TransactionId::new(7),
            HoldType::TransferAuth,
            dec!(1),
            now,
        );
        assert!(!hold.is_expired(now));
        assert!(hold.is_expired(now + Duration::seconds(1)));
    }
}
