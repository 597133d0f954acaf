//! Account balance views.

use corebank_common::{AccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountStatus};

/// Account balance at a point in time, as shown to a customer or operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account identifier.
    pub account_id: AccountId,
    /// Account number.
    pub account_number: String,
    /// Account status.
    pub status: AccountStatus,
    /// Booked balance.
    pub balance: Decimal,
    /// Balance minus active holds.
    pub available_balance: Decimal,
    /// Sum of active holds.
    pub held: Decimal,
    /// Conservative figure while a shadow correction is pending.
    pub customer_available_balance: Decimal,
    /// Pending shadow correction.
    pub pending_correction: Option<Decimal>,
    /// Last-known-good snapshot.
    pub reconciled_balance: Option<Decimal>,
    /// Blocked pending reconciliation review.
    pub reconciliation_blocked: bool,
    /// When the account last changed.
    pub updated_at: Timestamp,
}

impl AccountBalance {
    /// Build the view from an account and its active hold total.
    pub fn of(account: &Account, held: Decimal) -> Self {
        Self {
            account_id: account.id,
            account_number: account.account_number.clone(),
            status: account.status,
            balance: account.balance,
            available_balance: account.available(),
            held,
            customer_available_balance: account.customer_available_balance(),
            pending_correction: account.pending_correction,
            reconciled_balance: account.reconciled_balance,
            reconciliation_blocked: account.reconciliation_blocked,
            updated_at: account.updated_at,
        }
    }

    /// Check `available == balance - held`.
    pub fn is_consistent(&self) -> bool {
        self.available_balance == self.balance - self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_view() {
        let mut account = Account::new("ACC-1", dec!(1000));
        account.refresh_available(dec!(500));

        let view = AccountBalance::of(&account, dec!(500));
        assert_eq!(view.available_balance, dec!(500));
        assert_eq!(view.customer_available_balance, dec!(500));
        assert!(view.is_consistent());

        let stale = AccountBalance::of(&account, dec!(200));
        assert!(!stale.is_consistent());
    }
}
