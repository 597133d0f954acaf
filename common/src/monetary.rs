//! Monetary helpers.
//!
//! The ledger is single-currency; amounts are plain [`Decimal`] values
//! carried at two decimal places.

use rust_decimal::Decimal;

use crate::{LedgerError, Result};

/// Decimal places used for stored amounts.
pub const MONEY_SCALE: u32 = 2;

/// Largest amount a single operation may move, in whole units.
pub const MAX_AMOUNT_UNITS: i64 = 1_000_000_000_000_000;

/// Validate that an amount is strictly positive and within [`MAX_AMOUNT_UNITS`].
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO || amount > Decimal::from(MAX_AMOUNT_UNITS) {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(amount)
}

/// Round to the stored scale using banker's rounding.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp(MONEY_SCALE)
}

/// Format an amount at the stored scale, e.g. `1000` renders as `1000.00`.
pub fn format_money(amount: Decimal) -> String {
    let mut rounded = round_money(amount);
    rounded.rescale(MONEY_SCALE);
    rounded.to_string()
}
