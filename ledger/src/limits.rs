//! Soft transaction limits applied to flagged accounts.

use corebank_common::{AccountId, LimitsId, Timestamp};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Limit tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountTier {
    Normal,
    #[serde(rename = "TIER_2_RESTRICTED")]
    Tier2Restricted,
    #[serde(rename = "TIER_3_LIMITED")]
    Tier3Limited,
    #[serde(rename = "TIER_4_MINIMAL")]
    Tier4Minimal,
    #[serde(rename = "TIER_5_BLOCKED")]
    Tier5Blocked,
}

/// Per-operation caps. `None` means uncapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitCaps {
    pub max_withdrawal: Option<Decimal>,
    pub max_transfer_out: Option<Decimal>,
    pub daily_limit: Option<Decimal>,
}

impl LimitCaps {
    /// Caps with every field set.
    pub fn new(max_withdrawal: Decimal, max_transfer_out: Decimal, daily_limit: Decimal) -> Self {
        Self {
            max_withdrawal: Some(max_withdrawal),
            max_transfer_out: Some(max_transfer_out),
            daily_limit: Some(daily_limit),
        }
    }
}

/// The limits row for an account. At most one per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLimits {
    pub id: LimitsId,
    pub account_id: AccountId,
    pub tier: AccountTier,
    pub caps: LimitCaps,
    pub reason: String,
    pub applied_at: Timestamp,
    /// `None` means the limits apply until removed.
    pub expires_at: Option<Timestamp>,
}

impl AccountLimits {
    /// Build a limits row for an account.
    pub fn new(
        account_id: AccountId,
        tier: AccountTier,
        caps: LimitCaps,
        reason: impl Into<String>,
        expires_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id: LimitsId::new(0),
            account_id,
            tier,
            caps,
            reason: reason.into(),
            applied_at: Utc::now(),
            expires_at,
        }
    }

    /// Check whether the limits are in force at `now`.
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_indefinite_and_expired_limits() {
        let now = Utc::now();
        let caps = LimitCaps::new(dec!(2000), dec!(2000), dec!(5000));

        let indefinite =
            AccountLimits::new(AccountId::new(1), AccountTier::Tier3Limited, caps, "drift", None);
        assert!(indefinite.is_active(now + Duration::days(365)));

        let lapsed = AccountLimits::new(
            AccountId::new(1),
            AccountTier::Tier2Restricted,
            caps,
            "review",
            Some(now - Duration::minutes(1)),
        );
        assert!(!lapsed.is_active(now));
    }

    #[test]
    fn test_tier_wire_names() {
        let json = serde_json::to_string(&AccountTier::Tier4Minimal).unwrap();
        assert_eq!(json, "\"TIER_4_MINIMAL\"");
    }
}
