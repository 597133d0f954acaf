//! Reconciliation configuration.

use std::str::FromStr;

use chrono_tz::Tz;
use corebank_common::DEFAULT_LEDGER_TIMEZONE;
use corebank_ledger::{AccountTier, LimitCaps};
use rust_decimal::Decimal;

/// Pool account used to absorb and fund small corrections.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Account number of the pool.
    pub account_number: String,
    /// Warn when the pool balance drops below this.
    pub low_balance_threshold: Decimal,
    /// Balance the pool is opened with when missing.
    pub opening_balance: Decimal,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            account_number: "RECONCILIATION-POOL".to_string(),
            low_balance_threshold: Decimal::new(1_000_000, 2),
            opening_balance: Decimal::new(10_000_000, 2),
        }
    }
}

/// Monetary cutoffs for severity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityThresholds {
    pub low: Decimal,
    pub medium: Decimal,
    pub high: Decimal,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: Decimal::new(1000, 2),
            medium: Decimal::new(10000, 2),
            high: Decimal::new(100000, 2),
        }
    }
}

/// Caps per restricted tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub tier2: LimitCaps,
    pub tier3: LimitCaps,
    pub tier4: LimitCaps,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            tier2: LimitCaps::new(Decimal::from(5000), Decimal::from(5000), Decimal::from(10000)),
            tier3: LimitCaps::new(Decimal::from(2000), Decimal::from(2000), Decimal::from(5000)),
            tier4: LimitCaps::new(Decimal::from(500), Decimal::from(500), Decimal::from(1000)),
        }
    }
}

impl TierLimits {
    /// Caps for a tier. `None` for tiers without configured caps.
    pub fn caps_for(&self, tier: AccountTier) -> Option<LimitCaps> {
        match tier {
            AccountTier::Tier2Restricted => Some(self.tier2),
            AccountTier::Tier3Limited => Some(self.tier3),
            AccountTier::Tier4Minimal => Some(self.tier4),
            AccountTier::Normal | AccountTier::Tier5Blocked => None,
        }
    }
}

/// Main reconciliation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationConfig {
    /// Pool account.
    pub pool: PoolConfig,
    /// Severity cutoffs.
    pub severity_thresholds: SeverityThresholds,
    /// Soft limits per tier.
    pub tier_limits: TierLimits,
    /// Move LOW discrepancies through the pool instead of only tracking them.
    pub auto_correct_enabled: bool,
    /// Timezone of the reconciliation day window.
    pub timezone: Tz,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            severity_thresholds: SeverityThresholds::default(),
            tier_limits: TierLimits::default(),
            auto_correct_enabled: true,
            timezone: DEFAULT_LEDGER_TIMEZONE,
        }
    }
}

fn env_decimal(name: &str) -> Option<Decimal> {
    std::env::var(name)
        .ok()
        .and_then(|v| Decimal::from_str(v.trim()).ok())
}

impl ReconciliationConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(number) = std::env::var("RECONCILIATION_POOL_ACCOUNT") {
            config.pool.account_number = number;
        }

        if let Some(threshold) = env_decimal("RECONCILIATION_POOL_LOW_BALANCE") {
            config.pool.low_balance_threshold = threshold;
        }

        if let Some(low) = env_decimal("RECONCILIATION_SEVERITY_LOW") {
            config.severity_thresholds.low = low;
        }
        if let Some(medium) = env_decimal("RECONCILIATION_SEVERITY_MEDIUM") {
            config.severity_thresholds.medium = medium;
        }
        if let Some(high) = env_decimal("RECONCILIATION_SEVERITY_HIGH") {
            config.severity_thresholds.high = high;
        }

        if let Ok(flag) = std::env::var("RECONCILIATION_AUTO_CORRECT") {
            if let Ok(flag) = flag.parse() {
                config.auto_correct_enabled = flag;
            }
        }

        for (prefix, caps) in [
            ("RECONCILIATION_TIER2", &mut config.tier_limits.tier2),
            ("RECONCILIATION_TIER3", &mut config.tier_limits.tier3),
            ("RECONCILIATION_TIER4", &mut config.tier_limits.tier4),
        ] {
            if let Some(max) = env_decimal(&format!("{prefix}_MAX_WITHDRAWAL")) {
                caps.max_withdrawal = Some(max);
            }
            if let Some(max) = env_decimal(&format!("{prefix}_MAX_TRANSFER_OUT")) {
                caps.max_transfer_out = Some(max);
            }
            if let Some(limit) = env_decimal(&format!("{prefix}_DAILY_LIMIT")) {
                caps.daily_limit = Some(limit);
            }
        }

        if let Ok(tz) = std::env::var("LEDGER_TIMEZONE") {
            if let Ok(tz) = tz.parse() {
                config.timezone = tz;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool.account_number.trim().is_empty() {
            return Err("Pool account number cannot be empty".to_string());
        }

        let t = &self.severity_thresholds;
        if t.low <= Decimal::ZERO || t.low >= t.medium || t.medium >= t.high {
            return Err("Severity thresholds must satisfy 0 < low < medium < high".to_string());
        }

        for (name, caps) in [
            ("tier2", self.tier_limits.tier2),
            ("tier3", self.tier_limits.tier3),
            ("tier4", self.tier_limits.tier4),
        ] {
            let values = [caps.max_withdrawal, caps.max_transfer_out, caps.daily_limit];
            if values.iter().flatten().any(|v| *v < Decimal::ZERO) {
                return Err(format!("{name} limits cannot be negative"));
            }
        }

        Ok(())
    }
}
