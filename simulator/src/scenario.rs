//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// Workload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Random transfers, cancels, deposits and withdrawals across all accounts.
    Mixed,
    /// Every worker debits the same hot account.
    Contention,
    /// Mixed workload, then balances corrupted behind the ledger's back.
    Drift,
}

/// A balance corruption applied directly through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftInjection {
    /// Index into the simulated accounts.
    pub account: usize,
    /// Amount in minor units added to balance and available balance.
    pub delta_cents: i64,
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "mixed" => Ok(Self::Mixed),
            "contention" => Ok(Self::Contention),
            "drift" => Ok(Self::Drift),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Mixed => "mixed",
            Scenario::Contention => "contention",
            Scenario::Drift => "drift",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::Mixed => "Random transfer lifecycles and cash operations",
            Scenario::Contention => "All workers hammer one hot account",
            Scenario::Drift => "Corrupt balances, then let reconciliation respond",
        }
    }

    /// Whether the workload concentrates on the first account.
    pub fn hot_account(&self) -> bool {
        matches!(self, Scenario::Contention)
    }

    /// Corruptions applied after the workload: one small enough to be
    /// auto-corrected, one large enough to restrict the account, one that
    /// blocks it.
    pub fn drift(&self) -> Vec<DriftInjection> {
        match self {
            Scenario::Drift => vec![
                DriftInjection {
                    account: 0,
                    delta_cents: 500,
                },
                DriftInjection {
                    account: 1,
                    delta_cents: -25_000,
                },
                DriftInjection {
                    account: 2,
                    delta_cents: 250_000,
                },
            ],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_by_name() {
        assert_eq!(Scenario::load("contention").unwrap(), Scenario::Contention);
        assert_eq!(Scenario::load("drift").unwrap().name(), "drift");
        assert!(Scenario::load("high-volume").is_err());
        assert!(Scenario::Mixed.drift().is_empty());
        assert_eq!(Scenario::Drift.drift().len(), 3);
    }
}
