//! Severity classification of monetary differences.

use corebank_ledger::Severity;
use rust_decimal::Decimal;

use crate::config::SeverityThresholds;

impl SeverityThresholds {
    /// Classify the absolute size of `amount`.
    ///
    /// Each cutoff is exclusive: a difference equal to `low` is still LOW.
    pub fn classify(&self, amount: Decimal) -> Severity {
        let amount = amount.abs();
        if amount > self.high {
            Severity::Critical
        } else if amount > self.medium {
            Severity::High
        } else if amount > self.low {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}
