//! Reconciliation report and discrepancy records.

use corebank_common::{DiscrepancyId, ReportId, Timestamp};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Report status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    InProgress,
    Completed,
    CompletedWithDiscrepancies,
    Failed,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub id: ReportId,
    /// Calendar day reconciled, in the ledger timezone.
    pub reconciliation_date: NaiveDate,
    pub status: ReportStatus,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub total_discrepancies: usize,
    /// False when the day's debits and credits differ.
    pub system_balanced: bool,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub error_message: Option<String>,
}

impl ReconciliationReport {
    /// Start a report for `date`.
    pub fn start(date: NaiveDate) -> Self {
        Self {
            id: ReportId::new(0),
            reconciliation_date: date,
            status: ReportStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            total_discrepancies: 0,
            system_balanced: true,
            total_debits: Decimal::ZERO,
            total_credits: Decimal::ZERO,
            error_message: None,
        }
    }

    /// Finish with the final totals.
    pub fn complete(&mut self, total_discrepancies: usize) {
        self.total_discrepancies = total_discrepancies;
        self.status = if total_discrepancies == 0 {
            ReportStatus::Completed
        } else {
            ReportStatus::CompletedWithDiscrepancies
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the run as failed.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ReportStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Kind of discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyType {
    UnbalancedEntries,
    AccountBalanceMismatch,
    MissingJournalEntries,
    AvailableBalanceMismatch,
    OrphanedTransaction,
}

impl DiscrepancyType {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscrepancyType::UnbalancedEntries => "UNBALANCED_ENTRIES",
            DiscrepancyType::AccountBalanceMismatch => "ACCOUNT_BALANCE_MISMATCH",
            DiscrepancyType::MissingJournalEntries => "MISSING_JOURNAL_ENTRIES",
            DiscrepancyType::AvailableBalanceMismatch => "AVAILABLE_BALANCE_MISMATCH",
            DiscrepancyType::OrphanedTransaction => "ORPHANED_TRANSACTION",
        }
    }
}

/// Discrepancy severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What a discrepancy is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    System,
    BankAccount,
    Transaction,
}

/// One finding of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDiscrepancy {
    pub id: DiscrepancyId,
    pub report_id: ReportId,
    pub discrepancy_type: DiscrepancyType,
    pub entity_type: EntityType,
    /// Raw id of the entity. Zero for system-scoped findings.
    pub entity_id: i64,
    /// Expected value as a decimal string, or a free-form marker.
    pub expected_value: String,
    /// Actual value as a decimal string, or `NULL`.
    pub actual_value: String,
    /// Absolute monetary difference, when one applies.
    pub difference: Option<Decimal>,
    pub severity: Severity,
    pub description: String,
    pub auto_corrected: bool,
    pub created_at: Timestamp,
}

impl ReconciliationDiscrepancy {
    /// Build a finding. The store assigns the id and report on insert.
    pub fn new(
        discrepancy_type: DiscrepancyType,
        entity_type: EntityType,
        entity_id: i64,
        expected_value: impl Into<String>,
        actual_value: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: DiscrepancyId::new(0),
            report_id: ReportId::new(0),
            discrepancy_type,
            entity_type,
            entity_id,
            expected_value: expected_value.into(),
            actual_value: actual_value.into(),
            difference: None,
            severity,
            description: description.into(),
            auto_corrected: false,
            created_at: Utc::now(),
        }
    }

    /// Attach the monetary difference.
    pub fn with_difference(mut self, difference: Decimal) -> Self {
        self.difference = Some(difference);
        self
    }

    /// Fields that identify a finding independent of when or where it was stored.
    pub fn fingerprint(&self) -> (DiscrepancyType, EntityType, i64, &str, &str, Severity) {
        (
            self.discrepancy_type,
            self.entity_type,
            self.entity_id,
            &self.expected_value,
            &self.actual_value,
            self.severity,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lifecycle() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let mut report = ReconciliationReport::start(date);
        assert_eq!(report.status, ReportStatus::InProgress);

        report.complete(0);
        assert_eq!(report.status, ReportStatus::Completed);

        let mut report = ReconciliationReport::start(date);
        report.complete(3);
        assert_eq!(report.status, ReportStatus::CompletedWithDiscrepancies);
        assert_eq!(report.total_discrepancies, 3);

        report.fail("store unavailable");
        assert_eq!(report.status, ReportStatus::Failed);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }
}
