//! Metrics collection for service monitoring.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

const KINDS: usize = 8;

/// Request-facing operation kinds that are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdrawal,
    Authorize,
    Capture,
    Settle,
    Cancel,
    JournalPost,
    JournalReverse,
}

impl OperationKind {
    pub const ALL: [OperationKind; KINDS] = [
        OperationKind::Deposit,
        OperationKind::Withdrawal,
        OperationKind::Authorize,
        OperationKind::Capture,
        OperationKind::Settle,
        OperationKind::Cancel,
        OperationKind::JournalPost,
        OperationKind::JournalReverse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdrawal => "withdrawal",
            OperationKind::Authorize => "authorize",
            OperationKind::Capture => "capture",
            OperationKind::Settle => "settle",
            OperationKind::Cancel => "cancel",
            OperationKind::JournalPost => "journal_post",
            OperationKind::JournalReverse => "journal_reverse",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Service metrics.
pub struct Metrics {
    succeeded: [AtomicU64; KINDS],
    failed: [AtomicU64; KINDS],
    /// Holds released by the expiry sweep.
    pub holds_expired: AtomicU64,
    /// Completed reconciliation runs.
    pub reconciliation_runs: AtomicU64,
    /// Reconciliation runs that failed.
    pub reconciliation_failures: AtomicU64,
    /// Discrepancies found across all runs.
    pub discrepancies_found: AtomicU64,
    /// Notifications delivered across all channels.
    pub notifications_sent: AtomicU64,
    /// Notification deliveries that failed.
    pub notifications_failed: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            succeeded: std::array::from_fn(|_| AtomicU64::new(0)),
            failed: std::array::from_fn(|_| AtomicU64::new(0)),
            holds_expired: AtomicU64::new(0),
            reconciliation_runs: AtomicU64::new(0),
            reconciliation_failures: AtomicU64::new(0),
            discrepancies_found: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
        }
    }

    /// Record the outcome of an operation.
    pub fn record<T, E>(&self, kind: OperationKind, outcome: &Result<T, E>) {
        let counters = if outcome.is_ok() {
            &self.succeeded
        } else {
            &self.failed
        };
        counters[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record holds released by one sweep.
    pub fn record_expired_holds(&self, count: usize) {
        self.holds_expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a finished reconciliation run.
    pub fn reconciliation_completed(&self, discrepancies: usize) {
        self.reconciliation_runs.fetch_add(1, Ordering::Relaxed);
        self.discrepancies_found
            .fetch_add(discrepancies as u64, Ordering::Relaxed);
    }

    /// Record a failed reconciliation run.
    pub fn reconciliation_failed(&self) {
        self.reconciliation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one notification delivery attempt.
    pub fn notification(&self, delivered: bool) {
        if delivered {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot.
    ///
    /// `lock_conflicts` comes from the transaction runner, which owns that counter.
    pub fn snapshot(&self, lock_conflicts: u64) -> MetricsSnapshot {
        let operations = OperationKind::ALL
            .iter()
            .map(|kind| OperationCounts {
                operation: *kind,
                succeeded: self.succeeded[kind.index()].load(Ordering::Relaxed),
                failed: self.failed[kind.index()].load(Ordering::Relaxed),
            })
            .collect();

        MetricsSnapshot {
            operations,
            lock_conflicts,
            holds_expired: self.holds_expired.load(Ordering::Relaxed),
            reconciliation_runs: self.reconciliation_runs.load(Ordering::Relaxed),
            reconciliation_failures: self.reconciliation_failures.load(Ordering::Relaxed),
            discrepancies_found: self.discrepancies_found.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Success and failure counts of one operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    pub operation: OperationKind,
    pub succeeded: u64,
    pub failed: u64,
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub operations: Vec<OperationCounts>,
    pub lock_conflicts: u64,
    pub holds_expired: u64,
    pub reconciliation_runs: u64,
    pub reconciliation_failures: u64,
    pub discrepancies_found: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
}

impl MetricsSnapshot {
    /// Counts for one operation kind.
    pub fn operation(&self, kind: OperationKind) -> Option<&OperationCounts> {
        self.operations.iter().find(|c| c.operation == kind)
    }

    /// Export in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP corebank_operations_total Request-facing operations by outcome\n");
        out.push_str("# TYPE corebank_operations_total counter\n");
        for counts in &self.operations {
            let op = counts.operation.as_str();
            let _ = writeln!(
                out,
                "corebank_operations_total{{operation=\"{op}\",outcome=\"success\"}} {}",
                counts.succeeded
            );
            let _ = writeln!(
                out,
                "corebank_operations_total{{operation=\"{op}\",outcome=\"failure\"}} {}",
                counts.failed
            );
        }

        for (name, help, value) in [
            (
                "corebank_lock_conflicts_total",
                "Row-lock conflicts absorbed by retry",
                self.lock_conflicts,
            ),
            (
                "corebank_holds_expired_total",
                "Holds released by the expiry sweep",
                self.holds_expired,
            ),
            (
                "corebank_reconciliation_runs_total",
                "Completed reconciliation runs",
                self.reconciliation_runs,
            ),
            (
                "corebank_reconciliation_failures_total",
                "Failed reconciliation runs",
                self.reconciliation_failures,
            ),
            (
                "corebank_discrepancies_found_total",
                "Discrepancies found by reconciliation",
                self.discrepancies_found,
            ),
            (
                "corebank_notifications_sent_total",
                "Notifications delivered",
                self.notifications_sent,
            ),
            (
                "corebank_notifications_failed_total",
                "Notification deliveries that failed",
                self.notifications_failed,
            ),
        ] {
            let _ = write!(
                out,
                "\n# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            );
        }
        out
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
