//! Audit trail of ledger and reconciliation actions.

use async_trait::async_trait;
use corebank_common::Timestamp;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Audit action names.
pub mod actions {
    pub const MANUAL_JOURNAL_ENTRY_CREATED: &str = "MANUAL_JOURNAL_ENTRY_CREATED";
    pub const MANUAL_JOURNAL_ENTRY_REVERSAL: &str = "MANUAL_JOURNAL_ENTRY_REVERSAL";
    pub const DISCREPANCY_DETECTED: &str = "DISCREPANCY_DETECTED";
    pub const DISCREPANCY_AUTO_CORRECTED: &str = "DISCREPANCY_AUTO_CORRECTED";
    pub const SOFT_LIMITS_APPLIED: &str = "SOFT_LIMITS_APPLIED";
    pub const ACCOUNT_HARD_BLOCKED: &str = "ACCOUNT_HARD_BLOCKED";
    pub const SYSTEM_WIDE_DISCREPANCY: &str = "SYSTEM_WIDE_DISCREPANCY";
    pub const ACCOUNT_UNBLOCKED: &str = "ACCOUNT_UNBLOCKED";
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub details: serde_json::Value,
    pub actor: Option<String>,
    pub recorded_at: Timestamp,
}

impl AuditRecord {
    pub fn new(
        action: &str,
        entity_type: &str,
        entity_id: i64,
        details: serde_json::Value,
    ) -> Self {
        Self {
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            details,
            actor: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn by(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }
}

/// Append-only audit sink. Recording never fails the caller.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Writes audit records as structured log lines on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, record: AuditRecord) {
        info!(
            target: "audit",
            action = %record.action,
            entity_type = %record.entity_type,
            entity_id = record.entity_id,
            actor = record.actor.as_deref().unwrap_or("system"),
            details = %record.details,
            "Audit"
        );
    }
}

/// Keeps audit records in memory, and also logs them.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record so far, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Records with the given action.
    pub fn with_action(&self, action: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, record: AuditRecord) {
        TracingAuditLog.record(record.clone()).await;
        self.records.lock().push(record);
    }
}
