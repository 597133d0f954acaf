//! CoreBank Ledger
//!
//! Double-entry ledger: account and journal models, the row-locking store
//! seam, the transaction runner and the journal engine.

pub mod account;
pub mod audit;
pub mod balance;
pub mod engine;
pub mod events;
pub mod hold;
pub mod journal;
pub mod limits;
pub mod memory;
pub mod report;
pub mod runner;
pub mod store;

pub use account::{Account, AccountStatus};
pub use audit::{actions, AuditLog, AuditRecord, InMemoryAuditLog, TracingAuditLog};
pub use balance::AccountBalance;
pub use engine::{JournalEngine, PostedJournal};
pub use events::{EventPublisher, LedgerEvent};
pub use hold::{AccountHold, HoldStatus, HoldType};
pub use journal::{EntryTotals, EntryType, JournalBatch, JournalEntry, JournalFilter, PostingLine};
pub use limits::{AccountLimits, AccountTier, LimitCaps};
pub use memory::InMemoryLedgerStore;
pub use report::{
    DiscrepancyType, EntityType, ReconciliationDiscrepancy, ReconciliationReport, ReportStatus,
    Severity,
};
pub use runner::TransactionRunner;
pub use store::{LedgerSnapshot, LedgerStore, LedgerTransaction};
