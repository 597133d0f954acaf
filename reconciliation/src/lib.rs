//! CoreBank Reconciliation
//!
//! End-of-day checks of the ledger against itself, severity-graded
//! remediation of what they find, and the guard that enforces the
//! resulting controls before money leaves an account.

pub mod config;
pub mod engine;
pub mod guard;
pub mod response;
pub mod severity;

pub use config::{PoolConfig, ReconciliationConfig, SeverityThresholds, TierLimits};
pub use engine::{run_checks, ReconciliationEngine};
pub use guard::{GuardedOperation, TransactionGuard};
pub use response::{ResponseAction, ResponseEngine};
