//! CoreBank Coordinator
//!
//! The service layer over the ledger: cash and transfer engines, fund
//! holds, post-commit notifications, scheduled jobs and the [`Coordinator`]
//! facade that fronts them.

pub mod cash;
pub mod config;
pub mod coordinator;
pub mod hold_manager;
pub mod metrics;
pub mod notification;
pub mod scheduler;
pub mod state;
pub mod transfer;

pub use cash::{CashEngine, CashReceipt};
pub use config::CoordinatorConfig;
pub use coordinator::{AccountView, Coordinator};
pub use metrics::{MetricsSnapshot, OperationKind};
pub use notification::{ChannelKind, NotificationRecipient, Notifier};
pub use state::CoordinatorState;
pub use transfer::{ExpirySummary, TransferEngine, TransferReceipt};
