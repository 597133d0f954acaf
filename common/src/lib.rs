//! CoreBank Common Types
//!
//! Shared types used across the CoreBank ledger, including identifiers,
//! the error taxonomy, the transaction state machine and retry policy.

pub mod identifiers;
pub mod monetary;
pub mod transaction;
pub mod error;
pub mod retry;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use transaction::*;
pub use error::*;
pub use retry::RetryPolicy;
pub use time::*;
