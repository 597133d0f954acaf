//! Identifier types for ledger entities.
//!
//! Every persisted row is keyed by a store-assigned `i64`. The newtypes keep
//! account ids from being passed where a transaction id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw store identifier.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw identifier.
            pub const fn value(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

ledger_id!(
    /// Identifier of a bank account.
    AccountId
);
ledger_id!(
    /// Identifier of a ledger transaction.
    TransactionId
);
ledger_id!(
    /// Identifier of a journal entry.
    JournalEntryId
);
ledger_id!(
    /// Identifier of a fund hold.
    HoldId
);
ledger_id!(
    /// Identifier of an account limits row.
    LimitsId
);
ledger_id!(
    /// Identifier of a payment type.
    PaymentTypeId
);
ledger_id!(
    /// Identifier of a reconciliation report.
    ReportId
);
ledger_id!(
    /// Identifier of a reconciliation discrepancy.
    DiscrepancyId
);

/// Opaque token identifying an authorized-but-unsettled transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthCode(String);

impl AuthCode {
    /// Prefix carried by every generated code.
    pub const PREFIX: &'static str = "AUTH-";

    /// Generate a fresh code: `AUTH-` plus eight uppercase hex characters.
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", Self::PREFIX, simple[..8].to_uppercase()))
    }

    /// Wrap a code received from a caller.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AuthCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AuthCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}
