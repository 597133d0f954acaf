//! Error types for ledger operations.

use crate::{AuthCode, DiscrepancyId, JournalEntryId, ReportId, TransactionId, TransactionStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a failure, used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Malformed input, rejected before any mutation.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// The entity is in the wrong state for the requested operation.
    StateConflict,
    /// Not enough funds, or postings that do not balance.
    Balance,
    /// A reconciliation control refused the operation.
    PolicyBlock,
    /// Infrastructure or integrity failure.
    SystemIntegrity,
}

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Amount missing, zero or negative.
    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: Decimal },

    /// Malformed journal entry list.
    #[error("Invalid journal entry: {0}")]
    InvalidJournalEntry(String),

    /// Malformed transaction request.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Unknown account.
    #[error("Bank account not found: {0}")]
    AccountNotFound(String),

    /// Unknown transaction.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Unknown payment type.
    #[error("Payment type not found: {0}")]
    PaymentTypeNotFound(String),

    /// No authorized transfer for this code.
    #[error("Authorization not found: {0}")]
    AuthorizationNotFound(AuthCode),

    /// Unknown journal entry.
    #[error("Journal entry not found: {0}")]
    JournalEntryNotFound(JournalEntryId),

    /// Unknown reconciliation report.
    #[error("Reconciliation report not found: {0}")]
    ReconciliationNotFound(ReportId),

    /// Unknown reconciliation discrepancy.
    #[error("Reconciliation discrepancy not found: {0}")]
    DiscrepancyNotFound(DiscrepancyId),

    /// Transaction status does not allow the requested transition.
    #[error("Invalid transaction status: cannot move from {from:?} to {to:?}")]
    InvalidTransactionStatus {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Transfer was already captured.
    #[error("Transfer already captured: {0}")]
    TransferAlreadyCaptured(AuthCode),

    /// Transfer was already settled.
    #[error("Transfer already settled: {0}")]
    TransferAlreadySettled(AuthCode),

    /// Authorization is past its expiry.
    #[error("Authorization expired: {0}")]
    AuthorizationExpired(AuthCode),

    /// Account is frozen or closed.
    #[error("Bank account not active: {0}")]
    BankAccountNotActive(String),

    /// Transaction already has a reversal.
    #[error("Transaction already reversed: {0}")]
    TransactionAlreadyReversed(TransactionId),

    /// Account number already taken.
    #[error("Duplicate account number: {0}")]
    DuplicateAccountNumber(String),

    /// Authorization code already issued to another transaction.
    #[error("Duplicate authorization code: {0}")]
    DuplicateAuthCode(AuthCode),

    /// Another reconciliation run is in flight.
    #[error("Reconciliation already in progress")]
    ReconciliationInProgress,

    /// Balance below the requested amount.
    #[error("Balance insufficient: required {required}, balance {balance}")]
    BalanceInsufficient { required: Decimal, balance: Decimal },

    /// Available balance (balance minus holds) below the requested amount.
    #[error("Available balance insufficient: required {required}, available {available}")]
    InsufficientAvailableBalance {
        required: Decimal,
        available: Decimal,
    },

    /// A debit would drive the balance below zero.
    #[error("Negative balance not allowed on {account}: balance {balance}, debit {amount}")]
    NegativeBalanceNotAllowed {
        account: String,
        balance: Decimal,
        amount: Decimal,
    },

    /// A credit or a posting total would exceed the representable range.
    #[error("Amount overflow on {account}: adding {amount}")]
    BalanceOverflow { account: String, amount: Decimal },

    /// Debits and credits differ.
    #[error("Unbalanced journal entry: debits {debits}, credits {credits}")]
    UnbalancedJournalEntry { debits: Decimal, credits: Decimal },

    /// Account is hard-blocked pending manual review.
    #[error("Account {0} is blocked pending reconciliation review")]
    AccountReconciliationBlocked(String),

    /// Amount exceeds an active soft limit.
    #[error("Transaction limit exceeded: {limit_kind} limit {limit}, requested {amount}")]
    TransactionLimitExceeded {
        limit_kind: String,
        limit: Decimal,
        amount: Decimal,
    },

    /// Reconciliation pool cannot fund a correction.
    #[error("Reconciliation pool insufficient funds: required {required}, available {available}")]
    ReconciliationPoolInsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// Lock conflicts persisted through every retry attempt.
    #[error("Operation {operation} failed after {attempts} attempts under contention")]
    RetryExhausted { operation: String, attempts: u32 },

    /// Row lock could not be acquired in time.
    #[error("Lock conflict on {resource}")]
    LockConflict { resource: String },

    /// Operation ran past its transaction timeout.
    #[error("Operation timed out: {operation}")]
    OperationTimeout { operation: String },

    /// Service is not accepting requests.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Check if this error is retryable.
    ///
    /// Lock conflicts are the only condition recovered locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockConflict { .. })
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        use LedgerError::*;
        match self {
            InvalidAmount { .. } | InvalidJournalEntry(_) | InvalidTransaction(_) => {
                ErrorCategory::Validation
            }
            AccountNotFound(_)
            | TransactionNotFound(_)
            | PaymentTypeNotFound(_)
            | AuthorizationNotFound(_)
            | JournalEntryNotFound(_)
            | ReconciliationNotFound(_)
            | DiscrepancyNotFound(_) => ErrorCategory::NotFound,
            InvalidTransactionStatus { .. }
            | TransferAlreadyCaptured(_)
            | TransferAlreadySettled(_)
            | AuthorizationExpired(_)
            | BankAccountNotActive(_)
            | TransactionAlreadyReversed(_)
            | DuplicateAccountNumber(_)
            | DuplicateAuthCode(_)
            | ReconciliationInProgress => ErrorCategory::StateConflict,
            BalanceInsufficient { .. }
            | InsufficientAvailableBalance { .. }
            | NegativeBalanceNotAllowed { .. }
            | BalanceOverflow { .. }
            | UnbalancedJournalEntry { .. } => ErrorCategory::Balance,
            AccountReconciliationBlocked(_) | TransactionLimitExceeded { .. } => {
                ErrorCategory::PolicyBlock
            }
            ReconciliationPoolInsufficientFunds { .. }
            | RetryExhausted { .. }
            | LockConflict { .. }
            | OperationTimeout { .. }
            | ServiceUnavailable(_)
            | Configuration(_)
            | Internal(_) => ErrorCategory::SystemIntegrity,
        }
    }

    /// Get the stable machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        use LedgerError::*;
        match self {
            InvalidAmount { .. } => "invalid_amount",
            InvalidJournalEntry(_) => "invalid_journal_entry",
            InvalidTransaction(_) => "invalid_transaction",
            AccountNotFound(_) => "bank_account_not_found",
            TransactionNotFound(_) => "transaction_not_found",
            PaymentTypeNotFound(_) => "payment_type_not_found",
            AuthorizationNotFound(_) => "authorization_not_found",
            JournalEntryNotFound(_) => "journal_entry_not_found",
            ReconciliationNotFound(_) => "reconciliation_not_found",
            DiscrepancyNotFound(_) => "discrepancy_not_found",
            InvalidTransactionStatus { .. } => "invalid_transaction_status",
            TransferAlreadyCaptured(_) => "transfer_already_captured",
            TransferAlreadySettled(_) => "transfer_already_settled",
            AuthorizationExpired(_) => "authorization_expired",
            BankAccountNotActive(_) => "bank_account_not_active",
            TransactionAlreadyReversed(_) => "transaction_already_reversed",
            DuplicateAccountNumber(_) => "duplicate_account_number",
            DuplicateAuthCode(_) => "duplicate_auth_code",
            ReconciliationInProgress => "reconciliation_in_progress",
            BalanceInsufficient { .. } => "balance_insufficient",
            InsufficientAvailableBalance { .. } => "available_balance_insufficient",
            NegativeBalanceNotAllowed { .. } => "negative_balance_not_allowed",
            BalanceOverflow { .. } => "balance_overflow",
            UnbalancedJournalEntry { .. } => "unbalanced_journal_entry",
            AccountReconciliationBlocked(_) => "account_reconciliation_blocked",
            TransactionLimitExceeded { .. } => "transaction_limit_exceeded",
            ReconciliationPoolInsufficientFunds { .. } => "reconciliation_pool_insufficient_funds",
            RetryExhausted { .. } => "retry_exhausted",
            LockConflict { .. } => "lock_conflict",
            OperationTimeout { .. } => "operation_timeout",
            ServiceUnavailable(_) => "service_unavailable",
            Configuration(_) => "configuration_error",
            Internal(_) => "internal_server_error",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Structured failure payload returned to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureResponse {
    /// Stable error code.
    pub code: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
}

impl From<&LedgerError> for FailureResponse {
    fn from(err: &LedgerError) -> Self {
        Self {
            code: err.error_code().to_string(),
            category: err.category(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_only_lock_conflict_is_retryable() {
        let conflict = LedgerError::LockConflict {
            resource: "account:1".to_string(),
        };
        assert!(conflict.is_retryable());

        let exhausted = LedgerError::RetryExhausted {
            operation: "deposit".to_string(),
            attempts: 5,
        };
        assert!(!exhausted.is_retryable());
        assert!(!LedgerError::ReconciliationInProgress.is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            LedgerError::InvalidAmount { amount: dec!(0) }.category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            LedgerError::AccountNotFound("X".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            LedgerError::TransferAlreadyCaptured(AuthCode::new("AUTH-1")).category(),
            ErrorCategory::StateConflict
        );
        assert_eq!(
            LedgerError::UnbalancedJournalEntry {
                debits: dec!(100),
                credits: dec!(60)
            }
            .category(),
            ErrorCategory::Balance
        );
        assert_eq!(
            LedgerError::AccountReconciliationBlocked("X".into()).category(),
            ErrorCategory::PolicyBlock
        );
        assert_eq!(
            LedgerError::ReconciliationPoolInsufficientFunds {
                required: dec!(5),
                available: dec!(1)
            }
            .category(),
            ErrorCategory::SystemIntegrity
        );
    }

    #[test]
    fn test_failure_response() {
        let err = LedgerError::InsufficientAvailableBalance {
            required: dec!(600),
            available: dec!(500),
        };
        let response = FailureResponse::from(&err);

        assert_eq!(response.code, "available_balance_insufficient");
        assert_eq!(response.category, ErrorCategory::Balance);
        assert!(response.message.contains("600"));
    }
}
