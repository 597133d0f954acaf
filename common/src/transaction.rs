//! Transaction types and state machine.

use crate::{AccountId, AuthCode, LedgerError, PaymentTypeId, Timestamp, TransactionId};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction status representing the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created, not yet processed.
    Pending,
    /// Funds held, awaiting capture.
    Authorized,
    /// Source debited, awaiting settlement.
    Captured,
    /// Destination credited. Transfer complete.
    Settled,
    /// Single-step operation completed (cash, manual entries).
    Completed,
    /// Authorization cancelled or expired.
    Cancelled,
    /// Failed during processing.
    Failed,
}

impl TransactionStatus {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[
                TransactionStatus::Authorized,
                TransactionStatus::Completed,
                TransactionStatus::Cancelled,
                TransactionStatus::Failed,
            ],
            TransactionStatus::Authorized => &[
                TransactionStatus::Captured,
                TransactionStatus::Cancelled,
                TransactionStatus::Failed,
            ],
            TransactionStatus::Captured => &[TransactionStatus::Settled, TransactionStatus::Failed],
            TransactionStatus::Settled => &[],
            TransactionStatus::Completed => &[],
            TransactionStatus::Cancelled => &[],
            TransactionStatus::Failed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Whether a transaction in this state must own journal entries.
    pub fn requires_journal_entries(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Settled)
    }
}

/// Channel names stamped on transactions.
pub mod channel {
    /// Default channel for transfers.
    pub const API: &str = "API";
    /// Cash deposits and withdrawals.
    pub const ATM: &str = "ATM";
    /// Manual journal postings.
    pub const MANUAL: &str = "MANUAL";
    /// Manual journal reversals.
    pub const MANUAL_REVERSAL: &str = "MANUAL_REVERSAL";
}

/// A named payment type, seeded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentType {
    /// Store identifier.
    pub id: PaymentTypeId,
    /// Unique name.
    pub name: String,
}

impl PaymentType {
    pub const DEPOSIT: &'static str = "DEPOSIT";
    pub const WITHDRAWAL: &'static str = "WITHDRAWAL";
    pub const TRANSFER_AUTH: &'static str = "TRANSFER_AUTH";
    pub const MANUAL_ADJUSTMENT: &'static str = "MANUAL_ADJUSTMENT";
    pub const MANUAL_REVERSAL: &'static str = "MANUAL_REVERSAL";

    /// Names seeded into every store.
    pub const SEEDED: [&'static str; 5] = [
        Self::DEPOSIT,
        Self::WITHDRAWAL,
        Self::TRANSFER_AUTH,
        Self::MANUAL_ADJUSTMENT,
        Self::MANUAL_REVERSAL,
    ];
}

/// Error returned for an illegal status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

impl From<InvalidTransition> for LedgerError {
    fn from(t: InvalidTransition) -> Self {
        LedgerError::InvalidTransactionStatus {
            from: t.from,
            to: t.to,
        }
    }
}

/// A ledger transaction.
///
/// Accounts are referenced by id only. Apart from status and its
/// timestamps, a transaction never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Store-assigned identifier.
    pub id: TransactionId,
    /// Account debited, if any.
    pub source_account: Option<AccountId>,
    /// Account credited, if any.
    pub destination_account: Option<AccountId>,
    /// Amount moved.
    pub amount: Decimal,
    /// Current status.
    pub status: TransactionStatus,
    /// Authorization code (transfer protocol only).
    pub auth_code: Option<AuthCode>,
    /// Payment type.
    pub payment_type: PaymentTypeId,
    /// Originating channel.
    pub channel: String,
    /// Free-form description.
    pub additional_info: Option<String>,
    /// Transaction this one reverses.
    pub reversal_of: Option<TransactionId>,
    /// Staff member who created a manual transaction.
    pub created_by: Option<String>,
    /// When the authorization lapses.
    pub expires_at: Option<Timestamp>,
    /// When the source was debited.
    pub captured_at: Option<Timestamp>,
    /// When the destination was credited.
    pub settled_at: Option<Timestamp>,
    /// When the transaction was created.
    pub created_at: Timestamp,
}

impl Transaction {
    fn base(
        status: TransactionStatus,
        amount: Decimal,
        payment_type: PaymentTypeId,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::new(0),
            source_account: None,
            destination_account: None,
            amount,
            status,
            auth_code: None,
            payment_type,
            channel: channel.into(),
            additional_info: None,
            reversal_of: None,
            created_by: None,
            expires_at: None,
            captured_at: None,
            settled_at: None,
            created_at: Utc::now(),
        }
    }

    /// Create an authorized transfer awaiting capture.
    pub fn authorized(
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
        payment_type: PaymentTypeId,
        channel: impl Into<String>,
        auth_code: AuthCode,
        expires_at: Timestamp,
    ) -> Self {
        let mut tx = Self::base(TransactionStatus::Authorized, amount, payment_type, channel);
        tx.source_account = Some(source);
        tx.destination_account = Some(destination);
        tx.auth_code = Some(auth_code);
        tx.expires_at = Some(expires_at);
        tx
    }

    /// Create a completed single-step transaction.
    pub fn completed(
        source: Option<AccountId>,
        destination: Option<AccountId>,
        amount: Decimal,
        payment_type: PaymentTypeId,
        channel: impl Into<String>,
    ) -> Self {
        let mut tx = Self::base(TransactionStatus::Completed, amount, payment_type, channel);
        tx.source_account = source;
        tx.destination_account = destination;
        tx
    }

    /// Attach a description.
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    /// Attach the creating staff member.
    pub fn with_created_by(mut self, created_by: Option<String>) -> Self {
        self.created_by = created_by;
        self
    }

    /// Mark as the reversal of another transaction.
    pub fn with_reversal_of(mut self, original: TransactionId) -> Self {
        self.reversal_of = Some(original);
        self
    }

    /// Check whether the authorization is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(crate::is_expired).unwrap_or(false)
    }

    /// Transition to a new status, stamping the matching timestamp.
    pub fn transition_to(&mut self, new_status: TransactionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        self.status = new_status;

        let now = Utc::now();
        match new_status {
            TransactionStatus::Captured => self.captured_at = Some(now),
            TransactionStatus::Settled => self.settled_at = Some(now),
            _ => {}
        }

        Ok(())
    }
}
