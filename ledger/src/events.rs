//! Events published after a ledger mutation commits.

use corebank_common::{AuthCode, TransactionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// A committed ledger outcome that downstream consumers may react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEvent {
    DepositSucceeded {
        account_number: String,
        transaction_id: TransactionId,
        amount: Decimal,
        balance: Decimal,
    },
    WithdrawalSucceeded {
        account_number: String,
        transaction_id: TransactionId,
        amount: Decimal,
        balance: Decimal,
    },
    TransferAuthorized {
        auth_code: AuthCode,
        source_account: String,
        destination_account: String,
        amount: Decimal,
    },
    TransferCaptured {
        auth_code: AuthCode,
        source_account: String,
        amount: Decimal,
    },
    TransferSettled {
        auth_code: AuthCode,
        destination_account: String,
        amount: Decimal,
    },
    TransferCancelled {
        auth_code: AuthCode,
        source_account: String,
        amount: Decimal,
    },
    HoldReleased {
        transaction_id: TransactionId,
        account_number: String,
        amount: Decimal,
    },
    PoolLowBalance {
        account_number: String,
        balance: Decimal,
        threshold: Decimal,
    },
}

impl LedgerEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::DepositSucceeded { .. } => "deposit_succeeded",
            LedgerEvent::WithdrawalSucceeded { .. } => "withdrawal_succeeded",
            LedgerEvent::TransferAuthorized { .. } => "transfer_authorized",
            LedgerEvent::TransferCaptured { .. } => "transfer_captured",
            LedgerEvent::TransferSettled { .. } => "transfer_settled",
            LedgerEvent::TransferCancelled { .. } => "transfer_cancelled",
            LedgerEvent::HoldReleased { .. } => "hold_released",
            LedgerEvent::PoolLowBalance { .. } => "pool_low_balance",
        }
    }
}

/// Sending half of the post-commit event channel.
///
/// Publishing never fails: with no receiver the event is dropped.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: Option<mpsc::UnboundedSender<LedgerEvent>>,
}

impl EventPublisher {
    /// Create a publisher and the receiver it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LedgerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A publisher that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish an event.
    pub fn publish(&self, event: LedgerEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(event) {
                debug!(event = e.0.name(), "Event dropped, no receiver");
            }
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let (publisher, mut rx) = EventPublisher::channel();
        publisher.publish(LedgerEvent::PoolLowBalance {
            account_number: "RECONCILIATION-POOL".to_string(),
            balance: dec!(50),
            threshold: dec!(10000),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "pool_low_balance");
    }

    #[test]
    fn test_publish_without_receiver_is_silent() {
        let (publisher, rx) = EventPublisher::channel();
        drop(rx);
        publisher.publish(LedgerEvent::HoldReleased {
            transaction_id: TransactionId::new(1),
            account_number: "ACC-1".to_string(),
            amount: dec!(1),
        });
        EventPublisher::disabled().publish(LedgerEvent::HoldReleased {
            transaction_id: TransactionId::new(1),
            account_number: "ACC-1".to_string(),
            amount: dec!(1),
        });
    }
}
