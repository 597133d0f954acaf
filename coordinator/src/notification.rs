//! Post-commit notifications.
//!
//! Engines publish [`LedgerEvent`]s after commit; the [`Notifier`] turns each
//! into a [`NotificationData`] and fans it out to the channels routed for
//! that event. Delivery failures are logged and counted, never returned to
//! the operation that produced the event.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use corebank_common::{format_money, now, Timestamp};
use corebank_ledger::LedgerEvent;

use crate::config::NotificationConfig;
use crate::metrics::SharedMetrics;

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    Email,
    Sms,
    Push,
    Log,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Email => "EMAIL",
            ChannelKind::Sms => "SMS",
            ChannelKind::Push => "PUSH",
            ChannelKind::Log => "LOG",
        };
        f.write_str(name)
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EMAIL" => Ok(ChannelKind::Email),
            "SMS" => Ok(ChannelKind::Sms),
            "PUSH" => Ok(ChannelKind::Push),
            "LOG" => Ok(ChannelKind::Log),
            other => Err(format!("unknown notification channel: {other}")),
        }
    }
}

/// Customer-facing event a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    DepositSuccess,
    WithdrawalSuccess,
    TransferAuthorized,
    TransferCaptured,
    TransferSettled,
    TransferCancelled,
    AccountHoldReleased,
    LowBalanceWarning,
}

impl NotificationEvent {
    pub fn template_id(self) -> &'static str {
        match self {
            NotificationEvent::DepositSuccess => "deposit_success",
            NotificationEvent::WithdrawalSuccess => "withdrawal_success",
            NotificationEvent::TransferAuthorized => "transfer_authorized",
            NotificationEvent::TransferCaptured => "transfer_captured",
            NotificationEvent::TransferSettled => "transfer_settled",
            NotificationEvent::TransferCancelled => "transfer_cancelled",
            NotificationEvent::AccountHoldReleased => "account_hold_released",
            NotificationEvent::LowBalanceWarning => "low_balance_warning",
        }
    }

    pub fn subject(self) -> &'static str {
        match self {
            NotificationEvent::DepositSuccess => "Deposit Successful",
            NotificationEvent::WithdrawalSuccess => "Withdrawal Successful",
            NotificationEvent::TransferAuthorized => "Transfer Authorized",
            NotificationEvent::TransferCaptured => "Transfer Captured",
            NotificationEvent::TransferSettled => "Transfer Completed",
            NotificationEvent::TransferCancelled => "Transfer Cancelled",
            NotificationEvent::AccountHoldReleased => "Funds Released",
            NotificationEvent::LowBalanceWarning => "Low Balance Alert",
        }
    }

    /// Channels this event is routed to.
    pub fn channels(self) -> &'static [ChannelKind] {
        match self {
            NotificationEvent::DepositSuccess | NotificationEvent::WithdrawalSuccess => {
                &[ChannelKind::Log, ChannelKind::Email, ChannelKind::Sms]
            }
            NotificationEvent::TransferAuthorized
            | NotificationEvent::TransferCaptured
            | NotificationEvent::TransferSettled
            | NotificationEvent::TransferCancelled
            | NotificationEvent::AccountHoldReleased => &[ChannelKind::Log, ChannelKind::Push],
            NotificationEvent::LowBalanceWarning => &[ChannelKind::Log, ChannelKind::Email],
        }
    }
}

/// Where a notification goes. Missing addresses make a channel skip it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecipient {
    pub account_number: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub device_token: Option<String>,
}

impl NotificationRecipient {
    pub fn new(account_number: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.device_token = Some(token.into());
        self
    }

    /// Address used by `kind`, if the recipient has one.
    pub fn address(&self, kind: ChannelKind) -> Option<&str> {
        match kind {
            ChannelKind::Email => self.email.as_deref(),
            ChannelKind::Sms => self.phone.as_deref(),
            ChannelKind::Push => self.device_token.as_deref(),
            ChannelKind::Log => Some(self.account_number.as_str()),
        }
    }
}

/// One rendered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub event: NotificationEvent,
    pub recipient: NotificationRecipient,
    pub variables: BTreeMap<String, String>,
    pub created_at: Timestamp,
}

impl NotificationData {
    pub fn new(event: NotificationEvent, recipient: NotificationRecipient) -> Self {
        Self {
            event,
            recipient,
            variables: BTreeMap::new(),
            created_at: now(),
        }
    }

    pub fn var(mut self, key: &str, value: impl ToString) -> Self {
        self.variables.insert(key.to_string(), value.to_string());
        self
    }

    pub fn subject(&self) -> &'static str {
        self.event.subject()
    }

    /// Message body: the subject followed by the template variables.
    pub fn body(&self) -> String {
        let details: Vec<String> = self
            .variables
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}: {}", self.subject(), details.join(", "))
    }
}

/// Channel delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("recipient {account} has no {channel} address")]
    MissingAddress { channel: ChannelKind, account: String },
    #[error("{channel} provider rejected the message: {reason}")]
    Provider { channel: ChannelKind, reason: String },
}

/// A delivery channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel this implementation delivers on.
    fn kind(&self) -> ChannelKind;

    /// Whether the channel is configured to send.
    fn is_enabled(&self) -> bool;

    /// Whether the recipient can be reached on this channel.
    fn can_send(&self, data: &NotificationData) -> bool {
        data.recipient.address(self.kind()).is_some()
    }

    /// Deliver one notification.
    async fn send(&self, data: &NotificationData) -> Result<(), NotificationError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Log
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, data: &NotificationData) -> Result<(), NotificationError> {
        info!(
            target: "notification",
            template = data.event.template_id(),
            account = %data.recipient.account_number,
            body = %data.body(),
            "Notification"
        );
        Ok(())
    }
}

/// A message accepted by a mock provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub channel: ChannelKind,
    pub address: String,
    pub subject: String,
    pub body: String,
}

/// Email, SMS or push provider that records messages instead of sending them.
#[derive(Debug)]
pub struct MockProviderChannel {
    kind: ChannelKind,
    enabled: bool,
    failing: Mutex<Option<String>>,
    outbox: Mutex<Vec<SentNotification>>,
}

impl MockProviderChannel {
    fn with_kind(kind: ChannelKind) -> Self {
        Self {
            kind,
            enabled: true,
            failing: Mutex::new(None),
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn email() -> Self {
        Self::with_kind(ChannelKind::Email)
    }

    pub fn sms() -> Self {
        Self::with_kind(ChannelKind::Sms)
    }

    pub fn push() -> Self {
        Self::with_kind(ChannelKind::Push)
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Make every following send fail with `reason`, or succeed again with `None`.
    pub fn fail_with(&self, reason: Option<&str>) {
        *self.failing.lock() = reason.map(str::to_string);
    }

    /// Messages accepted so far.
    pub fn outbox(&self) -> Vec<SentNotification> {
        self.outbox.lock().clone()
    }
}

#[async_trait]
impl NotificationChannel for MockProviderChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, data: &NotificationData) -> Result<(), NotificationError> {
        if let Some(reason) = self.failing.lock().clone() {
            return Err(NotificationError::Provider {
                channel: self.kind,
                reason,
            });
        }
        let address = data
            .recipient
            .address(self.kind)
            .ok_or_else(|| NotificationError::MissingAddress {
                channel: self.kind,
                account: data.recipient.account_number.clone(),
            })?
            .to_string();

        info!(channel = %self.kind, to = %address, subject = data.subject(), "Mock notification sent");
        self.outbox.lock().push(SentNotification {
            channel: self.kind,
            address,
            subject: data.subject().to_string(),
            body: data.body(),
        });
        Ok(())
    }
}

/// Routes ledger events to notification channels.
pub struct Notifier {
    config: NotificationConfig,
    channels: Vec<Arc<dyn NotificationChannel>>,
    contacts: DashMap<String, NotificationRecipient>,
    metrics: SharedMetrics,
}

impl Notifier {
    /// Notifier with the log channel and the mock providers.
    pub fn new(config: NotificationConfig, metrics: SharedMetrics) -> Self {
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![
            Arc::new(LogChannel),
            Arc::new(MockProviderChannel::email()),
            Arc::new(MockProviderChannel::sms()),
            Arc::new(MockProviderChannel::push()),
        ];
        Self::with_channels(config, channels, metrics)
    }

    pub fn with_channels(
        config: NotificationConfig,
        channels: Vec<Arc<dyn NotificationChannel>>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            config,
            channels,
            contacts: DashMap::new(),
            metrics,
        }
    }

    /// Register or replace the contact details of an account holder.
    pub fn register_contact(&self, recipient: NotificationRecipient) {
        self.contacts
            .insert(recipient.account_number.clone(), recipient);
    }

    fn recipient(&self, account_number: &str) -> NotificationRecipient {
        self.contacts
            .get(account_number)
            .map(|r| r.clone())
            .unwrap_or_else(|| NotificationRecipient::new(account_number))
    }

    /// Build the notification for a ledger event.
    pub fn render(&self, event: &LedgerEvent) -> NotificationData {
        match event {
            LedgerEvent::DepositSucceeded {
                account_number,
                transaction_id,
                amount,
                balance,
            } => NotificationData::new(
                NotificationEvent::DepositSuccess,
                self.recipient(account_number),
            )
            .var("account", account_number)
            .var("transaction_id", transaction_id)
            .var("amount", format_money(*amount))
            .var("balance", format_money(*balance)),
            LedgerEvent::WithdrawalSucceeded {
                account_number,
                transaction_id,
                amount,
                balance,
            } => NotificationData::new(
                NotificationEvent::WithdrawalSuccess,
                self.recipient(account_number),
            )
            .var("account", account_number)
            .var("transaction_id", transaction_id)
            .var("amount", format_money(*amount))
            .var("balance", format_money(*balance)),
            LedgerEvent::TransferAuthorized {
                auth_code,
                source_account,
                destination_account,
                amount,
            } => NotificationData::new(
                NotificationEvent::TransferAuthorized,
                self.recipient(source_account),
            )
            .var("auth_code", auth_code)
            .var("destination", destination_account)
            .var("amount", format_money(*amount)),
            LedgerEvent::TransferCaptured {
                auth_code,
                source_account,
                amount,
            } => NotificationData::new(
                NotificationEvent::TransferCaptured,
                self.recipient(source_account),
            )
            .var("auth_code", auth_code)
            .var("amount", format_money(*amount)),
            LedgerEvent::TransferSettled {
                auth_code,
                destination_account,
                amount,
            } => NotificationData::new(
                NotificationEvent::TransferSettled,
                self.recipient(destination_account),
            )
            .var("auth_code", auth_code)
            .var("amount", format_money(*amount)),
            LedgerEvent::TransferCancelled {
                auth_code,
                source_account,
                amount,
            } => NotificationData::new(
                NotificationEvent::TransferCancelled,
                self.recipient(source_account),
            )
            .var("auth_code", auth_code)
            .var("amount", format_money(*amount)),
            LedgerEvent::HoldReleased {
                transaction_id,
                account_number,
                amount,
            } => NotificationData::new(
                NotificationEvent::AccountHoldReleased,
                self.recipient(account_number),
            )
            .var("transaction_id", transaction_id)
            .var("amount", format_money(*amount)),
            LedgerEvent::PoolLowBalance {
                account_number,
                balance,
                threshold,
            } => {
                let mut recipient = NotificationRecipient::new(account_number.as_str());
                recipient.email = self.config.operations_email.clone();
                NotificationData::new(NotificationEvent::LowBalanceWarning, recipient)
                    .var("account", account_number)
                    .var("balance", format_money(*balance))
                    .var("threshold", format_money(*threshold))
            }
        }
    }

    /// Deliver one event. Returns the number of successful deliveries.
    pub async fn notify(&self, event: &LedgerEvent) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let data = self.render(event);
        let routed = data.event.channels();

        let mut delivered = 0;
        for channel in &self.channels {
            let kind = channel.kind();
            if !routed.contains(&kind) || !self.config.channels.contains(&kind) {
                continue;
            }
            if !channel.is_enabled() {
                debug!(channel = %kind, "Channel disabled");
                continue;
            }
            if !channel.can_send(&data) {
                debug!(
                    channel = %kind,
                    account = %data.recipient.account_number,
                    "Recipient not reachable on channel"
                );
                continue;
            }
            match channel.send(&data).await {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.notification(true);
                }
                Err(e) => {
                    self.metrics.notification(false);
                    warn!(
                        channel = %kind,
                        template = data.event.template_id(),
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
        }
        delivered
    }

    /// Consume events until shutdown, then drain what is already queued.
    pub fn spawn(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<LedgerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => {
                            self.notify(&event).await;
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        events.close();
                        while let Ok(event) = events.try_recv() {
                            self.notify(&event).await;
                        }
                        break;
                    }
                }
            }
            debug!("Notifier stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use corebank_common::TransactionId;
    use rust_decimal_macros::dec;

    struct Channels {
        email: Arc<MockProviderChannel>,
        sms: Arc<MockProviderChannel>,
        push: Arc<MockProviderChannel>,
    }

    fn notifier(config: NotificationConfig) -> (Notifier, Channels, SharedMetrics) {
        let channels = Channels {
            email: Arc::new(MockProviderChannel::email()),
            sms: Arc::new(MockProviderChannel::sms()),
            push: Arc::new(MockProviderChannel::push()),
        };
        let metrics = Arc::new(Metrics::new());
        let notifier = Notifier::with_channels(
            config,
            vec![
                Arc::new(LogChannel),
                channels.email.clone(),
                channels.sms.clone(),
                channels.push.clone(),
            ],
            metrics.clone(),
        );
        (notifier, channels, metrics)
    }

    fn deposit() -> LedgerEvent {
        LedgerEvent::DepositSucceeded {
            account_number: "ACC-1".to_string(),
            transaction_id: TransactionId::new(9),
            amount: dec!(100),
            balance: dec!(1100),
        }
    }

    #[tokio::test]
    async fn test_routing_follows_event_and_contacts() {
        let (notifier, channels, _) = notifier(NotificationConfig::default());
        notifier.register_contact(
            NotificationRecipient::new("ACC-1")
                .with_email("a@example.com")
                .with_phone("+620000")
                .with_device_token("dev-1"),
        );

        // Log, email and SMS.
        assert_eq!(notifier.notify(&deposit()).await, 3);
        assert_eq!(channels.email.outbox().len(), 1);
        assert_eq!(channels.sms.outbox().len(), 1);
        assert!(channels.push.outbox().is_empty());
        assert!(channels.email.outbox()[0].body.contains("amount=100.00"));
        assert_eq!(channels.email.outbox()[0].subject, "Deposit Successful");

        let captured = LedgerEvent::TransferCaptured {
            auth_code: "AUTH-12345678".into(),
            source_account: "ACC-1".to_string(),
            amount: dec!(5),
        };
        assert_eq!(notifier.notify(&captured).await, 2);
        assert_eq!(channels.push.outbox()[0].address, "dev-1");
        assert_eq!(channels.email.outbox().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_recipient_only_logged() {
        let (notifier, channels, _) = notifier(NotificationConfig::default());
        assert_eq!(notifier.notify(&deposit()).await, 1);
        assert!(channels.email.outbox().is_empty());
    }

    #[tokio::test]
    async fn test_pool_alert_goes_to_operations() {
        let (notifier, channels, _) = notifier(NotificationConfig::default());
        let alert = LedgerEvent::PoolLowBalance {
            account_number: "RECONCILIATION-POOL".to_string(),
            balance: dec!(50),
            threshold: dec!(10000),
        };
        assert_eq!(notifier.notify(&alert).await, 2);
        let sent = channels.email.outbox();
        assert_eq!(sent[0].address, "ops@corebank.local");
        assert_eq!(sent[0].subject, "Low Balance Alert");
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let (notifier, channels, metrics) = notifier(NotificationConfig::default());
        notifier.register_contact(NotificationRecipient::new("ACC-1").with_email("a@example.com"));
        channels.email.fail_with(Some("smtp down"));

        assert_eq!(notifier.notify(&deposit()).await, 1);
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.notifications_failed, 1);
        assert_eq!(snapshot.notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_channel_allow_list_and_kill_switch() {
        let config = NotificationConfig {
            channels: vec![ChannelKind::Email],
            ..Default::default()
        };
        let (notifier, channels, _) = notifier(config);
        notifier.register_contact(NotificationRecipient::new("ACC-1").with_email("a@example.com"));
        assert_eq!(notifier.notify(&deposit()).await, 1);
        assert_eq!(channels.email.outbox().len(), 1);

        let (off, _, _) = self::notifier(NotificationConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(off.notify(&deposit()).await, 0);
    }

    #[test]
    fn test_channel_kind_parse() {
        assert_eq!("sms".parse::<ChannelKind>(), Ok(ChannelKind::Sms));
        assert_eq!(ChannelKind::Push.to_string(), "PUSH");
        assert!("fax".parse::<ChannelKind>().is_err());
    }

    #[tokio::test]
    async fn test_spawned_notifier_drains_on_shutdown() {
        let (notifier, channels, _) = notifier(NotificationConfig::default());
        notifier.register_contact(NotificationRecipient::new("ACC-1").with_email("a@example.com"));
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(deposit()).unwrap();
        tx.send(deposit()).unwrap();
        let handle = Arc::new(notifier).spawn(rx, shutdown_rx);
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(channels.email.outbox().len(), 2);
    }
}
