//! Service configuration.

use std::time::Duration;

use chrono::NaiveTime;
use corebank_common::{constants, RetryPolicy};
use corebank_reconciliation::ReconciliationConfig;

use crate::notification::ChannelKind;

/// Transaction execution configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionConfig {
    /// Per-attempt timeout of a money-moving operation.
    pub operation_timeout: Duration,
    /// How long a row-lock wait may take before it counts as a conflict.
    pub lock_wait_timeout: Duration,
    /// Maximum attempts on lock conflict, including the first.
    pub retry_max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_backoff: Duration,
    /// Lifetime of a transfer authorization and its hold.
    pub authorization_ttl: chrono::Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            operation_timeout: constants::transaction_timeout(),
            lock_wait_timeout: constants::lock_wait_timeout(),
            retry_max_attempts: 5,
            retry_backoff: Duration::from_millis(100),
            authorization_ttl: constants::authorization_ttl(),
        }
    }
}

impl TransactionConfig {
    /// Retry policy for lock conflicts.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, self.retry_backoff)
    }
}

/// Background job configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Run the hold-expiration sweep.
    pub hold_sweep_enabled: bool,
    /// Interval of the hold-expiration sweep.
    pub hold_sweep_interval: Duration,
    /// Run end-of-day reconciliation.
    pub eod_enabled: bool,
    /// Local time of the end-of-day run.
    pub eod_time: NaiveTime,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hold_sweep_enabled: true,
            hold_sweep_interval: constants::hold_sweep_interval(),
            eod_enabled: true,
            eod_time: NaiveTime::default(),
        }
    }
}

/// Notification configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    /// Deliver notifications at all.
    pub enabled: bool,
    /// Channels allowed to send.
    pub channels: Vec<ChannelKind>,
    /// Recipient of operational alerts such as pool low balance.
    pub operations_email: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec![
                ChannelKind::Log,
                ChannelKind::Email,
                ChannelKind::Sms,
                ChannelKind::Push,
            ],
            operations_email: Some("ops@corebank.local".to_string()),
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Node name used in logs.
    pub node_id: Option<String>,
    /// Transaction execution.
    pub transaction: TransactionConfig,
    /// Background jobs.
    pub scheduler: SchedulerConfig,
    /// Notifications.
    pub notification: NotificationConfig,
    /// Reconciliation and response policy.
    pub reconciliation: ReconciliationConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            transaction: TransactionConfig::default(),
            scheduler: SchedulerConfig::default(),
            notification: NotificationConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            reconciliation: ReconciliationConfig::from_env(),
            ..Self::default()
        };

        if let Ok(id) = std::env::var("COREBANK_NODE_ID") {
            config.node_id = Some(id);
        }

        if let Some(timeout) = env_millis("COREBANK_OPERATION_TIMEOUT_MS") {
            config.transaction.operation_timeout = timeout;
        }
        if let Some(wait) = env_millis("COREBANK_LOCK_WAIT_MS") {
            config.transaction.lock_wait_timeout = wait;
        }
        if let Ok(attempts) = std::env::var("COREBANK_RETRY_MAX_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                config.transaction.retry_max_attempts = attempts;
            }
        }
        if let Some(backoff) = env_millis("COREBANK_RETRY_BACKOFF_MS") {
            config.transaction.retry_backoff = backoff;
        }
        if let Ok(hours) = std::env::var("COREBANK_AUTHORIZATION_TTL_HOURS") {
            if let Ok(hours) = hours.parse() {
                config.transaction.authorization_ttl = chrono::Duration::hours(hours);
            }
        }

        if let Some(interval) = env_millis("COREBANK_HOLD_SWEEP_INTERVAL_MS") {
            config.scheduler.hold_sweep_interval = interval;
        }
        if let Ok(flag) = std::env::var("COREBANK_EOD_ENABLED") {
            if let Ok(flag) = flag.parse() {
                config.scheduler.eod_enabled = flag;
            }
        }
        if let Ok(at) = std::env::var("COREBANK_EOD_TIME") {
            if let Ok(at) = NaiveTime::parse_from_str(at.trim(), "%H:%M") {
                config.scheduler.eod_time = at;
            }
        }

        if let Ok(flag) = std::env::var("COREBANK_NOTIFICATIONS_ENABLED") {
            if let Ok(flag) = flag.parse() {
                config.notification.enabled = flag;
            }
        }
        if let Ok(list) = std::env::var("COREBANK_NOTIFICATION_CHANNELS") {
            config.notification.channels = list
                .split(',')
                .filter_map(|name| name.trim().parse().ok())
                .collect();
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.transaction.operation_timeout.is_zero() {
            return Err("Operation timeout cannot be 0".to_string());
        }

        if self.transaction.lock_wait_timeout > self.transaction.operation_timeout {
            return Err("Lock wait timeout cannot exceed operation timeout".to_string());
        }

        if self.transaction.retry_max_attempts == 0 {
            return Err("Retry attempts must be at least 1".to_string());
        }

        if self.transaction.authorization_ttl <= chrono::Duration::zero() {
            return Err("Authorization TTL must be positive".to_string());
        }

        if self.scheduler.hold_sweep_enabled && self.scheduler.hold_sweep_interval.is_zero() {
            return Err("Hold sweep interval cannot be 0".to_string());
        }

        self.reconciliation.validate()
    }
}
