#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use corebank_coordinator::{Coordinator, CoordinatorConfig};
use corebank_ledger::{InMemoryAuditLog, InMemoryLedgerStore, LedgerStore};
use rust_decimal::Decimal;

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<InMemoryLedgerStore>,
    pub audit: Arc<InMemoryAuditLog>,
}

/// Config with the background jobs off and fast retries.
pub fn test_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.node_id = Some("test-node".to_string());
    config.scheduler.hold_sweep_enabled = false;
    config.scheduler.eod_enabled = false;
    config.transaction.retry_backoff = Duration::from_millis(5);
    config
}

pub async fn started(config: CoordinatorConfig) -> Harness {
    let store = Arc::new(InMemoryLedgerStore::with_lock_wait_timeout(
        config.transaction.lock_wait_timeout,
    ));
    let audit = Arc::new(InMemoryAuditLog::new());
    let coordinator = Arc::new(Coordinator::with_store(config, store.clone(), audit.clone()));
    coordinator.start().await.unwrap();
    Harness {
        coordinator,
        store,
        audit,
    }
}

/// Move a balance without a posting, as a faulty writer would.
pub async fn drift(store: &InMemoryLedgerStore, account_number: &str, delta: Decimal) {
    let mut account = store.account_by_number(account_number).await.unwrap();
    account.balance += delta;
    account.available_balance = account.available_balance.map(|a| a + delta);
    store.force_update_account(account).unwrap();
}
