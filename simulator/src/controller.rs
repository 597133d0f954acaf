//! Simulation controller.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use corebank_common::{today_in, LedgerError};
use corebank_coordinator::{Coordinator, CoordinatorConfig, MetricsSnapshot};
use corebank_ledger::{
    AccountStatus, AccountTier, InMemoryLedgerStore, LedgerStore, ReportStatus, Severity,
    TracingAuditLog,
};

use crate::metrics::{MetricsReport, SimOp, SimulationMetrics};
use crate::scenario::{DriftInjection, Scenario};

/// Run parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub accounts: usize,
    pub workers: usize,
    /// Operations per worker.
    pub operations: usize,
    pub opening_balance: Decimal,
    pub seed: Option<u64>,
    pub scenario: Scenario,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            accounts: 10,
            workers: 4,
            operations: 200,
            opening_balance: Decimal::from(10_000),
            seed: None,
            scenario: Scenario::Mixed,
        }
    }
}

/// Money a worker moved in or out of the customer accounts.
#[derive(Debug, Clone, Copy, Default)]
struct WorkerTotals {
    deposits: Decimal,
    withdrawals: Decimal,
    /// Captured transfers whose settlement failed.
    in_flight: Decimal,
}

impl WorkerTotals {
    fn merge(&mut self, other: WorkerTotals) {
        self.deposits += other.deposits;
        self.withdrawals += other.withdrawals;
        self.in_flight += other.in_flight;
    }
}

/// Conservation check over the customer accounts.
#[derive(Debug, Clone, Serialize)]
pub struct ConservationCheck {
    pub opening_total: Decimal,
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub in_flight: Decimal,
    pub expected_total: Decimal,
    pub actual_total: Decimal,
    /// Accounts whose available balance is not balance minus holds.
    pub inconsistent_accounts: Vec<String>,
    pub negative_accounts: Vec<String>,
    pub ok: bool,
}

/// State of an account after the drift response.
#[derive(Debug, Clone, Serialize)]
pub struct DriftOutcome {
    pub account_number: String,
    pub injected: Decimal,
    pub balance: Decimal,
    pub status: AccountStatus,
    pub reconciliation_blocked: bool,
    pub tier: Option<AccountTier>,
    pub pending_correction: Option<Decimal>,
}

/// Reconciliation result as seen by the simulator.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub date: NaiveDate,
    pub status: ReportStatus,
    pub system_balanced: bool,
    pub total_discrepancies: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
    pub auto_corrected: usize,
    pub pool_balance: Decimal,
}

/// Everything printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub scenario: Scenario,
    pub seed: u64,
    pub accounts: usize,
    pub workers: usize,
    pub elapsed_ms: u64,
    pub client: MetricsReport,
    pub conservation: ConservationCheck,
    pub drift: Vec<DriftOutcome>,
    pub reconciliation: ReconciliationSummary,
    pub coordinator: MetricsSnapshot,
}

/// Drives a coordinator with concurrent random workloads.
pub struct SimulationController {
    config: SimulationConfig,
    seed: u64,
    coordinator: Arc<Coordinator>,
    store: Arc<InMemoryLedgerStore>,
    accounts: Arc<Vec<String>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    pub fn new(config: SimulationConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);

        let mut coordinator_config = CoordinatorConfig::default();
        coordinator_config.node_id = Some(format!("simulator-{}", seed));
        coordinator_config.scheduler.hold_sweep_enabled = false;
        coordinator_config.scheduler.eod_enabled = false;
        coordinator_config.notification.enabled = false;

        let store = Arc::new(InMemoryLedgerStore::with_lock_wait_timeout(
            coordinator_config.transaction.lock_wait_timeout,
        ));
        let coordinator = Arc::new(Coordinator::with_store(
            coordinator_config,
            store.clone(),
            Arc::new(TracingAuditLog),
        ));

        let accounts = (1..=config.accounts)
            .map(|i| format!("SIM-{:04}", i))
            .collect();

        Self {
            config,
            seed,
            coordinator,
            store,
            accounts: Arc::new(accounts),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Start the coordinator and open the funded accounts.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        if self.accounts.len() < 2 {
            anyhow::bail!("at least two accounts are required");
        }
        self.coordinator.start().await?;

        for number in self.accounts.iter() {
            self.coordinator
                .open_account(number, self.config.opening_balance)
                .await?;
        }
        info!(
            accounts = self.accounts.len(),
            opening_balance = %self.config.opening_balance,
            "Accounts opened"
        );
        Ok(())
    }

    /// Run the workload, check invariants, apply drift and reconcile.
    pub async fn run(&self) -> anyhow::Result<SimulationSummary> {
        let scenario = self.config.scenario;
        info!(
            scenario = scenario.name(),
            seed = self.seed,
            workers = self.config.workers,
            "Running scenario: {}",
            scenario.description()
        );

        let started = Instant::now();
        let handles: Vec<_> = (0..self.config.workers)
            .map(|worker| {
                let coordinator = Arc::clone(&self.coordinator);
                let accounts = Arc::clone(&self.accounts);
                let metrics = Arc::clone(&self.metrics);
                let rng = StdRng::seed_from_u64(self.seed.wrapping_add(worker as u64));
                let operations = self.config.operations;
                let hot = scenario.hot_account();
                tokio::spawn(async move {
                    run_worker(coordinator, accounts, metrics, rng, operations, hot).await
                })
            })
            .collect();

        let mut totals = WorkerTotals::default();
        for result in futures::future::join_all(handles).await {
            totals.merge(result?);
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let conservation = self.check_conservation(totals).await?;
        if conservation.ok {
            info!(total = %conservation.actual_total, "Conservation holds");
        } else {
            warn!(
                expected = %conservation.expected_total,
                actual = %conservation.actual_total,
                "Conservation violated"
            );
        }

        let injections = scenario.drift();
        for injection in &injections {
            self.inject(injection).await?;
        }

        let reconciliation = self.reconcile().await?;

        let mut drift = Vec::with_capacity(injections.len());
        for injection in &injections {
            drift.push(self.outcome(injection).await?);
        }

        let client = self.metrics.read().await.report(elapsed_ms);
        Ok(SimulationSummary {
            scenario,
            seed: self.seed,
            accounts: self.accounts.len(),
            workers: self.config.workers,
            elapsed_ms,
            client,
            conservation,
            drift,
            reconciliation,
            coordinator: self.coordinator.metrics(),
        })
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.coordinator.stop().await?;
        Ok(())
    }

    async fn check_conservation(&self, totals: WorkerTotals) -> anyhow::Result<ConservationCheck> {
        let opening_total = self.config.opening_balance * Decimal::from(self.accounts.len());
        let expected_total = opening_total + totals.deposits - totals.withdrawals;

        let mut actual_total = Decimal::ZERO;
        let mut inconsistent_accounts = Vec::new();
        let mut negative_accounts = Vec::new();
        for number in self.accounts.iter() {
            let view = self.coordinator.account(number).await?;
            actual_total += view.balance.balance;
            if !view.balance.is_consistent() {
                inconsistent_accounts.push(number.clone());
            }
            if view.balance.balance < Decimal::ZERO || view.balance.available_balance < Decimal::ZERO
            {
                negative_accounts.push(number.clone());
            }
        }

        let ok = actual_total + totals.in_flight == expected_total
            && inconsistent_accounts.is_empty()
            && negative_accounts.is_empty();
        Ok(ConservationCheck {
            opening_total,
            deposits: totals.deposits,
            withdrawals: totals.withdrawals,
            in_flight: totals.in_flight,
            expected_total,
            actual_total,
            inconsistent_accounts,
            negative_accounts,
            ok,
        })
    }

    /// Move a balance behind the ledger's back.
    async fn inject(&self, injection: &DriftInjection) -> anyhow::Result<()> {
        let number = self.account_number(injection)?;
        let delta = Decimal::new(injection.delta_cents, 2);
        let mut account = self.store.account_by_number(number).await?;
        account.balance += delta;
        account.available_balance = account.available_balance.map(|a| a + delta);
        self.store.force_update_account(account)?;
        warn!(account = %number, delta = %delta, "Injected balance drift");
        Ok(())
    }

    async fn reconcile(&self) -> anyhow::Result<ReconciliationSummary> {
        let date = today_in(self.coordinator.config().reconciliation.timezone);
        let report = self.coordinator.run_reconciliation(date).await?;
        let found = self.coordinator.discrepancies(report.id, None).await?;

        let count = |severity: Severity| found.iter().filter(|d| d.severity == severity).count();
        let pool_number = &self.coordinator.config().reconciliation.pool.account_number;
        let pool_balance = self.coordinator.account(pool_number).await?.balance.balance;

        Ok(ReconciliationSummary {
            date,
            status: report.status,
            system_balanced: report.system_balanced,
            total_discrepancies: report.total_discrepancies,
            low: count(Severity::Low),
            medium: count(Severity::Medium),
            high: count(Severity::High),
            critical: count(Severity::Critical),
            auto_corrected: found.iter().filter(|d| d.auto_corrected).count(),
            pool_balance,
        })
    }

    async fn outcome(&self, injection: &DriftInjection) -> anyhow::Result<DriftOutcome> {
        let number = self.account_number(injection)?;
        let view = self.coordinator.account(number).await?;
        Ok(DriftOutcome {
            account_number: number.clone(),
            injected: Decimal::new(injection.delta_cents, 2),
            balance: view.balance.balance,
            status: view.balance.status,
            reconciliation_blocked: view.balance.reconciliation_blocked,
            tier: view.limits.map(|l| l.tier),
            pending_correction: view.balance.pending_correction,
        })
    }

    fn account_number(&self, injection: &DriftInjection) -> anyhow::Result<&String> {
        self.accounts
            .get(injection.account)
            .ok_or_else(|| anyhow::anyhow!("drift targets missing account {}", injection.account))
    }
}

/// One worker's share of the workload.
async fn run_worker(
    coordinator: Arc<Coordinator>,
    accounts: Arc<Vec<String>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
    mut rng: StdRng,
    operations: usize,
    hot: bool,
) -> WorkerTotals {
    let mut totals = WorkerTotals::default();

    for _ in 0..operations {
        let amount = Decimal::new(rng.gen_range(100..=50_000), 2);
        let source = if hot { 0 } else { rng.gen_range(0..accounts.len()) };
        let mut destination = rng.gen_range(0..accounts.len() - 1);
        if destination >= source {
            destination += 1;
        }
        let roll = rng.gen_range(0..100);

        let started = Instant::now();
        let outcome = match roll {
            0..=44 => transfer(&coordinator, &accounts[source], &accounts[destination], amount, &mut totals)
                .await
                .map(|_| SimOp::Transfer),
            45..=59 => cancelled_transfer(&coordinator, &accounts[source], &accounts[destination], amount)
                .await
                .map(|_| SimOp::CancelledTransfer),
            60..=79 => coordinator
                .deposit(&accounts[source], amount)
                .await
                .map(|_| {
                    totals.deposits += amount;
                    SimOp::Deposit
                }),
            _ => coordinator
                .withdraw(&accounts[source], amount)
                .await
                .map(|_| {
                    totals.withdrawals += amount;
                    SimOp::Withdrawal
                }),
        };
        let latency_us = started.elapsed().as_micros() as u64;

        let mut metrics = metrics.write().await;
        match outcome {
            Ok(op) => metrics.record_success(op, latency_us),
            Err(e) => metrics.record_failure(e.error_code()),
        }
    }

    totals
}

/// Authorize, capture and settle.
async fn transfer(
    coordinator: &Coordinator,
    source: &str,
    destination: &str,
    amount: Decimal,
    totals: &mut WorkerTotals,
) -> Result<(), LedgerError> {
    let receipt = coordinator.authorize(source, destination, amount, None).await?;
    let auth_code = receipt
        .auth_code()
        .cloned()
        .ok_or_else(|| LedgerError::Internal("authorization without code".to_string()))?;

    if let Err(e) = coordinator.capture(&auth_code).await {
        // Release the hold so the funds do not stay locked until expiry.
        let _ = coordinator.cancel(&auth_code).await;
        return Err(e);
    }
    if let Err(e) = coordinator.settle(&auth_code).await {
        totals.in_flight += amount;
        return Err(e);
    }
    Ok(())
}

/// Authorize, then change our mind.
async fn cancelled_transfer(
    coordinator: &Coordinator,
    source: &str,
    destination: &str,
    amount: Decimal,
) -> Result<(), LedgerError> {
    let receipt = coordinator.authorize(source, destination, amount, None).await?;
    let auth_code = receipt
        .auth_code()
        .cloned()
        .ok_or_else(|| LedgerError::Internal("authorization without code".to_string()))?;
    coordinator.cancel(&auth_code).await?;
    Ok(())
}
