//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

/// Simulated operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimOp {
    Transfer,
    CancelledTransfer,
    Deposit,
    Withdrawal,
}

/// Client-side view of a run.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total operations attempted.
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    per_op: BTreeMap<SimOp, u64>,
    /// Failures keyed by error code.
    errors: BTreeMap<String, u64>,
    /// Latency samples in microseconds.
    latency_samples: VecDeque<u64>,
    max_samples: usize,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            per_op: BTreeMap::new(),
            errors: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    pub fn record_success(&mut self, op: SimOp, latency_us: u64) {
        self.total += 1;
        self.succeeded += 1;
        *self.per_op.entry(op).or_default() += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    pub fn record_failure(&mut self, error_code: &str) {
        self.total += 1;
        self.failed += 1;
        *self.errors.entry(error_code.to_string()).or_default() += 1;
    }

    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        self.succeeded as f64 / self.total as f64
    }

    /// Operations per second over `elapsed_ms`.
    pub fn throughput(&self, elapsed_ms: u64) -> f64 {
        if elapsed_ms == 0 {
            return 0.0;
        }

        self.total as f64 * 1000.0 / elapsed_ms as f64
    }

    pub fn report(&self, elapsed_ms: u64) -> MetricsReport {
        MetricsReport {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            success_rate: self.success_rate(),
            throughput_per_sec: self.throughput(elapsed_ms),
            latency_avg_us: self.average_latency_us(),
            latency_p50_us: self.p50_latency_us(),
            latency_p99_us: self.p99_latency_us(),
            per_operation: self.per_op.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable summary of [`SimulationMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub throughput_per_sec: f64,
    pub latency_avg_us: u64,
    pub latency_p50_us: u64,
    pub latency_p99_us: u64,
    pub per_operation: BTreeMap<SimOp, u64>,
    pub errors: BTreeMap<String, u64>,
}
