//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

/// Simulation metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Total operations attempted.
    pub total_operations: u64,
    /// Successful operations.
    pub successful_operations: u64,
    /// Failed operations.
    pub failed_operations: u64,
    /// Failures keyed by error code.
    pub failures_by_code: BTreeMap<&'static str, u64>,
    /// Minor units credited by successful top-ups.
    pub deposited: u64,
    /// Minor units debited by successful withdrawals.
    pub withdrawn: u64,
    /// Latency samples (microseconds).
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            failures_by_code: BTreeMap::new(),
            deposited: 0,
            withdrawn: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a successful operation.
    pub fn record_success(&mut self, latency_us: u64) {
        self.total_operations += 1;
        self.successful_operations += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    /// Record a failed operation.
    pub fn record_failure(&mut self, code: &'static str) {
        self.total_operations += 1;
        self.failed_operations += 1;
        *self.failures_by_code.entry(code).or_default() += 1;
    }

    /// Count a committed top-up.
    pub fn record_deposit(&mut self, amount: u64) {
        self.deposited += amount;
    }

    /// Count a committed withdrawal.
    pub fn record_withdrawal(&mut self, amount: u64) {
        self.withdrawn += amount;
    }

    /// Failures with the given error code.
    pub fn failures(&self, code: &str) -> u64 {
        self.failures_by_code.get(code).copied().unwrap_or(0)
    }

    /// Get average latency in microseconds.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
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

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.successful_operations as f64 / self.total_operations as f64
    }

    /// Operations per second over `elapsed_secs`.
    pub fn throughput(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }

        self.total_operations as f64 / elapsed_secs
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
