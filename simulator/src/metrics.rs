//! Simulation metrics.

use std::collections::BTreeMap;

use serde::Serialize;

/// Outcome counters and latency samples for one simulation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationMetrics {
    /// Operations attempted.
    pub total_operations: u64,
    /// Operations committed.
    pub completed: u64,
    /// Business-rule rejections by error code.
    pub rejected: BTreeMap<String, u64>,
    /// Infrastructure failures (rolled back).
    pub failed: u64,
    /// Latency samples in microseconds.
    #[serde(skip)]
    latency_samples: Vec<u64>,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed operation.
    pub fn record_completed(&mut self, latency_us: u64) {
        self.total_operations += 1;
        self.completed += 1;
        self.latency_samples.push(latency_us);
    }

    /// Record a rejected operation.
    pub fn record_rejected(&mut self, code: &str) {
        self.total_operations += 1;
        *self.rejected.entry(code.to_string()).or_insert(0) += 1;
    }

    /// Record an operation that failed and rolled back.
    pub fn record_failed(&mut self) {
        self.total_operations += 1;
        self.failed += 1;
    }

    /// Total rejections.
    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
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

        let mut sorted = self.latency_samples.clone();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get throughput (operations per second).
    pub fn throughput(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }

        self.total_operations as f64 / elapsed_secs
    }
}
