//! Metrics collection for ledger operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cafeledger_ledger::TransactionType;
use serde::Serialize;

/// Ledger service metrics.
#[derive(Default)]
pub struct Metrics {
    /// Total operations received.
    pub operations_total: AtomicU64,
    /// Deposits received.
    pub deposits: AtomicU64,
    /// Withdrawals received.
    pub withdrawals: AtomicU64,
    /// Transfers received.
    pub transfers: AtomicU64,
    /// Operations committed.
    pub operations_completed: AtomicU64,
    /// Operations rejected by a business rule.
    pub operations_rejected: AtomicU64,
    /// Operations failed on infrastructure (rolled back).
    pub operations_failed: AtomicU64,
    /// Operations currently executing.
    pub operations_in_flight: AtomicU64,
    /// Sum of committed amounts.
    pub volume: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation entering the engine.
    pub fn operation_started(&self, kind: TransactionType) {
        self.operations_total.fetch_add(1, Ordering::Relaxed);
        self.operations_in_flight.fetch_add(1, Ordering::Relaxed);

        let counter = match kind {
            TransactionType::Deposit => &self.deposits,
            TransactionType::Withdraw => &self.withdrawals,
            TransactionType::Transfer => &self.transfers,
            TransactionType::Invalid => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed operation.
    pub fn operation_completed(&self, amount: i64) {
        self.operations_completed.fetch_add(1, Ordering::Relaxed);
        self.operations_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.volume
            .fetch_add(amount.unsigned_abs(), Ordering::Relaxed);
    }

    /// Record a business-rule rejection.
    pub fn operation_rejected(&self) {
        self.operations_rejected.fetch_add(1, Ordering::Relaxed);
        self.operations_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an infrastructure failure.
    pub fn operation_failed(&self) {
        self.operations_failed.fetch_add(1, Ordering::Relaxed);
        self.operations_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_total: self.operations_total.load(Ordering::Relaxed),
            deposits: self.deposits.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
            operations_completed: self.operations_completed.load(Ordering::Relaxed),
            operations_rejected: self.operations_rejected.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            operations_in_flight: self.operations_in_flight.load(Ordering::Relaxed),
            volume: self.volume.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP cafeledger_operations_total Total ledger operations received
# TYPE cafeledger_operations_total counter
cafeledger_operations_total {}

# HELP cafeledger_operations_by_kind Ledger operations received by kind
# TYPE cafeledger_operations_by_kind counter
cafeledger_operations_by_kind{{kind="deposit"}} {}
cafeledger_operations_by_kind{{kind="withdraw"}} {}
cafeledger_operations_by_kind{{kind="transfer"}} {}

# HELP cafeledger_operations_completed Operations committed
# TYPE cafeledger_operations_completed counter
cafeledger_operations_completed {}

# HELP cafeledger_operations_rejected Operations rejected by a business rule
# TYPE cafeledger_operations_rejected counter
cafeledger_operations_rejected {}

# HELP cafeledger_operations_failed Operations rolled back on infrastructure failure
# TYPE cafeledger_operations_failed counter
cafeledger_operations_failed {}

# HELP cafeledger_operations_in_flight Operations currently executing
# TYPE cafeledger_operations_in_flight gauge
cafeledger_operations_in_flight {}

# HELP cafeledger_volume_total Sum of committed amounts in minor units
# TYPE cafeledger_volume_total counter
cafeledger_volume_total {}
"#,
            snapshot.operations_total,
            snapshot.deposits,
            snapshot.withdrawals,
            snapshot.transfers,
            snapshot.operations_completed,
            snapshot.operations_rejected,
            snapshot.operations_failed,
            snapshot.operations_in_flight,
            snapshot.volume,
        )
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub operations_total: u64,
    pub deposits: u64,
    pub withdrawals: u64,
    pub transfers: u64,
    pub operations_completed: u64,
    pub operations_rejected: u64,
    pub operations_failed: u64,
    pub operations_in_flight: u64,
    pub volume: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
