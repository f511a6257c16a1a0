//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use cafeledger_common::{AccountId, LedgerError};
use cafeledger_ledger::{AuditReport, LedgerStore, Operation, Transaction};
use cafeledger_service::{LedgerService, ServiceError};

use crate::metrics::SimulationMetrics;
use crate::workload::WorkloadSpec;

/// Hook that makes an upcoming commit fail.
pub type FaultInjector = Arc<dyn Fn() + Send + Sync>;

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Seed the run was generated from.
    pub seed: u64,
    /// Wall-clock duration of the run.
    pub elapsed_secs: f64,
    /// Operations per second.
    pub throughput: f64,
    /// Average latency of committed operations.
    pub average_latency_us: u64,
    /// p50 latency of committed operations.
    pub p50_latency_us: u64,
    /// p99 latency of committed operations.
    pub p99_latency_us: u64,
    /// Outcome counters.
    pub metrics: SimulationMetrics,
    /// Sum of all balances after the run. Wider than a single balance.
    pub total_balance: i128,
    /// Reconciliation of the final state.
    pub audit: AuditReport,
}

/// Drives generated traffic through a [`LedgerService`].
pub struct SimulationController<S> {
    /// Service under test.
    service: Arc<LedgerService<S>>,
    /// Seed for reproducibility.
    seed: u64,
    /// Random number generator.
    rng: StdRng,
    /// Accounts opened by [`initialize`](Self::initialize).
    accounts: Vec<AccountId>,
    /// Optional fault hook.
    fault_injector: Option<FaultInjector>,
    /// Probability of arming the fault hook before an operation.
    fault_rate: f64,
    /// Simulation metrics.
    metrics: SimulationMetrics,
    /// Time spent in [`run`](Self::run).
    elapsed: Duration,
}

impl<S: LedgerStore + 'static> SimulationController<S> {
    /// Create a new simulation controller.
    pub fn new(service: Arc<LedgerService<S>>, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);

        Self {
            service,
            seed,
            rng: StdRng::seed_from_u64(seed),
            accounts: Vec::new(),
            fault_injector: None,
            fault_rate: 0.0,
            metrics: SimulationMetrics::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Arm `injector` before each operation with probability `rate`.
    pub fn with_faults(mut self, injector: FaultInjector, rate: f64) -> Self {
        self.fault_injector = Some(injector);
        self.fault_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Seed in use.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Accounts taking part in the simulation.
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }

    /// Open `count` accounts and fund each with `initial_deposit`.
    pub async fn initialize(&mut self, count: usize, initial_deposit: i64) -> anyhow::Result<()> {
        info!("Initializing simulation with {} accounts", count);

        for raw in 1..=count as i64 {
            let account_id = AccountId::new(raw);
            match self.service.open_account(account_id).await {
                Ok(()) => {}
                Err(LedgerError::AccountAlreadyExists(_)) => {
                    warn!(account_id = %account_id, "Account already exists, reusing it");
                }
                Err(e) => return Err(e.into()),
            }

            if initial_deposit > 0 {
                self.service
                    .execute(Operation::Deposit {
                        account_id,
                        amount: initial_deposit,
                    })
                    .await?;
            }

            self.accounts.push(account_id);
        }

        Ok(())
    }

    /// Run the generated workload with at most `concurrency` operations in flight.
    pub async fn run(&mut self, spec: &WorkloadSpec, concurrency: usize) -> anyhow::Result<()> {
        if spec.accounts.is_empty() {
            return Err(anyhow::anyhow!("Workload has no accounts"));
        }

        info!(
            workload = ?spec.workload,
            operations = spec.operations,
            concurrency,
            seed = self.seed,
            "Running simulation"
        );

        let operations = spec.generate(&mut self.rng);
        let faults: Vec<bool> = operations
            .iter()
            .map(|_| self.fault_injector.is_some() && self.rng.gen_bool(self.fault_rate))
            .collect();

        let start = Instant::now();
        let outcomes: Vec<(Result<Transaction, ServiceError>, Duration)> =
            stream::iter(operations.into_iter().zip(faults))
                .map(|(operation, fault)| {
                    let service = self.service.clone();
                    let injector = self.fault_injector.clone().filter(|_| fault);
                    async move {
                        if let Some(inject) = injector {
                            inject();
                        }
                        let started = Instant::now();
                        let outcome = service.execute(operation).await;
                        (outcome, started.elapsed())
                    }
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;
        self.elapsed += start.elapsed();

        for (outcome, latency) in outcomes {
            match outcome {
                Ok(_) => self.metrics.record_completed(latency.as_micros() as u64),
                Err(ServiceError::Ledger(e)) if e.is_business_rule() => {
                    self.metrics.record_rejected(e.error_code())
                }
                Err(_) => self.metrics.record_failed(),
            }
        }

        Ok(())
    }

    /// Audit the ledger and summarize the run.
    pub async fn finish(&self) -> anyhow::Result<SimulationReport> {
        let audit = self.service.audit().await?;

        let mut total_balance = 0i128;
        for account_id in &self.accounts {
            total_balance += i128::from(self.service.engine().balance(*account_id).await?);
        }

        let elapsed_secs = self.elapsed.as_secs_f64();
        Ok(SimulationReport {
            seed: self.seed,
            elapsed_secs,
            throughput: self.metrics.throughput(elapsed_secs),
            average_latency_us: self.metrics.average_latency_us(),
            p50_latency_us: self.metrics.p50_latency_us(),
            p99_latency_us: self.metrics.p99_latency_us(),
            metrics: self.metrics.clone(),
            total_balance,
            audit,
        })
    }
}
