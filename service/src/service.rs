//! Ledger service: the boundary between the request layer and the engine.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use cafeledger_common::{AccountId, Deadline, LedgerError, Result};
use cafeledger_ledger::{AuditReport, LedgerEngine, LedgerStore, Operation, Transaction};

use crate::config::ServiceConfig;
use crate::metrics::{Metrics, SharedMetrics};
use crate::request::{LedgerRequest, LedgerResponse, RequestError, RequestKind};
use crate::state::ServiceState;

/// Failure surfaced by [`LedgerService::execute`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The service is not running.
    #[error("Ledger service is not accepting requests")]
    Unavailable,
    /// The engine refused or failed the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Request-layer facade over a [`LedgerEngine`].
///
/// Applies the configured deadline to every operation, bounds the number of
/// operations in flight, records metrics, and refuses work unless running.
pub struct LedgerService<S> {
    /// Configuration.
    config: ServiceConfig,
    /// The engine.
    engine: LedgerEngine<S>,
    /// Current service state.
    state: Arc<RwLock<ServiceState>>,
    /// Operation metrics.
    metrics: SharedMetrics,
    /// One permit per operation allowed in flight.
    permits: Arc<Semaphore>,
}

impl<S: LedgerStore> LedgerService<S> {
    /// Create a new service instance.
    pub fn new(config: ServiceConfig, engine: LedgerEngine<S>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight));

        Self {
            config,
            engine,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            metrics: Arc::new(Metrics::new()),
            permits,
        }
    }

    /// Start accepting requests.
    pub fn start(&self) {
        if !self.transition(ServiceState::Running) {
            return;
        }
        info!(
            max_in_flight = self.config.max_in_flight,
            operation_timeout_ms = self.config.operation_timeout.as_millis() as u64,
            "Ledger service started"
        );
    }

    /// Stop accepting requests and wait for in-flight operations to finish.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if !self.transition(ServiceState::ShuttingDown) {
            return;
        }
        info!("Stopping ledger service");

        // Every permit back means nothing is in flight.
        let all = self.config.max_in_flight as u32;
        match tokio::time::timeout(self.config.drain_timeout, self.permits.acquire_many(all)).await {
            Ok(_) => info!("In-flight operations drained"),
            Err(_) => warn!(
                in_flight = self.metrics.snapshot().operations_in_flight,
                "Drain timed out; in-flight operations roll back at their deadline"
            ),
        }
        self.permits.close();

        self.transition(ServiceState::Stopped);
        info!("Ledger service stopped");
    }

    fn transition(&self, next: ServiceState) -> bool {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Ignoring lifecycle transition");
            return false;
        }
        *state = next;
        true
    }

    /// Check if the service is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Get the current service state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Operation metrics.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Operations allowed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.config.max_in_flight
    }

    /// The underlying engine.
    pub fn engine(&self) -> &LedgerEngine<S> {
        &self.engine
    }

    /// Handle a request from the request layer.
    pub async fn handle(&self, request: LedgerRequest) -> LedgerResponse {
        if !self.is_accepting_requests() {
            return LedgerResponse::unavailable();
        }

        let operation = match request.operation() {
            Ok(operation) => operation,
            Err(err) => {
                info!(error = %err, "Malformed request");
                return LedgerResponse::malformed(&err);
            }
        };

        if let Some(operation) = operation {
            return match self.execute(operation).await {
                Ok(transaction) => LedgerResponse::Completed { transaction },
                Err(ServiceError::Unavailable) => LedgerResponse::unavailable(),
                Err(ServiceError::Ledger(err)) => LedgerResponse::from_error(&err),
            };
        }

        let account_id = match request.account_id.resolve() {
            Ok(account_id) => account_id,
            Err(err) => return LedgerResponse::malformed(&err),
        };

        let outcome = match request.kind {
            RequestKind::OpenAccount => self
                .engine
                .open_account(account_id)
                .await
                .map(|account| LedgerResponse::Account { account }),
            RequestKind::Balance => self
                .engine
                .account(account_id)
                .await
                .map(|account| LedgerResponse::Account { account }),
            RequestKind::History => self
                .engine
                .history(account_id)
                .await
                .map(|transactions| LedgerResponse::History { transactions }),
            RequestKind::Deposit | RequestKind::Withdraw | RequestKind::Transfer => {
                return LedgerResponse::malformed(&RequestError::Malformed(format!(
                    "{:?} request without an operation",
                    request.kind
                )))
            }
        };

        outcome.unwrap_or_else(|err| LedgerResponse::from_error(&err))
    }

    /// Execute one balance-affecting operation under the configured deadline.
    pub async fn execute(&self, operation: Operation) -> std::result::Result<Transaction, ServiceError> {
        if !self.is_accepting_requests() {
            return Err(ServiceError::Unavailable);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ServiceError::Unavailable)?;

        // The deadline covers the unit itself, not the wait for a permit.
        let deadline = Deadline::after(self.config.operation_timeout);

        self.metrics.operation_started(operation.transaction_type());
        let outcome = self.engine.execute(operation, deadline).await;

        match &outcome {
            Ok(transaction) => self.metrics.operation_completed(transaction.amount),
            Err(err) if err.is_business_rule() => self.metrics.operation_rejected(),
            Err(_) => self.metrics.operation_failed(),
        }

        Ok(outcome?)
    }

    /// Open a new account.
    pub async fn open_account(&self, account_id: AccountId) -> Result<()> {
        self.engine.open_account(account_id).await.map(|_| ())
    }

    /// Reconcile the ledger.
    pub async fn audit(&self) -> Result<AuditReport> {
        self.engine.audit().await
    }
}
