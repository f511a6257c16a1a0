//! Core ledger engine implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use cafeledger_common::{AccountId, Deadline, LedgerError, Result, TransactionId};

use crate::account::Account;
use crate::audit::{reconcile, AuditReport};
use crate::operation::Operation;
use crate::store::{AtomicUnit, LedgerStore};
use crate::transaction::Transaction;

/// The ledger engine executes deposits, withdrawals and transfers.
///
/// It is the only writer of account balances. Each operation runs as exactly
/// one atomic unit of the backing store: the involved rows are read for
/// update, the operation is checked against the locked balances, then the
/// transaction row is appended and the balances adjusted before commit. The
/// engine itself holds no locks and no mutable state, so one instance can be
/// shared by any number of concurrent callers.
pub struct LedgerEngine<S> {
    /// Backing store.
    store: Arc<S>,
}

impl<S> Clone for LedgerEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Create a new ledger engine.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Credit `account_id` by `amount`.
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: i64,
        deadline: Deadline,
    ) -> Result<Transaction> {
        self.execute(Operation::Deposit { account_id, amount }, deadline)
            .await
    }

    /// Debit `account_id` by `amount`.
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: i64,
        deadline: Deadline,
    ) -> Result<Transaction> {
        self.execute(Operation::Withdraw { account_id, amount }, deadline)
            .await
    }

    /// Move `amount` from `sender_id` to `receiver_id`.
    pub async fn transfer(
        &self,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: i64,
        deadline: Deadline,
    ) -> Result<Transaction> {
        self.execute(
            Operation::Transfer {
                sender_id,
                receiver_id,
                amount,
            },
            deadline,
        )
        .await
    }

    /// Execute one operation as a single atomic unit.
    ///
    /// On success the committed transaction is returned. On any error no
    /// transaction row exists and no balance changed. `deadline` bounds the
    /// work up to the commit: if it elapses while rows are being locked or
    /// staged, the unit is dropped, which rolls it back, and the caller gets
    /// an internal error that is safe to retry. A commit that has been sent
    /// always runs to completion.
    #[instrument(
        skip(self, operation, deadline),
        fields(
            kind = %operation.transaction_type(),
            sender = %operation.sender(),
            receiver = %operation.receiver(),
            amount = operation.amount(),
        )
    )]
    pub async fn execute(&self, operation: Operation, deadline: Deadline) -> Result<Transaction> {
        operation.validate()?;

        let transaction_id = TransactionId::new();
        let outcome = self.run_unit(&operation, transaction_id, deadline).await;

        match &outcome {
            Ok(transaction) => {
                info!(transaction_id = %transaction.id, "Operation committed");
            }
            Err(err) if err.is_business_rule() => {
                info!(code = err.error_code(), reason = %err, "Operation rejected");
            }
            Err(err) => {
                error!(
                    transaction_id = %transaction_id,
                    error = %err,
                    "Operation failed, unit rolled back"
                );
            }
        }

        outcome
    }

    /// Open a new account with a zero balance.
    #[instrument(skip(self))]
    pub async fn open_account(&self, account_id: AccountId) -> Result<Account> {
        let account = self.store.open_account(account_id).await?;
        info!(account = %account_id, "Account opened");
        Ok(account)
    }

    /// Get an account.
    pub async fn account(&self, account_id: AccountId) -> Result<Account> {
        self.store
            .account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Get the committed balance of an account.
    pub async fn balance(&self, account_id: AccountId) -> Result<i64> {
        Ok(self.account(account_id).await?.balance)
    }

    /// Get a transaction by ID.
    pub async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.store.get_by_id(id).await
    }

    /// Every transaction touching `account_id`.
    pub async fn history(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.ensure_exists(account_id).await?;
        self.store.get_by_sender_or_receiver(account_id).await
    }

    /// Transactions sent by `account_id`.
    pub async fn sent(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.ensure_exists(account_id).await?;
        self.store.get_by_sender(account_id).await
    }

    /// Transactions received by `account_id`.
    pub async fn received(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.ensure_exists(account_id).await?;
        self.store.get_by_receiver(account_id).await
    }

    /// Reconcile every balance against the transaction log.
    #[instrument(skip(self))]
    pub async fn audit(&self) -> Result<AuditReport> {
        let accounts = self.store.accounts().await?;
        let transactions = self.store.all().await?;
        let report = reconcile(&accounts, &transactions);

        if report.is_consistent() {
            info!(
                accounts = report.accounts_checked,
                transactions = report.transactions_checked,
                "Ledger consistent"
            );
        } else {
            warn!(
                discrepancies = report.discrepancies.len(),
                negative = report.negative_balances.len(),
                orphaned = report.orphaned_transactions.len(),
                "Ledger inconsistent"
            );
        }

        Ok(report)
    }

    // --- Private methods ---

    async fn ensure_exists(&self, account_id: AccountId) -> Result<()> {
        if self.store.account_exists(account_id).await? {
            Ok(())
        } else {
            Err(LedgerError::AccountNotFound(account_id))
        }
    }

    async fn run_unit(
        &self,
        operation: &Operation,
        transaction_id: TransactionId,
        deadline: Deadline,
    ) -> Result<Transaction> {
        let prepared = self.prepare(operation, transaction_id);

        let (unit, transaction) = match deadline.instant() {
            Some(at) => tokio::time::timeout_at(tokio::time::Instant::from_std(at), prepared)
                .await
                .map_err(|_| {
                    LedgerError::internal(format!(
                        "deadline exceeded before transaction {transaction_id} was staged"
                    ))
                })??,
            None => prepared.await?,
        };

        // Cutting a commit short would leave its outcome unknown to the caller.
        unit.commit().await?;
        Ok(transaction)
    }

    /// Open a unit and stage `operation` in it, ready to commit.
    async fn prepare(
        &self,
        operation: &Operation,
        transaction_id: TransactionId,
    ) -> Result<(S::Unit, Transaction)> {
        let mut unit = self.store.begin().await?;

        match Self::apply(&mut unit, operation, transaction_id).await {
            Ok(transaction) => Ok((unit, transaction)),
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn apply(
        unit: &mut S::Unit,
        operation: &Operation,
        transaction_id: TransactionId,
    ) -> Result<Transaction> {
        let amount = operation.amount();

        let mut balances = BTreeMap::new();
        for account_id in operation.lock_order() {
            let balance = unit
                .balance_for_update(account_id)
                .await?
                .ok_or(LedgerError::AccountNotFound(account_id))?;
            balances.insert(account_id, balance);
        }
        debug!(?balances, "Rows locked");

        let locked = |account_id: AccountId| {
            balances.get(&account_id).copied().ok_or_else(|| {
                LedgerError::internal(format!("row for account {account_id} was not locked"))
            })
        };

        if let Some(sender) = operation.debited() {
            let available = locked(sender)?;
            if available < amount {
                return Err(LedgerError::InsufficientBalance {
                    account_id: sender,
                    required: amount,
                    available,
                });
            }
        }

        if let Some(receiver) = operation.credited() {
            if locked(receiver)?.checked_add(amount).is_none() {
                return Err(LedgerError::InvalidAmount { amount });
            }
        }

        let transaction = Transaction::new(
            transaction_id,
            operation.transaction_type(),
            operation.sender(),
            operation.receiver(),
            amount,
        );
        unit.append(&transaction).await?;

        if let Some(sender) = operation.debited() {
            unit.adjust_balance(sender, -amount).await?;
        }
        if let Some(receiver) = operation.credited() {
            unit.adjust_balance(receiver, amount).await?;
        }

        Ok(transaction)
    }
}
