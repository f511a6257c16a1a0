//! Storage contracts consumed by the ledger engine.
//!
//! A store is split along the atomic-unit boundary. [`AccountStore`] and
//! [`TransactionLog`] are store-level reads that never take row locks and may
//! lag behind units that are still in flight. [`AtomicUnit`] is everything the
//! engine does while a unit is open: balance reads that lock the row, balance
//! adjustments, and log appends, all of which become visible together on
//! [`AtomicUnit::commit`] or not at all.

use async_trait::async_trait;

use cafeledger_common::{AccountId, Result, TransactionId};

use crate::account::Account;
use crate::transaction::Transaction;

/// Work performed inside one atomic unit.
///
/// Dropping a unit without calling [`commit`](AtomicUnit::commit) rolls it
/// back, which is what happens when an operation's deadline elapses.
#[async_trait]
pub trait AtomicUnit: Send {
    /// Read the balance of `account_id` and lock its row until the unit ends.
    ///
    /// Concurrent units asking for the same row wait until this unit commits
    /// or rolls back. Returns `None` if the account does not exist.
    async fn balance_for_update(&mut self, account_id: AccountId) -> Result<Option<i64>>;

    /// Apply `delta` to the balance of `account_id` within this unit.
    async fn adjust_balance(&mut self, account_id: AccountId, delta: i64) -> Result<()>;

    /// Append a transaction row within this unit.
    async fn append(&mut self, transaction: &Transaction) -> Result<()>;

    /// Make every change of this unit visible at once.
    async fn commit(self) -> Result<()>;

    /// Discard every change of this unit.
    async fn rollback(self) -> Result<()>;
}

/// Store-level account reads and account opening.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Open a new account with a zero balance.
    async fn open_account(&self, account_id: AccountId) -> Result<Account>;

    /// Check whether an account exists.
    async fn account_exists(&self, account_id: AccountId) -> Result<bool>;

    /// Get an account by ID.
    async fn account(&self, account_id: AccountId) -> Result<Option<Account>>;

    /// List every account, ordered by ID.
    async fn accounts(&self) -> Result<Vec<Account>>;
}

/// Read-only queries over the append-only transaction log.
///
/// Every list is ordered by creation time, then ID.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Get a transaction by ID.
    async fn get_by_id(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Transactions where `account_id` is the sender.
    async fn get_by_sender(&self, account_id: AccountId) -> Result<Vec<Transaction>>;

    /// Transactions where `account_id` is the receiver.
    async fn get_by_receiver(&self, account_id: AccountId) -> Result<Vec<Transaction>>;

    /// Transactions where `account_id` is on either side.
    async fn get_by_sender_or_receiver(&self, account_id: AccountId) -> Result<Vec<Transaction>>;

    /// The whole log.
    async fn all(&self) -> Result<Vec<Transaction>>;
}

/// A complete backing store for the engine.
#[async_trait]
pub trait LedgerStore: AccountStore + TransactionLog {
    /// Unit type opened by [`begin`](LedgerStore::begin).
    type Unit: AtomicUnit;

    /// Open a new atomic unit.
    async fn begin(&self) -> Result<Self::Unit>;
}
