//! In-process ledger store.
//!
//! Each account row sits behind its own async mutex. A unit holds the owned
//! guard of every row it has read for update, stages its balance deltas and
//! log rows, and writes them through only on commit. Commit has no await
//! points, so a unit dropped by an elapsed deadline either committed in full
//! or left nothing behind.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use cafeledger_common::{AccountId, LedgerError, Result, TransactionId};

use crate::account::Account;
use crate::store::{AccountStore, AtomicUnit, LedgerStore, TransactionLog};
use crate::transaction::Transaction;

struct Inner {
    /// Account rows by ID.
    rows: DashMap<AccountId, Arc<Mutex<Account>>>,
    /// Committed log rows in commit order.
    log: RwLock<Vec<Transaction>>,
    /// Fault injection: fail the next commit.
    fail_next_commit: AtomicBool,
}

impl Inner {
    fn row(&self, account_id: AccountId) -> Option<Arc<Mutex<Account>>> {
        // Clone the handle so no shard lock is held across an await.
        self.rows.get(&account_id).map(|row| row.value().clone())
    }

    fn select(&self, predicate: impl Fn(&Transaction) -> bool) -> Vec<Transaction> {
        let mut selected: Vec<Transaction> = self
            .log
            .read()
            .iter()
            .filter(|t| predicate(t))
            .cloned()
            .collect();
        selected.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        selected
    }
}

/// Ledger store held entirely in memory.
#[derive(Clone)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: DashMap::new(),
                log: RwLock::new(Vec::new()),
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Make the next commit fail as if the backing storage had gone away.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of committed log rows.
    pub fn transaction_count(&self) -> usize {
        self.inner.log.read().len()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryLedgerStore {
    async fn open_account(&self, account_id: AccountId) -> Result<Account> {
        match self.inner.rows.entry(account_id) {
            Entry::Occupied(_) => Err(LedgerError::AccountAlreadyExists(account_id)),
            Entry::Vacant(slot) => {
                let account = Account::open(account_id);
                slot.insert(Arc::new(Mutex::new(account.clone())));
                Ok(account)
            }
        }
    }

    async fn account_exists(&self, account_id: AccountId) -> Result<bool> {
        Ok(self.inner.rows.contains_key(&account_id))
    }

    async fn account(&self, account_id: AccountId) -> Result<Option<Account>> {
        match self.inner.row(account_id) {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let mut rows: Vec<(AccountId, Arc<Mutex<Account>>)> = self
            .inner
            .rows
            .iter()
            .map(|row| (*row.key(), row.value().clone()))
            .collect();
        rows.sort_by_key(|(id, _)| *id);

        let mut accounts = Vec::with_capacity(rows.len());
        for (_, row) in rows {
            accounts.push(row.lock().await.clone());
        }
        Ok(accounts)
    }
}

#[async_trait]
impl TransactionLog for MemoryLedgerStore {
    async fn get_by_id(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.inner.log.read().iter().find(|t| t.id == id).cloned())
    }

    async fn get_by_sender(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(self.inner.select(|t| t.sender_id == account_id))
    }

    async fn get_by_receiver(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(self.inner.select(|t| t.receiver_id == account_id))
    }

    async fn get_by_sender_or_receiver(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(self.inner.select(|t| t.touches(account_id)))
    }

    async fn all(&self) -> Result<Vec<Transaction>> {
        Ok(self.inner.select(|_| true))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit> {
        Ok(MemoryUnit {
            inner: self.inner.clone(),
            locked: BTreeMap::new(),
            deltas: BTreeMap::new(),
            staged: Vec::new(),
        })
    }
}

/// Atomic unit over a [`MemoryLedgerStore`].
pub struct MemoryUnit {
    inner: Arc<Inner>,
    /// Row guards held until the unit ends.
    locked: BTreeMap<AccountId, OwnedMutexGuard<Account>>,
    /// Staged balance changes.
    deltas: BTreeMap<AccountId, i64>,
    /// Staged log rows.
    staged: Vec<Transaction>,
}

impl MemoryUnit {
    /// Lock the row if this unit does not hold it yet.
    async fn lock(&mut self, account_id: AccountId) -> bool {
        if self.locked.contains_key(&account_id) {
            return true;
        }

        let Some(row) = self.inner.row(account_id) else {
            return false;
        };

        let guard = row.lock_owned().await;
        self.locked.insert(account_id, guard);
        true
    }

    fn staged_balance(&self, account_id: AccountId) -> Option<i64> {
        let guard = self.locked.get(&account_id)?;
        let delta = self.deltas.get(&account_id).copied().unwrap_or(0);
        Some(guard.balance + delta)
    }
}

#[async_trait]
impl AtomicUnit for MemoryUnit {
    async fn balance_for_update(&mut self, account_id: AccountId) -> Result<Option<i64>> {
        if !self.lock(account_id).await {
            return Ok(None);
        }
        Ok(self.staged_balance(account_id))
    }

    async fn adjust_balance(&mut self, account_id: AccountId, delta: i64) -> Result<()> {
        if !self.lock(account_id).await {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        let current = self
            .staged_balance(account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        let updated = current.checked_add(delta).ok_or_else(|| {
            LedgerError::internal(format!("balance overflow on account {account_id}"))
        })?;
        if updated < 0 {
            return Err(LedgerError::internal(format!(
                "balance of account {account_id} would become negative ({updated})"
            )));
        }

        *self.deltas.entry(account_id).or_insert(0) += delta;
        Ok(())
    }

    async fn append(&mut self, transaction: &Transaction) -> Result<()> {
        transaction.ensure_persistable()?;

        let duplicate = self.staged.iter().any(|t| t.id == transaction.id)
            || self.inner.log.read().iter().any(|t| t.id == transaction.id);
        if duplicate {
            return Err(LedgerError::internal(format!(
                "duplicate transaction id {}",
                transaction.id
            )));
        }

        self.staged.push(transaction.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut unit = self;
        if unit.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            warn!(
                staged = unit.staged.len(),
                "Injected commit failure, discarding unit"
            );
            return Err(LedgerError::internal("commit failed: storage unavailable"));
        }

        let now = Utc::now();
        for (account_id, delta) in &unit.deltas {
            if let Some(guard) = unit.locked.get_mut(account_id) {
                guard.balance += *delta;
                guard.updated_at = now;
            }
        }

        // Log rows land while row guards are still held, so a reader that
        // sees the new balance also sees the row that produced it.
        unit.inner.log.write().append(&mut unit.staged);

        debug!(rows = unit.locked.len(), "Unit committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(
            rows = self.locked.len(),
            staged = self.staged.len(),
            "Unit rolled back"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionType;

    async fn store_with(accounts: &[(i64, i64)]) -> MemoryLedgerStore {
        let store = MemoryLedgerStore::new();
        for &(id, balance) in accounts {
            store.open_account(AccountId::new(id)).await.unwrap();
            if balance > 0 {
                let mut unit = store.begin().await.unwrap();
                unit.adjust_balance(AccountId::new(id), balance).await.unwrap();
                unit.commit().await.unwrap();
            }
        }
        store
    }

    #[tokio::test]
    async fn test_open_account_twice_fails() {
        let store = MemoryLedgerStore::new();
        let id = AccountId::new(1);

        store.open_account(id).await.unwrap();
        assert!(store.account_exists(id).await.unwrap());
        assert_eq!(
            store.open_account(id).await,
            Err(LedgerError::AccountAlreadyExists(id))
        );
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_invisible() {
        let store = store_with(&[(1, 100)]).await;
        let id = AccountId::new(1);

        let mut unit = store.begin().await.unwrap();
        unit.adjust_balance(id, -40).await.unwrap();
        assert_eq!(unit.balance_for_update(id).await.unwrap(), Some(60));
        unit.rollback().await.unwrap();

        assert_eq!(store.account(id).await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() {
        let store = store_with(&[(1, 100)]).await;
        let id = AccountId::new(1);

        {
            let mut unit = store.begin().await.unwrap();
            unit.adjust_balance(id, 25).await.unwrap();
            let entry = Transaction::new(TransactionId::new(), TransactionType::Deposit, id, id, 25);
            unit.append(&entry).await.unwrap();
        }

        assert_eq!(store.account(id).await.unwrap().unwrap().balance, 100);
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_negative_balance_is_refused() {
        let store = store_with(&[(1, 10)]).await;

        let mut unit = store.begin().await.unwrap();
        let err = unit.adjust_balance(AccountId::new(1), -11).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_injected_commit_failure_discards_everything() {
        let store = store_with(&[(1, 10)]).await;
        let id = AccountId::new(1);
        store.fail_next_commit();

        let mut unit = store.begin().await.unwrap();
        unit.adjust_balance(id, 5).await.unwrap();
        let entry = Transaction::new(TransactionId::new(), TransactionType::Deposit, id, id, 5);
        unit.append(&entry).await.unwrap();
        assert!(unit.commit().await.is_err());

        assert_eq!(store.account(id).await.unwrap().unwrap().balance, 10);
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_append_refuses_invalid_type() {
        let store = store_with(&[(1, 0)]).await;
        let id = AccountId::new(1);

        let mut unit = store.begin().await.unwrap();
        let mut entry = Transaction::new(TransactionId::new(), TransactionType::Deposit, id, id, 5);
        entry.transaction_type = TransactionType::Invalid;
        assert!(unit.append(&entry).await.is_err());
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_unit() {
        let store = store_with(&[(1, 10)]).await;
        let id = AccountId::new(1);

        let mut first = store.begin().await.unwrap();
        first.balance_for_update(id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            second.balance_for_update(id),
        )
        .await;
        assert!(blocked.is_err());

        first.rollback().await.unwrap();
        assert_eq!(second.balance_for_update(id).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_history_queries() {
        let store = store_with(&[(1, 0), (2, 0)]).await;
        let a = AccountId::new(1);
        let b = AccountId::new(2);

        let mut unit = store.begin().await.unwrap();
        unit.append(&Transaction::new(TransactionId::new(), TransactionType::Deposit, a, a, 50))
            .await
            .unwrap();
        unit.append(&Transaction::new(TransactionId::new(), TransactionType::Transfer, a, b, 30))
            .await
            .unwrap();
        unit.commit().await.unwrap();

        assert_eq!(store.get_by_sender(a).await.unwrap().len(), 2);
        assert_eq!(store.get_by_receiver(b).await.unwrap().len(), 1);
        assert_eq!(store.get_by_sender_or_receiver(b).await.unwrap().len(), 1);
        assert_eq!(store.all().await.unwrap().len(), 2);

        let all = store.all().await.unwrap();
        let first = &all[0];
        assert_eq!(store.get_by_id(first.id).await.unwrap().as_ref(), Some(first));
    }
}
