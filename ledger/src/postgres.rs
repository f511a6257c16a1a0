//! PostgreSQL ledger store.
//!
//! Each atomic unit is a database transaction at `READ COMMITTED` isolation.
//! Balance reads take the row lock with `SELECT ... FOR UPDATE`, so two units
//! debiting the same account are serialised by the database and the second
//! one sees the first one's committed balance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use cafeledger_common::{AccountId, LedgerError, Result, TransactionId};

use crate::account::Account;
use crate::store::{AccountStore, AtomicUnit, LedgerStore, TransactionLog};
use crate::transaction::Transaction;

/// Schema statements applied by [`PgLedgerStore::migrate`].
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS accounts (
        id BIGINT PRIMARY KEY,
        balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        sender_id BIGINT NOT NULL REFERENCES accounts (id),
        receiver_id BIGINT NOT NULL REFERENCES accounts (id),
        amount BIGINT NOT NULL CHECK (amount > 0),
        kind TEXT NOT NULL CHECK (kind IN ('deposit', 'withdraw', 'transfer')),
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS transactions_sender_idx ON transactions (sender_id, created_at)",
    "CREATE INDEX IF NOT EXISTS transactions_receiver_idx ON transactions (receiver_id, created_at)",
];

const TRANSACTION_COLUMNS: &str = "id, sender_id, receiver_id, amount, kind, created_at";
const ACCOUNT_COLUMNS: &str = "id, balance, created_at, updated_at";

fn storage_error(err: sqlx::Error) -> LedgerError {
    LedgerError::internal(format!("database error: {err}"))
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let id: i64 = row.try_get("id").map_err(storage_error)?;
    let balance: i64 = row.try_get("balance").map_err(storage_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(storage_error)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(storage_error)?;

    Ok(Account {
        id: AccountId::new(id),
        balance,
        created_at,
        updated_at,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let id: Uuid = row.try_get("id").map_err(storage_error)?;
    let sender_id: i64 = row.try_get("sender_id").map_err(storage_error)?;
    let receiver_id: i64 = row.try_get("receiver_id").map_err(storage_error)?;
    let amount: i64 = row.try_get("amount").map_err(storage_error)?;
    let kind: String = row.try_get("kind").map_err(storage_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(storage_error)?;

    Ok(Transaction {
        id: TransactionId::from_uuid(id),
        sender_id: AccountId::new(sender_id),
        receiver_id: AccountId::new(receiver_id),
        amount,
        transaction_type: kind.parse()?,
        created_at,
    })
}

/// Ledger store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage_error)?;

        info!(max_connections, "Connected to ledger database");
        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
        }
        info!("Ledger schema ready");
        Ok(())
    }

    async fn select_transactions(&self, filter: &str, account_id: AccountId) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE {filter} ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl AccountStore for PgLedgerStore {
    async fn open_account(&self, account_id: AccountId) -> Result<Account> {
        let sql = format!(
            "INSERT INTO accounts (id, balance, created_at, updated_at) VALUES ($1, 0, $2, $2) \
             ON CONFLICT (id) DO NOTHING RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.value())
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        match row {
            Some(row) => account_from_row(&row),
            None => Err(LedgerError::AccountAlreadyExists(account_id)),
        }
    }

    async fn account_exists(&self, account_id: AccountId) -> Result<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
            .bind(account_id.value())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn account(&self, account_id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(account_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter().map(account_from_row).collect()
    }
}

#[async_trait]
impl TransactionLog for PgLedgerStore {
    async fn get_by_id(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn get_by_sender(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.select_transactions("sender_id = $1", account_id).await
    }

    async fn get_by_receiver(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.select_transactions("receiver_id = $1", account_id).await
    }

    async fn get_by_sender_or_receiver(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.select_transactions("sender_id = $1 OR receiver_id = $1", account_id)
            .await
    }

    async fn all(&self) -> Result<Vec<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY created_at, id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Unit = PgUnit;

    async fn begin(&self) -> Result<PgUnit> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        Ok(PgUnit { tx })
    }
}

/// Atomic unit over a [`PgLedgerStore`]: one database transaction.
///
/// `sqlx` rolls the transaction back when it is dropped uncommitted.
pub struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl AtomicUnit for PgUnit {
    async fn balance_for_update(&mut self, account_id: AccountId) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT balance FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id.value())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage_error)
    }

    async fn adjust_balance(&mut self, account_id: AccountId, delta: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE accounts SET balance = balance + $2, updated_at = $3 WHERE id = $1",
        )
        .bind(account_id.value())
        .bind(delta)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(account_id));
        }
        Ok(())
    }

    async fn append(&mut self, transaction: &Transaction) -> Result<()> {
        transaction.ensure_persistable()?;

        sqlx::query(
            "INSERT INTO transactions (id, sender_id, receiver_id, amount, kind, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(*transaction.id.as_uuid())
        .bind(transaction.sender_id.value())
        .bind(transaction.receiver_id.value())
        .bind(transaction.amount)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(storage_error)?;
        debug!("Unit committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(storage_error)?;
        debug!("Unit rolled back");
        Ok(())
    }
}
