//! Runs against a live database only when `CAFELEDGER_TEST_DATABASE_URL` is set.

use std::sync::Arc;

use futures::future::join_all;

use cafeledger_common::{AccountId, Deadline, LedgerError};
use cafeledger_ledger::{LedgerEngine, PgLedgerStore, TransactionLog};

async fn engine() -> Option<LedgerEngine<PgLedgerStore>> {
    let url = std::env::var("CAFELEDGER_TEST_DATABASE_URL").ok()?;
    let store = PgLedgerStore::connect(&url, 8).await.unwrap();
    store.migrate().await.unwrap();
    Some(LedgerEngine::new(Arc::new(store)))
}

/// Account ids unique to this run so repeated runs do not collide.
fn fresh_ids() -> (AccountId, AccountId) {
    let base = chrono::Utc::now().timestamp_micros() * 2;
    (AccountId::new(base), AccountId::new(base + 1))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postgres_round_trip() {
    let Some(engine) = engine().await else {
        return;
    };
    let (a, b) = fresh_ids();
    engine.open_account(a).await.unwrap();
    engine.open_account(b).await.unwrap();
    assert_eq!(
        engine.open_account(a).await.unwrap_err(),
        LedgerError::AccountAlreadyExists(a)
    );

    let deposit = engine.deposit(a, 50, Deadline::default()).await.unwrap();
    engine.transfer(a, b, 30, Deadline::default()).await.unwrap();
    let err = engine.withdraw(a, 999, Deadline::default()).await.unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert_eq!(engine.balance(a).await.unwrap(), 20);
    assert_eq!(engine.balance(b).await.unwrap(), 30);
    let stored = engine.store().get_by_id(deposit.id).await.unwrap().unwrap();
    assert_eq!(stored.amount, 50);
    assert_eq!(stored.transaction_type, deposit.transaction_type);
    assert_eq!(engine.history(a).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postgres_concurrent_withdrawals() {
    let Some(engine) = engine().await else {
        return;
    };
    let (a, _) = fresh_ids();
    engine.open_account(a).await.unwrap();
    engine.deposit(a, 100, Deadline::default()).await.unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.withdraw(a, 100, Deadline::default()).await })
        })
        .collect();
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(engine.balance(a).await.unwrap(), 0);
}
