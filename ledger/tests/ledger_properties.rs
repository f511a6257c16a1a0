use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use proptest::prelude::*;

use cafeledger_common::{AccountId, Deadline, LedgerError};
use cafeledger_ledger::{
    AccountStore, AtomicUnit, LedgerEngine, LedgerStore, MemoryLedgerStore, Operation,
    TransactionLog, TransactionType,
};

const A: AccountId = AccountId::new(1);
const B: AccountId = AccountId::new(2);
const C: AccountId = AccountId::new(3);

async fn engine_with(accounts: &[AccountId]) -> LedgerEngine<MemoryLedgerStore> {
    let engine = LedgerEngine::new(Arc::new(MemoryLedgerStore::new()));
    for &id in accounts {
        engine.open_account(id).await.unwrap();
    }
    engine
}

async fn snapshot(engine: &LedgerEngine<MemoryLedgerStore>) -> (Vec<i64>, usize) {
    let balances = engine
        .store()
        .accounts()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.balance)
        .collect();
    (balances, engine.store().transaction_count())
}

#[tokio::test]
async fn deposit_on_fresh_account_records_one_row() {
    let engine = engine_with(&[A]).await;

    engine.deposit(A, 50, Deadline::default()).await.unwrap();

    assert_eq!(engine.balance(A).await.unwrap(), 50);
    let log = engine.store().all().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].transaction_type, TransactionType::Deposit);
    assert_eq!(log[0].sender_id, A);
    assert_eq!(log[0].receiver_id, A);
    assert_eq!(log[0].amount, 50);
}

#[tokio::test]
async fn transfer_moves_funds_between_accounts() {
    let engine = engine_with(&[A, B]).await;
    engine.deposit(A, 50, Deadline::default()).await.unwrap();

    engine.transfer(A, B, 30, Deadline::default()).await.unwrap();

    assert_eq!(engine.balance(A).await.unwrap(), 20);
    assert_eq!(engine.balance(B).await.unwrap(), 30);
    let transfers: Vec<_> = engine
        .store()
        .all()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.transaction_type == TransactionType::Transfer)
        .collect();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].sender_id, A);
    assert_eq!(transfers[0].receiver_id, B);
    assert_eq!(transfers[0].amount, 30);
}

#[tokio::test]
async fn overdraw_is_rejected_without_side_effects() {
    let engine = engine_with(&[A]).await;
    engine.deposit(A, 20, Deadline::default()).await.unwrap();
    let before = snapshot(&engine).await;

    let err = engine.withdraw(A, 999, Deadline::default()).await.unwrap_err();

    assert_eq!(
        err,
        LedgerError::InsufficientBalance {
            account_id: A,
            required: 999,
            available: 20,
        }
    );
    assert_eq!(snapshot(&engine).await, before);
}

#[tokio::test]
async fn negative_transfer_is_invalid_before_locking() {
    let engine = engine_with(&[A, B]).await;
    engine.deposit(A, 20, Deadline::default()).await.unwrap();
    let before = snapshot(&engine).await;

    let err = engine.transfer(A, B, -5, Deadline::default()).await.unwrap_err();

    assert_eq!(err, LedgerError::InvalidAmount { amount: -5 });
    assert_eq!(snapshot(&engine).await, before);
}

#[tokio::test]
async fn self_transfer_is_rejected() {
    let engine = engine_with(&[A]).await;
    engine.deposit(A, 20, Deadline::default()).await.unwrap();

    let err = engine.transfer(A, A, 5, Deadline::default()).await.unwrap_err();
    assert_eq!(err, LedgerError::SameAccountTransfer(A));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_withdrawals_cannot_overdraw() {
    for _ in 0..50 {
        let engine = engine_with(&[A]).await;
        engine.deposit(A, 100, Deadline::default()).await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.withdraw(A, 100, Deadline::default()).await })
            })
            .collect();
        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. })))
            .count();
        assert_eq!(succeeded, 1);
        assert_eq!(insufficient, 1);
        assert_eq!(engine.balance(A).await.unwrap(), 0);
        assert!(engine.audit().await.unwrap().is_consistent());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposing_transfers_do_not_deadlock() {
    let engine = engine_with(&[A, B]).await;
    engine.deposit(A, 1_000, Deadline::default()).await.unwrap();
    engine.deposit(B, 1_000, Deadline::default()).await.unwrap();

    let handles: Vec<_> = (0..200)
        .map(|i| {
            let engine = engine.clone();
            let (from, to) = if i % 2 == 0 { (A, B) } else { (B, A) };
            tokio::spawn(async move { engine.transfer(from, to, 7, Deadline::unbounded()).await })
        })
        .collect();

    let finished = tokio::time::timeout(Duration::from_secs(10), join_all(handles))
        .await
        .expect("transfers deadlocked");
    for joined in finished {
        joined.unwrap().unwrap();
    }

    assert_eq!(engine.balance(A).await.unwrap(), 1_000);
    assert_eq!(engine.balance(B).await.unwrap(), 1_000);
    assert!(engine.audit().await.unwrap().is_consistent());
}

#[tokio::test]
async fn elapsed_deadline_rolls_back() {
    let engine = engine_with(&[A]).await;
    engine.deposit(A, 100, Deadline::default()).await.unwrap();
    let before = snapshot(&engine).await;

    // Another unit holds the row, so the withdrawal cannot commit in time.
    let mut blocker = engine.store().begin().await.unwrap();
    blocker.balance_for_update(A).await.unwrap();

    let err = engine
        .withdraw(A, 10, Deadline::after(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    blocker.rollback().await.unwrap();
    assert_eq!(snapshot(&engine).await, before);
}

fn account_strategy() -> impl Strategy<Value = AccountId> {
    prop_oneof![Just(A), Just(B), Just(C), Just(AccountId::new(99))]
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (account_strategy(), -10i64..300).prop_map(|(account_id, amount)| Operation::Deposit {
            account_id,
            amount
        }),
        (account_strategy(), -10i64..300).prop_map(|(account_id, amount)| Operation::Withdraw {
            account_id,
            amount
        }),
        (account_strategy(), account_strategy(), -10i64..300).prop_map(
            |(sender_id, receiver_id, amount)| Operation::Transfer {
                sender_id,
                receiver_id,
                amount
            }
        ),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balances_stay_non_negative_and_reconstructable(
        operations in prop::collection::vec(operation_strategy(), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let engine = engine_with(&[A, B, C]).await;

            for operation in operations {
                let before = snapshot(&engine).await;
                let outcome = engine.execute(operation, Deadline::default()).await;
                let after = snapshot(&engine).await;

                assert!(after.0.iter().all(|balance| *balance >= 0));
                match outcome {
                    Ok(_) => assert_eq!(after.1, before.1 + 1),
                    Err(_) => assert_eq!(after, before),
                }
            }

            assert!(engine.audit().await.unwrap().is_consistent());
        });
    }
}
