//! PostgreSQL backend tests.
//!
//! Require a disposable database:
//! `DATABASE_URL=postgres://... cargo test -p walletledger-ledger -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use walletledger_common::{Amount, Deadline, LedgerError};
use walletledger_ledger::{EngineConfig, LedgerEngine, PgStore, RetryPolicy};

async fn engine() -> LedgerEngine<PgStore> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgStore::connect(&url, 8, Duration::from_secs(5))
        .await
        .expect("connect");
    store.ensure_schema().await.expect("schema");

    let config = EngineConfig {
        retry: RetryPolicy {
            max_attempts: 200,
            ..Default::default()
        },
        ..Default::default()
    };
    LedgerEngine::new(Arc::new(store), config)
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(30))
}

#[tokio::test]
#[ignore]
async fn pg_transfer_round_trip() {
    let engine = engine().await;
    let a = engine.register(&unique("a"), "A").await.unwrap();
    let b_name = unique("b");
    let b = engine.register(&b_name, "B").await.unwrap();

    engine
        .top_up(a.id, Amount::new(1000), deadline())
        .await
        .unwrap();
    let record = engine
        .transfer(a.id, &b_name, Amount::new(400), deadline())
        .await
        .unwrap();

    assert_eq!(record.balance_after, Amount::new(600));
    assert_eq!(engine.account(a.id).await.unwrap().balance, Amount::new(600));
    assert_eq!(engine.account(b.id).await.unwrap().balance, Amount::new(400));

    let listed = engine.list_transactions(b.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, record.id);
}

#[tokio::test]
#[ignore]
async fn pg_duplicate_username() {
    let engine = engine().await;
    let name = unique("dup");
    engine.register(&name, "First").await.unwrap();

    let err = engine.register(&name, "Second").await.unwrap_err();
    assert_eq!(err, LedgerError::DuplicateUsername(name));
}

#[tokio::test]
#[ignore]
async fn pg_insufficient_funds_leaves_no_record() {
    let engine = engine().await;
    let a = engine.register(&unique("a"), "A").await.unwrap();
    engine
        .top_up(a.id, Amount::new(300), deadline())
        .await
        .unwrap();

    let err = engine
        .withdraw(a.id, Amount::new(500), deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(engine.list_transactions(a.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn pg_concurrent_top_ups() {
    const N: u32 = 20;
    let engine = Arc::new(engine().await);
    let a = engine.register(&unique("hot"), "Hot").await.unwrap();

    let handles: Vec<_> = (0..N)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.top_up(a.id, Amount::new(1), deadline()).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(engine.account(a.id).await.unwrap().balance, Amount::new(N));
}

#[tokio::test]
#[ignore]
async fn pg_statement_timeout_cancels_lock_waits() {
    use walletledger_common::now;
    use walletledger_ledger::{LedgerBackend, UnitOfWork, UpdateOutcome};

    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let holder = PgStore::connect(&url, 2, Duration::from_secs(5))
        .await
        .expect("connect");
    holder.ensure_schema().await.expect("schema");
    let waiter = holder
        .clone()
        .with_statement_timeout(Duration::from_millis(50));

    let engine = LedgerEngine::new(Arc::new(holder.clone()), EngineConfig::default());
    let account = engine.register(&unique("lock"), "Lock").await.unwrap();

    let mut first = holder.begin().await.unwrap();
    let outcome = first
        .update_balance(account.id, Amount::ZERO, Amount::new(5), now())
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Updated);

    let mut second = waiter.begin().await.unwrap();
    let err = second
        .update_balance(account.id, Amount::ZERO, Amount::new(7), now())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Aborted(_)), "got {:?}", err);
    second.rollback().await.unwrap();

    first.commit().await.unwrap();
    assert_eq!(engine.account(account.id).await.unwrap().balance, Amount::new(5));
}
