//! Engine behaviour against the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use walletledger_common::{AccountId, Amount, Deadline, LedgerError};
use walletledger_ledger::{
    Account, EngineConfig, LedgerEngine, MemoryStore, RetryPolicy, TransactionType,
};

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(30))
}

fn patient_config() -> EngineConfig {
    EngineConfig {
        unit_timeout: Duration::from_secs(5),
        operation_timeout: Duration::from_secs(30),
        retry: RetryPolicy {
            max_attempts: 1_000,
            base_backoff: Duration::from_micros(100),
            max_backoff: Duration::from_millis(5),
            jitter: true,
        },
    }
}

async fn funded(engine: &LedgerEngine<MemoryStore>, username: &str, balance: u32) -> Account {
    let account = engine.register(username, username).await.unwrap();
    if balance > 0 {
        engine
            .top_up(account.id, Amount::new(balance), deadline())
            .await
            .unwrap();
    }
    engine.account(account.id).await.unwrap()
}

/// Sum of record effects must reproduce the balance.
async fn assert_records_explain_balance(engine: &LedgerEngine<MemoryStore>, id: AccountId) {
    let account = engine.account(id).await.unwrap();
    let records = engine.list_transactions(id).await.unwrap();
    let net: i128 = records
        .iter()
        .map(|r| r.delta_for(account.username.as_str()))
        .sum();
    assert_eq!(net, account.balance.minor_units() as i128);
}

#[tokio::test]
async fn top_up_from_zero() {
    let engine = LedgerEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
    let a = funded(&engine, "a", 0).await;

    engine
        .top_up(a.id, Amount::new(500), deadline())
        .await
        .unwrap();

    assert_eq!(engine.account(a.id).await.unwrap().balance, Amount::new(500));
    let records = engine.list_transactions(a.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, TransactionType::TopUp);
    assert_eq!(records[0].amount, Amount::new(500));
    assert_eq!(records[0].balance_after, Amount::new(500));
}

#[tokio::test]
async fn withdraw_more_than_balance_changes_nothing() {
    let engine = LedgerEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
    let a = funded(&engine, "a", 300).await;

    let err = engine
        .withdraw(a.id, Amount::new(500), deadline())
        .await
        .unwrap_err();

    assert_eq!(err, LedgerError::InsufficientFunds { account_id: a.id });
    assert_eq!(engine.account(a.id).await.unwrap().balance, Amount::new(300));
    assert_eq!(engine.list_transactions(a.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn transfer_moves_funds_and_writes_one_record() {
    let engine = LedgerEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
    let a = funded(&engine, "a", 1000).await;
    let b = funded(&engine, "b", 0).await;

    let record = engine
        .transfer(a.id, "b", Amount::new(400), deadline())
        .await
        .unwrap();

    assert_eq!(engine.account(a.id).await.unwrap().balance, Amount::new(600));
    assert_eq!(engine.account(b.id).await.unwrap().balance, Amount::new(400));
    assert_eq!(record.kind, TransactionType::Transfer);
    assert_eq!(record.from.as_str(), "a");
    assert_eq!(record.to.as_str(), "b");
    assert_eq!(record.amount, Amount::new(400));
    assert_eq!(record.balance_after, Amount::new(600));

    let b_records = engine.list_transactions(b.id).await.unwrap();
    assert_eq!(b_records, vec![record]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_never_overdraw() {
    let engine = Arc::new(LedgerEngine::new(
        Arc::new(MemoryStore::new()),
        EngineConfig::default(),
    ));
    let a = funded(&engine, "a", 150).await;
    let b = funded(&engine, "b", 0).await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .transfer(a.id, "b", Amount::new(100), deadline())
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert_eq!(err, LedgerError::InsufficientFunds { account_id: a.id }),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(engine.account(a.id).await.unwrap().balance, Amount::new(50));
    assert_eq!(engine.account(b.id).await.unwrap().balance, Amount::new(100));
}

#[tokio::test]
async fn transfer_to_unknown_target_changes_nothing() {
    let engine = LedgerEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
    let a = funded(&engine, "a", 100).await;

    let err = engine
        .transfer(a.id, "nonexistent", Amount::new(10), deadline())
        .await
        .unwrap_err();

    assert_eq!(err, LedgerError::TargetNotFound("nonexistent".into()));
    assert_eq!(engine.account(a.id).await.unwrap().balance, Amount::new(100));
    assert_eq!(engine.list_transactions(a.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_top_ups_all_land() {
    const N: u32 = 50;
    let engine = Arc::new(LedgerEngine::new(
        Arc::new(MemoryStore::new()),
        patient_config(),
    ));
    let a = funded(&engine, "a", 0).await;

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
    assert_eq!(engine.list_transactions(a.id).await.unwrap().len() as u32, N);
    assert_records_explain_balance(&engine, a.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mixed_operations_conserve_funds() {
    const ACCOUNTS: usize = 4;
    const INITIAL: u32 = 1_000;
    let engine = Arc::new(LedgerEngine::new(
        Arc::new(MemoryStore::new()),
        patient_config(),
    ));

    let mut accounts = Vec::new();
    for i in 0..ACCOUNTS {
        accounts.push(funded(&engine, &format!("user{}", i), INITIAL).await);
    }
    let accounts = Arc::new(accounts);

    let handles: Vec<_> = (0..200usize)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let accounts = Arc::clone(&accounts);
            tokio::spawn(async move {
                let from = &accounts[i % ACCOUNTS];
                let to = &accounts[(i / ACCOUNTS + 1 + i) % ACCOUNTS];
                let amount = Amount::new((i as u32 % 7 + 1) * 37);
                if from.id == to.id {
                    return None;
                }
                match engine
                    .transfer(from.id, to.username.as_str(), amount, deadline())
                    .await
                {
                    Ok(_) => None,
                    Err(LedgerError::InsufficientFunds { .. }) => None,
                    Err(err) => Some(err),
                }
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), None);
    }

    let mut total = 0u64;
    for account in accounts.iter() {
        let current = engine.account(account.id).await.unwrap();
        total += current.balance.minor_units();
        assert_records_explain_balance(&engine, account.id).await;
    }
    assert_eq!(total, INITIAL as u64 * ACCOUNTS as u64);
}

#[tokio::test]
async fn listing_is_idempotent() {
    let engine = LedgerEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
    let a = funded(&engine, "a", 100).await;
    funded(&engine, "b", 0).await;
    engine
        .transfer(a.id, "b", Amount::new(10), deadline())
        .await
        .unwrap();
    engine
        .withdraw(a.id, Amount::new(5), deadline())
        .await
        .unwrap();

    let first = engine.list_transactions(a.id).await.unwrap();
    let second = engine.list_transactions(a.id).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[derive(Debug, Clone)]
enum Op {
    TopUp(usize, u32),
    Withdraw(usize, u32),
    Transfer(usize, usize, u32),
}

fn op_strategy(accounts: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..accounts, 1u32..500).prop_map(|(a, n)| Op::TopUp(a, n)),
        (0..accounts, 1u32..500).prop_map(|(a, n)| Op::Withdraw(a, n)),
        (0..accounts, 0..accounts, 1u32..500).prop_map(|(a, b, n)| Op::Transfer(a, b, n)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sequential_operations_match_model(ops in prop::collection::vec(op_strategy(3), 1..40)) {
        tokio_test::block_on(async {
            let engine = LedgerEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
            let mut accounts = Vec::new();
            for i in 0..3 {
                accounts.push(engine.register(&format!("acct{}", i), "Account").await.unwrap());
            }
            let mut model: HashMap<usize, u32> = (0..3).map(|i| (i, 0)).collect();
            let mut committed = 0usize;

            for op in &ops {
                match *op {
                    Op::TopUp(a, n) => {
                        engine.top_up(accounts[a].id, Amount::new(n), deadline()).await.unwrap();
                        *model.get_mut(&a).unwrap() += n;
                        committed += 1;
                    }
                    Op::Withdraw(a, n) => {
                        let result = engine.withdraw(accounts[a].id, Amount::new(n), deadline()).await;
                        if model[&a] >= n {
                            result.unwrap();
                            *model.get_mut(&a).unwrap() -= n;
                            committed += 1;
                        } else {
                            assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
                        }
                    }
                    Op::Transfer(a, b, n) => {
                        let result = engine
                            .transfer(accounts[a].id, accounts[b].username.as_str(), Amount::new(n), deadline())
                            .await;
                        if a == b {
                            assert_eq!(result.unwrap_err(), LedgerError::SameAccount);
                        } else if model[&a] >= n {
                            let record = result.unwrap();
                            *model.get_mut(&a).unwrap() -= n;
                            *model.get_mut(&b).unwrap() += n;
                            assert_eq!(record.balance_after, Amount::new(model[&a]));
                            committed += 1;
                        } else {
                            assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
                        }
                    }
                }
            }

            let mut seen = std::collections::HashSet::new();
            for (i, account) in accounts.iter().enumerate() {
                let current = engine.account(account.id).await.unwrap();
                assert_eq!(current.balance, Amount::new(model[&i]));
                for record in engine.list_transactions(account.id).await.unwrap() {
                    seen.insert(record.id);
                }
                assert_records_explain_balance(&engine, account.id).await;
            }
            assert_eq!(seen.len(), committed);
            assert_eq!(engine.backend().record_count(), committed);
        });
    }
}
