//! Simulation controller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use walletledger_common::{AccountId, Amount, LedgerError};
use walletledger_ledger::LedgerBackend;
use walletledger_service::WalletService;

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};

/// Largest amount a random operation moves.
const MAX_RANDOM_AMOUNT: u64 = 500;

/// A registered simulation account.
#[derive(Debug, Clone, Serialize)]
pub struct SimAccount {
    pub id: AccountId,
    pub username: String,
}

/// One money operation, resolved to account indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedOp {
    TopUp { account: usize, amount: u64 },
    Withdraw { account: usize, amount: u64 },
    Transfer { from: usize, to: usize, amount: u64 },
}

impl PlannedOp {
    fn amount(&self) -> u64 {
        match *self {
            PlannedOp::TopUp { amount, .. }
            | PlannedOp::Withdraw { amount, .. }
            | PlannedOp::Transfer { amount, .. } => amount,
        }
    }

    fn from_step(step: &ScenarioStep) -> Option<Self> {
        match *step {
            ScenarioStep::TopUp { account, amount } => Some(PlannedOp::TopUp { account, amount }),
            ScenarioStep::Withdraw { account, amount } => {
                Some(PlannedOp::Withdraw { account, amount })
            }
            ScenarioStep::Transfer { from, to, amount } => {
                Some(PlannedOp::Transfer { from, to, amount })
            }
            _ => None,
        }
    }
}

/// End-of-run consistency check.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    /// Accounts inspected.
    pub accounts: usize,
    /// Sum of stored balances.
    pub total_balance: u128,
    /// Deposits minus withdrawals observed by the simulator.
    pub expected_balance: u128,
    /// Distinct records across all account histories.
    pub records: usize,
    /// Successful money operations observed by the simulator.
    pub expected_records: u64,
    /// Every inconsistency found.
    pub mismatches: Vec<String>,
}

impl VerificationReport {
    /// Check if no inconsistency was found.
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Executes operations and records their outcome.
struct Executor<B: LedgerBackend> {
    service: Arc<WalletService<B>>,
    accounts: Arc<Vec<SimAccount>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl<B: LedgerBackend> Clone for Executor<B> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            accounts: Arc::clone(&self.accounts),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<B: LedgerBackend> Executor<B> {
    async fn execute(&self, op: PlannedOp) {
        let started = Instant::now();
        let result = match Amount::try_from(op.amount()) {
            Ok(amount) => self.dispatch(op, amount).await,
            Err(err) => Err(err),
        };
        let latency_us = started.elapsed().as_micros() as u64;

        let mut metrics = self.metrics.write().await;
        match result {
            Ok(()) => {
                metrics.record_success(latency_us);
                match op {
                    PlannedOp::TopUp { amount, .. } => metrics.record_deposit(amount),
                    PlannedOp::Withdraw { amount, .. } => metrics.record_withdrawal(amount),
                    PlannedOp::Transfer { .. } => {}
                }
            }
            Err(err) => {
                log_failure(&op, &err);
                metrics.record_failure(err.error_code());
            }
        }
    }

    async fn dispatch(&self, op: PlannedOp, amount: Amount) -> Result<(), LedgerError> {
        match op {
            PlannedOp::TopUp { account, .. } => self
                .service
                .top_up(self.accounts[account].id, amount)
                .await
                .map(|_| ()),
            PlannedOp::Withdraw { account, .. } => self
                .service
                .withdraw(self.accounts[account].id, amount)
                .await
                .map(|_| ()),
            PlannedOp::Transfer { from, to, .. } => self
                .service
                .transfer(self.accounts[from].id, &self.accounts[to].username, amount)
                .await
                .map(|_| ()),
        }
    }
}

fn log_failure(op: &PlannedOp, err: &LedgerError) {
    match err {
        LedgerError::InsufficientFunds { .. } | LedgerError::Conflict(_) => {
            debug!(?op, error = %err, "Operation rejected")
        }
        _ => warn!(?op, error = %err, "Operation failed"),
    }
}

/// Controls the simulation.
pub struct SimulationController<B: LedgerBackend> {
    /// Service under test.
    service: Arc<WalletService<B>>,
    /// Concurrent workers for random load.
    workers: usize,
    /// Random number generator.
    rng: StdRng,
    /// Registered accounts.
    accounts: Arc<Vec<SimAccount>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl<B: LedgerBackend> SimulationController<B> {
    /// Create a new simulation controller.
    pub fn new(service: Arc<WalletService<B>>, workers: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            service,
            workers: workers.max(1),
            rng,
            accounts: Arc::new(Vec::new()),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Register `count` accounts and fund each with `initial_balance`.
    pub async fn initialize(&mut self, count: usize, initial_balance: u64) -> anyhow::Result<()> {
        info!(count, initial_balance, "Initializing simulation accounts");

        // Usernames carry a per-run tag so repeated runs against one database do not collide.
        let run_tag = uuid::Uuid::new_v4().simple().to_string();
        let mut accounts = Vec::with_capacity(count);
        for index in 0..count {
            let username = format!("sim_{}_{}", &run_tag[..8], index);
            let account = self
                .service
                .register(&username, &format!("Simulated account {}", index))
                .await?;
            accounts.push(SimAccount {
                id: account.id,
                username,
            });
        }
        self.accounts = Arc::new(accounts);

        if initial_balance > 0 {
            let executor = self.executor();
            for account in 0..count {
                executor
                    .execute(PlannedOp::TopUp {
                        account,
                        amount: initial_balance,
                    })
                    .await;
            }
        }

        Ok(())
    }

    /// Registered accounts.
    pub fn accounts(&self) -> &[SimAccount] {
        &self.accounts
    }

    /// Run a scenario. Fails on the first unmet assertion.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(
            scenario = %scenario.name,
            description = %scenario.description,
            "Running scenario"
        );
        scenario.validate()?;
        if self.accounts.len() < scenario.accounts {
            anyhow::bail!(
                "scenario {} needs {} accounts, {} registered",
                scenario.name,
                scenario.accounts,
                self.accounts.len()
            );
        }

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        Ok(())
    }

    /// Run `operations` random operations across the workers.
    pub async fn run_random(&mut self, operations: usize) -> anyhow::Result<()> {
        if self.accounts.len() < 2 {
            anyhow::bail!("random load needs at least two accounts");
        }

        let plan = self.plan(operations);
        let mut lanes: Vec<Vec<PlannedOp>> = vec![Vec::new(); self.workers];
        for (index, op) in plan.into_iter().enumerate() {
            lanes[index % self.workers].push(op);
        }

        info!(operations, workers = self.workers, "Running random load");
        let handles: Vec<_> = lanes
            .into_iter()
            .map(|lane| {
                let executor = self.executor();
                tokio::spawn(async move {
                    for op in lane {
                        executor.execute(op).await;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await?;
        }
        Ok(())
    }

    /// Check conservation, non-negativity and record correspondence.
    pub async fn verify(&self) -> anyhow::Result<VerificationReport> {
        let metrics = self.metrics().await;
        let mut mismatches = Vec::new();
        let mut total_balance: u128 = 0;
        let mut record_ids = HashSet::new();

        for account in self.accounts.iter() {
            let stored = self.service.account(account.id).await?;
            let records = self.service.list_transactions(account.id).await?;

            let derived: i128 = records
                .iter()
                .map(|record| record.delta_for(&account.username))
                .sum();
            if derived < 0 {
                mismatches.push(format!(
                    "{}: ledger history sums to negative {}",
                    account.username, derived
                ));
            }
            if derived != stored.balance.minor_units() as i128 {
                mismatches.push(format!(
                    "{}: balance {} but ledger history sums to {}",
                    account.username, stored.balance, derived
                ));
            }
            for record in &records {
                if !record.involves(&account.username) {
                    mismatches.push(format!(
                        "{}: listed record {} does not name the account",
                        account.username, record.id
                    ));
                }
                record_ids.insert(record.id);
            }

            total_balance += stored.balance.minor_units() as u128;
        }

        let expected_balance = (metrics.deposited as u128).saturating_sub(metrics.withdrawn as u128);
        if total_balance != expected_balance {
            mismatches.push(format!(
                "total balance {} differs from net deposits {}",
                total_balance, expected_balance
            ));
        }
        if record_ids.len() as u64 != metrics.successful_operations {
            mismatches.push(format!(
                "{} records for {} successful operations",
                record_ids.len(),
                metrics.successful_operations
            ));
        }

        Ok(VerificationReport {
            accounts: self.accounts.len(),
            total_balance,
            expected_balance,
            records: record_ids.len(),
            expected_records: metrics.successful_operations,
            mismatches,
        })
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    // --- Private methods ---

    fn executor(&self) -> Executor<B> {
        Executor {
            service: Arc::clone(&self.service),
            accounts: Arc::clone(&self.accounts),
            metrics: Arc::clone(&self.metrics),
        }
    }

    fn plan(&mut self, operations: usize) -> Vec<PlannedOp> {
        let count = self.accounts.len();
        (0..operations)
            .map(|_| {
                let amount = self.rng.gen_range(1..=MAX_RANDOM_AMOUNT);
                match self.rng.gen_range(0..10) {
                    0..=2 => PlannedOp::TopUp {
                        account: self.rng.gen_range(0..count),
                        amount,
                    },
                    3..=5 => PlannedOp::Withdraw {
                        account: self.rng.gen_range(0..count),
                        amount,
                    },
                    _ => {
                        let from = self.rng.gen_range(0..count);
                        let mut to = self.rng.gen_range(0..count);
                        while to == from {
                            to = self.rng.gen_range(0..count);
                        }
                        PlannedOp::Transfer { from, to, amount }
                    }
                }
            })
            .collect()
    }

    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::TopUp { .. }
            | ScenarioStep::Withdraw { .. }
            | ScenarioStep::Transfer { .. } => {
                if let Some(op) = PlannedOp::from_step(step) {
                    self.executor().execute(op).await;
                }
            }
            ScenarioStep::Concurrent { repeat, operation } => {
                let op = PlannedOp::from_step(operation).ok_or_else(|| {
                    anyhow::anyhow!("concurrent step must wrap an operation")
                })?;
                info!(repeat, ?op, "Running concurrent operations");

                let handles: Vec<_> = (0..*repeat)
                    .map(|_| {
                        let executor = self.executor();
                        tokio::spawn(async move { executor.execute(op).await })
                    })
                    .collect();
                for result in join_all(handles).await {
                    result?;
                }
            }
            ScenarioStep::RandomLoad { operations } => {
                self.run_random(*operations).await?;
            }
            ScenarioStep::Assert { condition } => {
                self.check(condition).await?;
            }
        }

        Ok(())
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::BalanceEquals { account, amount } => {
                let balance = self
                    .service
                    .account(self.accounts[*account].id)
                    .await?
                    .balance;
                if balance.minor_units() != *amount {
                    anyhow::bail!(
                        "account {} balance is {}, expected {}",
                        account,
                        balance,
                        amount
                    );
                }
            }
            AssertCondition::RecordCount { account, count } => {
                let records = self
                    .service
                    .list_transactions(self.accounts[*account].id)
                    .await?;
                if records.len() != *count {
                    anyhow::bail!(
                        "account {} has {} records, expected {}",
                        account,
                        records.len(),
                        count
                    );
                }
            }
            AssertCondition::FailuresAtLeast { code, count } => {
                let seen = self.metrics.read().await.failures(code);
                if seen < *count {
                    anyhow::bail!("{} failures with {}, expected at least {}", seen, code, count);
                }
            }
        }

        debug!(?condition, "Assertion held");
        Ok(())
    }
}
