//! Ledger transaction engine.
//!
//! Each money movement runs as one atomic unit: read the accounts, compute
//! the new balances, write them conditionally and append exactly one record.
//! A unit that loses a write race is retried from the top, re-reading fresh
//! state, until the retry policy or the caller's deadline runs out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use walletledger_common::constants::{default_operation_timeout, default_unit_timeout};
use walletledger_common::{
    now, AccountId, Amount, Deadline, LedgerError, Result, Username,
};

use crate::account::{Account, NewAccount};
use crate::journal::TransactionRecord;
use crate::phase::{OperationPhase, PhaseTracker};
use crate::retry::RetryPolicy;
use crate::store::{InsertOutcome, LedgerBackend, UnitOfWork, UpdateOutcome};
use crate::unit::AtomicUnitExecutor;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for one unit attempt.
    pub unit_timeout: Duration,
    /// Default budget for a whole operation, retries included.
    pub operation_timeout: Duration,
    /// Conflict retry policy.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_timeout: default_unit_timeout(),
            operation_timeout: default_operation_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.unit_timeout.is_zero() || self.operation_timeout.is_zero() {
            return Err(LedgerError::ConfigurationError(
                "timeouts must be non-zero".into(),
            ));
        }
        if self.unit_timeout > self.operation_timeout {
            return Err(LedgerError::ConfigurationError(
                "unit_timeout must not exceed operation_timeout".into(),
            ));
        }
        self.retry.validate()
    }
}

/// Engine-level counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    committed: AtomicU64,
    conflicts_retried: AtomicU64,
    conflicts_exhausted: AtomicU64,
    aborted: AtomicU64,
}

impl EngineStats {
    /// Get a point-in-time copy of the counters.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
            conflicts_exhausted: self.conflicts_exhausted.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatsSnapshot {
    /// Units committed.
    pub committed: u64,
    /// Conflicts followed by another attempt.
    pub conflicts_retried: u64,
    /// Operations that surfaced `Conflict` after the last attempt.
    pub conflicts_exhausted: u64,
    /// Operations that surfaced `Aborted`.
    pub aborted: u64,
}

/// The ledger engine performs top-ups, withdrawals and transfers.
pub struct LedgerEngine<B: LedgerBackend> {
    executor: AtomicUnitExecutor<B>,
    config: EngineConfig,
    stats: Arc<EngineStats>,
}

impl<B: LedgerBackend> LedgerEngine<B> {
    /// Create a new ledger engine over `backend`.
    pub fn new(backend: Arc<B>, config: EngineConfig) -> Self {
        Self {
            executor: AtomicUnitExecutor::new(backend, config.unit_timeout),
            config,
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// Backend the engine runs on.
    pub fn backend(&self) -> &Arc<B> {
        self.executor.backend()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deadline for an operation started now with the default budget.
    pub fn default_deadline(&self) -> Deadline {
        Deadline::after(self.config.operation_timeout)
    }

    /// Register a new account with a zero balance.
    #[instrument(skip(self))]
    pub async fn register(&self, username: &str, name: &str) -> Result<Account> {
        let username = Username::parse(username)?;
        match self
            .backend()
            .insert(NewAccount::new(username.clone(), name))
            .await?
        {
            InsertOutcome::Created(account) => {
                info!(account_id = %account.id, "Account registered");
                Ok(account)
            }
            InsertOutcome::DuplicateUsername => {
                Err(LedgerError::DuplicateUsername(username.into_inner()))
            }
        }
    }

    /// Get committed account state.
    pub async fn account(&self, account_id: AccountId) -> Result<Account> {
        self.backend()
            .get(account_id)
            .await?
            .ok_or(LedgerError::NotFound(account_id))
    }

    /// Add `amount` to an account.
    #[instrument(skip(self, deadline), fields(account_id = %account_id, amount = %amount))]
    pub async fn top_up(
        &self,
        account_id: AccountId,
        amount: Amount,
        deadline: Deadline,
    ) -> Result<TransactionRecord> {
        let tracker = PhaseTracker::new("top_up");
        validate_amount(&tracker, amount)?;

        self.run_with_retry(&tracker, deadline, move |unit, phases| {
            Box::pin(top_up_in_unit(unit, phases, account_id, amount))
        })
        .await
    }

    /// Remove `amount` from an account.
    #[instrument(skip(self, deadline), fields(account_id = %account_id, amount = %amount))]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Amount,
        deadline: Deadline,
    ) -> Result<TransactionRecord> {
        let tracker = PhaseTracker::new("withdraw");
        validate_amount(&tracker, amount)?;

        self.run_with_retry(&tracker, deadline, move |unit, phases| {
            Box::pin(withdraw_in_unit(unit, phases, account_id, amount))
        })
        .await
    }

    /// Move `amount` from an account to the account named `target`.
    #[instrument(skip(self, deadline), fields(account_id = %account_id, amount = %amount))]
    pub async fn transfer(
        &self,
        account_id: AccountId,
        target: &str,
        amount: Amount,
        deadline: Deadline,
    ) -> Result<TransactionRecord> {
        let tracker = PhaseTracker::new("transfer");
        validate_amount(&tracker, amount)?;
        let target = match Username::parse(target) {
            Ok(target) => target,
            Err(err) => {
                tracker.advance(OperationPhase::Failed);
                return Err(err);
            }
        };

        self.run_with_retry(&tracker, deadline, move |unit, phases| {
            Box::pin(transfer_in_unit(
                unit,
                phases,
                account_id,
                target.clone(),
                amount,
            ))
        })
        .await
    }

    /// All records naming the account, ordered by creation time.
    #[instrument(skip(self))]
    pub async fn list_transactions(&self, account_id: AccountId) -> Result<Vec<TransactionRecord>> {
        let account = self.account(account_id).await?;
        let mut records: Vec<TransactionRecord> = self
            .backend()
            .find_by_account(account.username.as_str())
            .try_collect()
            .await?;
        records.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        debug!(count = records.len(), "Listed transactions");
        Ok(records)
    }

    async fn run_with_retry<W>(
        &self,
        tracker: &PhaseTracker,
        deadline: Deadline,
        work: W,
    ) -> Result<TransactionRecord>
    where
        W: for<'u> Fn(&'u mut B::Unit, PhaseTracker) -> BoxFuture<'u, Result<TransactionRecord>>
            + Send
            + Sync,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tracker.advance(OperationPhase::Reading);

            let phases = tracker.clone();
            let result = self
                .executor
                .run(deadline, |unit| work(unit, phases))
                .await;

            match result {
                Ok(record) => {
                    tracker.advance(OperationPhase::Committed);
                    self.stats.committed.fetch_add(1, Ordering::Relaxed);
                    info!(record_id = %record.id, attempt, "Operation committed");
                    return Ok(record);
                }
                Err(err) if err.is_conflict() => {
                    tracker.advance(OperationPhase::Conflict);

                    if !self.config.retry.should_retry(attempt, &err) {
                        tracker.advance(OperationPhase::Failed);
                        self.stats.conflicts_exhausted.fetch_add(1, Ordering::Relaxed);
                        warn!(attempt, error = %err, "Conflict retries exhausted");
                        return Err(err);
                    }

                    let backoff = self.config.retry.backoff(attempt);
                    if backoff >= deadline.remaining() {
                        tracker.advance(OperationPhase::Aborted);
                        tracker.advance(OperationPhase::Failed);
                        self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                        warn!(attempt, "Deadline expired while retrying conflict");
                        return Err(LedgerError::Aborted(
                            "deadline expired while retrying conflict".into(),
                        ));
                    }

                    self.stats.conflicts_retried.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        attempt,
                        backoff_us = backoff.as_micros() as u64,
                        "Conflict, retrying unit"
                    );
                    tracker.advance(OperationPhase::Started);
                    tokio::time::sleep(backoff).await;
                }
                Err(err @ LedgerError::Aborted(_)) => {
                    tracker.advance(OperationPhase::Aborted);
                    tracker.advance(OperationPhase::Failed);
                    self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                    warn!(attempt, error = %err, "Operation aborted");
                    return Err(err);
                }
                Err(err) => {
                    tracker.advance(OperationPhase::Failed);
                    debug!(attempt, error = %err, "Operation failed");
                    return Err(err);
                }
            }
        }
    }
}

fn validate_amount(tracker: &PhaseTracker, amount: Amount) -> Result<()> {
    tracker.advance(OperationPhase::Validating);
    if amount.is_positive() {
        Ok(())
    } else {
        tracker.advance(OperationPhase::Failed);
        Err(LedgerError::InsufficientAmount)
    }
}

fn expect_updated(outcome: UpdateOutcome, account_id: AccountId) -> Result<()> {
    match outcome {
        UpdateOutcome::Updated => Ok(()),
        UpdateOutcome::Conflict => Err(LedgerError::Conflict(format!(
            "balance of {} changed concurrently",
            account_id
        ))),
        UpdateOutcome::NotFound => Err(LedgerError::NotFound(account_id)),
    }
}

async fn top_up_in_unit<U: UnitOfWork>(
    unit: &mut U,
    phases: PhaseTracker,
    account_id: AccountId,
    amount: Amount,
) -> Result<TransactionRecord> {
    let account = unit
        .get_account(account_id)
        .await?
        .ok_or(LedgerError::NotFound(account_id))?;

    phases.advance(OperationPhase::Computing);
    let balance = account
        .balance
        .checked_add(amount)
        .ok_or(LedgerError::BalanceOverflow)?;
    let at = now();

    phases.advance(OperationPhase::Writing);
    expect_updated(
        unit.update_balance(account_id, account.balance, balance, at)
            .await?,
        account_id,
    )?;

    phases.advance(OperationPhase::Appending);
    let record = TransactionRecord::top_up(account.username, amount, balance, at);
    unit.append_record(record.clone()).await?;

    phases.advance(OperationPhase::Committing);
    Ok(record)
}

async fn withdraw_in_unit<U: UnitOfWork>(
    unit: &mut U,
    phases: PhaseTracker,
    account_id: AccountId,
    amount: Amount,
) -> Result<TransactionRecord> {
    let account = unit
        .get_account(account_id)
        .await?
        .ok_or(LedgerError::NotFound(account_id))?;

    phases.advance(OperationPhase::Computing);
    let balance = account
        .balance
        .checked_sub(amount)
        .ok_or(LedgerError::InsufficientFunds { account_id })?;
    let at = now();

    phases.advance(OperationPhase::Writing);
    expect_updated(
        unit.update_balance(account_id, account.balance, balance, at)
            .await?,
        account_id,
    )?;

    phases.advance(OperationPhase::Appending);
    let record = TransactionRecord::withdraw(account.username, amount, balance, at);
    unit.append_record(record.clone()).await?;

    phases.advance(OperationPhase::Committing);
    Ok(record)
}

async fn transfer_in_unit<U: UnitOfWork>(
    unit: &mut U,
    phases: PhaseTracker,
    account_id: AccountId,
    target: Username,
    amount: Amount,
) -> Result<TransactionRecord> {
    let source = unit
        .get_account(account_id)
        .await?
        .ok_or(LedgerError::NotFound(account_id))?;
    let target = unit
        .get_account_by_username(target.as_str())
        .await?
        .ok_or_else(|| LedgerError::TargetNotFound(target.into_inner()))?;
    if target.id == source.id {
        return Err(LedgerError::SameAccount);
    }

    phases.advance(OperationPhase::Computing);
    let source_balance = source
        .balance
        .checked_sub(amount)
        .ok_or(LedgerError::InsufficientFunds { account_id })?;
    let target_balance = target
        .balance
        .checked_add(amount)
        .ok_or(LedgerError::BalanceOverflow)?;
    let at = now();

    // Lower id first so two opposing transfers lock rows in the same order.
    phases.advance(OperationPhase::Writing);
    let mut writes = [
        (source.id, source.balance, source_balance),
        (target.id, target.balance, target_balance),
    ];
    writes.sort_by_key(|(id, _, _)| *id);
    for (id, expected, balance) in writes {
        expect_updated(unit.update_balance(id, expected, balance, at).await?, id)?;
    }

    phases.advance(OperationPhase::Appending);
    let record =
        TransactionRecord::transfer(source.username, target.username, amount, source_balance, at);
    unit.append_record(record.clone()).await?;

    phases.advance(OperationPhase::Committing);
    Ok(record)
}
