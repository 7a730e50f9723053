//! In-process multi-version store.
//!
//! Every commit gets a sequence number. Each account keeps a short chain of
//! committed versions tagged with that number, so a unit reads the state as
//! of the sequence it started at. Commits validate first-committer-wins: a
//! unit whose written accounts gained a newer version since its snapshot
//! fails with `Conflict`. Versions no active snapshot can see are pruned.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, trace};

use walletledger_common::{AccountId, Amount, LedgerError, Result, Timestamp, Username};

use crate::account::{Account, NewAccount};
use crate::balance::BalanceWrite;
use crate::journal::TransactionRecord;
use crate::store::{
    AccountStore, InsertOutcome, LedgerBackend, LedgerStore, UnitOfWork, UpdateOutcome,
};

type Seq = u64;

#[derive(Debug, Clone)]
struct Version {
    committed_at: Seq,
    account: Account,
}

#[derive(Debug, Default)]
struct AccountRow {
    /// Ascending by `committed_at`.
    versions: Vec<Version>,
}

impl AccountRow {
    fn visible_at(&self, snapshot: Seq) -> Option<&Account> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.committed_at <= snapshot)
            .map(|v| &v.account)
    }

    fn latest(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Drop versions shadowed at `horizon`.
    fn prune(&mut self, horizon: Seq) {
        if let Some(keep_from) = self.versions.iter().rposition(|v| v.committed_at <= horizon) {
            self.versions.drain(..keep_from);
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    commit_seq: Seq,
    accounts: HashMap<AccountId, AccountRow>,
    usernames: HashMap<Username, AccountId>,
    records: Vec<TransactionRecord>,
    records_by_username: HashMap<Username, Vec<usize>>,
    /// Snapshot sequence -> number of open units reading at it.
    active_snapshots: BTreeMap<Seq, usize>,
}

impl MemoryState {
    fn open_snapshot(&mut self) -> Seq {
        let seq = self.commit_seq;
        *self.active_snapshots.entry(seq).or_insert(0) += 1;
        seq
    }

    fn release_snapshot(&mut self, seq: Seq) {
        if let Some(count) = self.active_snapshots.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                self.active_snapshots.remove(&seq);
            }
        }
    }

    /// Oldest sequence any open unit can still read.
    fn horizon(&self) -> Seq {
        self.active_snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or(self.commit_seq)
    }

    fn index_record(&mut self, record: TransactionRecord) {
        let position = self.records.len();
        self.records_by_username
            .entry(record.from.clone())
            .or_default()
            .push(position);
        if record.to != record.from {
            self.records_by_username
                .entry(record.to.clone())
                .or_default()
                .push(position);
        }
        self.records.push(record);
    }

    fn view(
        &self,
        snapshot: Seq,
        writes: &BTreeMap<AccountId, BalanceWrite>,
        id: AccountId,
    ) -> Option<Account> {
        let mut account = self.accounts.get(&id)?.visible_at(snapshot)?.clone();
        if let Some(write) = writes.get(&id) {
            account.balance = write.balance;
            account.updated_at = write.at;
        }
        Some(account)
    }
}

/// In-memory backend with snapshot isolation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records.
    pub fn record_count(&self) -> usize {
        self.state.read().records.len()
    }

    /// Number of versions currently retained for an account.
    pub fn retained_versions(&self, id: AccountId) -> usize {
        self.state
            .read()
            .accounts
            .get(&id)
            .map(|row| row.versions.len())
            .unwrap_or(0)
    }

    /// Number of units currently holding a snapshot.
    pub fn active_units(&self) -> usize {
        self.state.read().active_snapshots.values().sum()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(LedgerError::Unavailable("memory store closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state
            .accounts
            .get(&id)
            .and_then(|row| row.latest())
            .map(|v| v.account.clone()))
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state
            .usernames
            .get(username)
            .and_then(|id| state.accounts.get(id))
            .and_then(|row| row.latest())
            .map(|v| v.account.clone()))
    }

    async fn insert(&self, account: NewAccount) -> Result<InsertOutcome> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if state.usernames.contains_key(account.username.as_str()) {
            return Ok(InsertOutcome::DuplicateUsername);
        }

        let account = account.into_account();
        state.commit_seq += 1;
        let committed_at = state.commit_seq;
        state.usernames.insert(account.username.clone(), account.id);
        state.accounts.insert(
            account.id,
            AccountRow {
                versions: vec![Version {
                    committed_at,
                    account: account.clone(),
                }],
            },
        );

        debug!(account_id = %account.id, username = %account.username, "Account inserted");
        Ok(InsertOutcome::Created(account))
    }
}

impl LedgerStore for MemoryStore {
    fn find_by_account<'a>(
        &'a self,
        username: &'a str,
    ) -> BoxStream<'a, Result<TransactionRecord>> {
        if let Err(e) = self.ensure_open() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let matches: Vec<TransactionRecord> = {
            let state = self.state.read();
            state
                .records_by_username
                .get(username)
                .map(|positions| {
                    positions
                        .iter()
                        .map(|&position| state.records[position].clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        stream::iter(matches.into_iter().map(Ok)).boxed()
    }
}

#[async_trait]
impl LedgerBackend for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit> {
        self.ensure_open()?;
        let snapshot = self.state.write().open_snapshot();
        trace!(snapshot, "Unit started");
        Ok(MemoryUnit {
            state: Arc::clone(&self.state),
            closed: Arc::clone(&self.closed),
            snapshot,
            writes: BTreeMap::new(),
            records: Vec::new(),
            released: false,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        debug!("Memory store closed");
    }
}

/// A unit of work over a [`MemoryStore`] snapshot.
#[derive(Debug)]
pub struct MemoryUnit {
    state: Arc<RwLock<MemoryState>>,
    closed: Arc<AtomicBool>,
    snapshot: Seq,
    writes: BTreeMap<AccountId, BalanceWrite>,
    records: Vec<TransactionRecord>,
    released: bool,
}

impl MemoryUnit {
    fn read_account(&self, id: AccountId) -> Option<Account> {
        self.state.read().view(self.snapshot, &self.writes, id)
    }

    fn read_account_by_username(&self, username: &str) -> Option<Account> {
        let state = self.state.read();
        let id = *state.usernames.get(username)?;
        state.view(self.snapshot, &self.writes, id)
    }

    fn stage_write(
        &mut self,
        id: AccountId,
        expected: Amount,
        balance: Amount,
        at: Timestamp,
    ) -> UpdateOutcome {
        {
            let state = self.state.read();
            let Some(current) = state.view(self.snapshot, &self.writes, id) else {
                return UpdateOutcome::NotFound;
            };
            if current.balance != expected {
                return UpdateOutcome::Conflict;
            }
            let newer = state
                .accounts
                .get(&id)
                .and_then(|row| row.latest())
                .map(|v| v.committed_at > self.snapshot)
                .unwrap_or(false);
            if newer {
                return UpdateOutcome::Conflict;
            }
        }

        let write = BalanceWrite::new(id, expected, balance, at);
        match self.writes.entry(id) {
            Entry::Occupied(mut entry) => entry.get_mut().merge(write),
            Entry::Vacant(entry) => {
                entry.insert(write);
            }
        }
        UpdateOutcome::Updated
    }

    fn apply(&mut self) -> Result<()> {
        let mut state = self.state.write();
        state.release_snapshot(self.snapshot);
        self.released = true;

        if self.closed.load(Ordering::Acquire) {
            return Err(LedgerError::Unavailable("memory store closed".into()));
        }

        for write in self.writes.values() {
            let latest = state
                .accounts
                .get(&write.account_id)
                .and_then(|row| row.latest())
                .ok_or_else(|| {
                    LedgerError::Corrupt(format!("account {} vanished", write.account_id))
                })?;
            if latest.committed_at > self.snapshot {
                return Err(LedgerError::Conflict(format!(
                    "account {} changed since snapshot",
                    write.account_id
                )));
            }
        }

        if self.writes.is_empty() && self.records.is_empty() {
            return Ok(());
        }

        state.commit_seq += 1;
        let committed_at = state.commit_seq;
        let horizon = state.horizon();

        for write in self.writes.values() {
            if let Some(row) = state.accounts.get_mut(&write.account_id) {
                if let Some(mut account) = row.latest().map(|v| v.account.clone()) {
                    account.balance = write.balance;
                    account.updated_at = write.at;
                    row.versions.push(Version {
                        committed_at,
                        account,
                    });
                }
                row.prune(horizon);
            }
        }
        for record in self.records.drain(..) {
            state.index_record(record);
        }

        trace!(committed_at, writes = self.writes.len(), "Unit committed");
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.state.write().release_snapshot(self.snapshot);
            self.released = true;
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.read_account(id))
    }

    async fn get_account_by_username(&mut self, username: &str) -> Result<Option<Account>> {
        Ok(self.read_account_by_username(username))
    }

    async fn update_balance(
        &mut self,
        id: AccountId,
        expected: Amount,
        balance: Amount,
        at: Timestamp,
    ) -> Result<UpdateOutcome> {
        Ok(self.stage_write(id, expected, balance, at))
    }

    async fn append_record(&mut self, record: TransactionRecord) -> Result<()> {
        self.records.push(record);
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        self.apply()
    }

    async fn rollback(mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        self.release();
    }
}
