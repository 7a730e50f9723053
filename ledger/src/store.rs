//! Storage contracts for accounts and ledger records.
//!
//! Backends implement [`AccountStore`] and [`LedgerStore`] for reads outside
//! any unit, and hand out [`UnitOfWork`] values that group conditional
//! balance writes and record appends into one all-or-nothing commit.

use async_trait::async_trait;
use futures::stream::BoxStream;

use walletledger_common::{AccountId, Amount, Result, Timestamp};

use crate::account::{Account, NewAccount};
use crate::journal::TransactionRecord;

/// Result of a conditional balance write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The stored balance matched and was replaced.
    Updated,
    /// The stored balance differed from the expected value.
    Conflict,
    /// No such account.
    NotFound,
}

/// Result of inserting a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Account created.
    Created(Account),
    /// Username already taken.
    DuplicateUsername,
}

/// Committed account state, read outside any unit.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch an account by id.
    async fn get(&self, id: AccountId) -> Result<Option<Account>>;

    /// Fetch an account by username.
    async fn get_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// Insert a new account with a zero balance.
    async fn insert(&self, account: NewAccount) -> Result<InsertOutcome>;
}

/// Append-only transaction records.
pub trait LedgerStore: Send + Sync {
    /// Stream committed records where `username` is the source or target.
    ///
    /// Order is backend-defined; callers sort if they need a stable order.
    fn find_by_account<'a>(&'a self, username: &'a str)
        -> BoxStream<'a, Result<TransactionRecord>>;
}

/// One atomic unit of reads and writes against a consistent snapshot.
///
/// Dropping a unit without calling [`commit`](UnitOfWork::commit) discards
/// every buffered effect.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Read an account as seen by this unit.
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>>;

    /// Read an account by username as seen by this unit.
    async fn get_account_by_username(&mut self, username: &str) -> Result<Option<Account>>;

    /// Replace the balance only if it still equals `expected`.
    async fn update_balance(
        &mut self,
        id: AccountId,
        expected: Amount,
        balance: Amount,
        at: Timestamp,
    ) -> Result<UpdateOutcome>;

    /// Append a record, visible to others only after commit.
    async fn append_record(&mut self, record: TransactionRecord) -> Result<()>;

    /// Make every effect of the unit visible at once, or none of them.
    async fn commit(self) -> Result<()>;

    /// Discard every effect of the unit.
    async fn rollback(self) -> Result<()>;
}

/// A storage backend able to open atomic units.
#[async_trait]
pub trait LedgerBackend: AccountStore + LedgerStore + 'static {
    /// Unit type handed out by [`begin`](LedgerBackend::begin).
    type Unit: UnitOfWork + 'static;

    /// Open a unit on a fresh snapshot.
    async fn begin(&self) -> Result<Self::Unit>;

    /// Release backend resources. Later calls fail with `Unavailable`.
    async fn close(&self);
}
