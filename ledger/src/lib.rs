//! WalletLedger Ledger Engine
//!
//! Account balances and an append-only transaction ledger, mutated only
//! through atomic units with snapshot isolation and optimistic conflict
//! detection.

pub mod account;
pub mod balance;
pub mod engine;
pub mod journal;
pub mod memory;
pub mod phase;
pub mod postgres;
pub mod retry;
pub mod store;
pub mod unit;

pub use account::{Account, NewAccount};
pub use balance::BalanceWrite;
pub use engine::{EngineConfig, EngineStats, EngineStatsSnapshot, LedgerEngine};
pub use journal::{TransactionRecord, TransactionType};
pub use memory::{MemoryStore, MemoryUnit};
pub use phase::{OperationPhase, PhaseTracker};
pub use postgres::{PgStore, PgUnit};
pub use retry::RetryPolicy;
pub use store::{AccountStore, InsertOutcome, LedgerBackend, LedgerStore, UnitOfWork, UpdateOutcome};
pub use unit::AtomicUnitExecutor;
