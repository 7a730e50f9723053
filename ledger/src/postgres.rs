//! PostgreSQL backend.
//!
//! Units run as `REPEATABLE READ` transactions. Balance writes are
//! conditional updates, and PostgreSQL's own serialization failures surface
//! as `Conflict` so the engine can retry them.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use walletledger_common::{
    AccountId, Amount, LedgerError, Result, Timestamp, TransactionId, Username,
};

use crate::account::{Account, NewAccount};
use crate::journal::{TransactionRecord, TransactionType};
use crate::store::{
    AccountStore, InsertOutcome, LedgerBackend, LedgerStore, UnitOfWork, UpdateOutcome,
};

/// Schema statements applied by [`PgStore::ensure_schema`].
pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS accounts (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        balance BIGINT NOT NULL CHECK (balance >= 0),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount > 0),
        balance_after BIGINT NOT NULL CHECK (balance_after >= 0),
        from_username TEXT NOT NULL,
        to_username TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS transactions_from_idx ON transactions (from_username)",
    "CREATE INDEX IF NOT EXISTS transactions_to_idx ON transactions (to_username)",
];

const ACCOUNT_COLUMNS: &str = "id, username, name, balance, created_at, updated_at";

/// PostgreSQL-backed account and ledger store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout: Option<Duration>,
}

impl PgStore {
    /// Connect a pool to `url`.
    #[instrument(skip(url))]
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Cancel any statement of a unit, `COMMIT` included, that runs longer
    /// than `timeout` on the server.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Create tables and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        debug!("Schema ensured");
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_account).transpose()
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE username = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_account).transpose()
    }

    async fn insert(&self, account: NewAccount) -> Result<InsertOutcome> {
        let account = account.into_account();
        let sql = format!(
            "INSERT INTO accounts ({}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (username) DO NOTHING RETURNING {}",
            ACCOUNT_COLUMNS, ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(*account.id.as_uuid())
            .bind(account.username.as_str())
            .bind(&account.name)
            .bind(account.balance.as_i64())
            .bind(account.created_at)
            .bind(account.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match map_sqlx_error(e) {
                LedgerError::DuplicateUsername(_) => {
                    LedgerError::DuplicateUsername(account.username.to_string())
                }
                other => other,
            })?;

        match row {
            Some(row) => Ok(InsertOutcome::Created(decode_account(&row)?)),
            None => Ok(InsertOutcome::DuplicateUsername),
        }
    }
}

impl LedgerStore for PgStore {
    fn find_by_account<'a>(
        &'a self,
        username: &'a str,
    ) -> BoxStream<'a, Result<TransactionRecord>> {
        sqlx::query(
            "SELECT id, kind, amount, balance_after, from_username, to_username, \
             created_at, updated_at FROM transactions \
             WHERE from_username = $1 OR to_username = $1 \
             ORDER BY created_at, id",
        )
        .bind(username)
        .fetch(&self.pool)
        .map(|row| row.map_err(map_sqlx_error).and_then(|row| decode_record(&row)))
        .boxed()
    }
}

#[async_trait]
impl LedgerBackend for PgStore {
    type Unit = PgUnit;

    async fn begin(&self) -> Result<PgUnit> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if let Some(timeout) = self.statement_timeout {
            // SET does not take bind parameters.
            sqlx::query(&format!(
                "SET LOCAL statement_timeout = {}",
                timeout.as_millis().max(1)
            ))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(PgUnit { tx })
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}

/// A `REPEATABLE READ` transaction acting as a unit of work.
pub struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_account).transpose()
    }

    async fn get_account_by_username(&mut self, username: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE username = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_account).transpose()
    }

    async fn update_balance(
        &mut self,
        id: AccountId,
        expected: Amount,
        balance: Amount,
        at: Timestamp,
    ) -> Result<UpdateOutcome> {
        let result = sqlx::query(
            "UPDATE accounts SET balance = $1, updated_at = $2 WHERE id = $3 AND balance = $4",
        )
        .bind(balance.as_i64())
        .bind(at)
        .bind(*id.as_uuid())
        .bind(expected.as_i64())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            return Ok(UpdateOutcome::Updated);
        }

        let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .is_some();

        Ok(if exists {
            UpdateOutcome::Conflict
        } else {
            UpdateOutcome::NotFound
        })
    }

    async fn append_record(&mut self, record: TransactionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions \
             (id, kind, amount, balance_after, from_username, to_username, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(*record.id.as_uuid())
        .bind(record.kind.as_str())
        .bind(record.amount.as_i64())
        .bind(record.balance_after.as_i64())
        .bind(record.from.as_str())
        .bind(record.to.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(|error| match map_sqlx_error(error) {
            LedgerError::Unavailable(reason) => {
                LedgerError::Unavailable(format!("commit outcome unknown: {}", reason))
            }
            other => other,
        })
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

fn decode_amount(value: i64, column: &str) -> Result<Amount> {
    Amount::from_i64(value)
        .ok_or_else(|| LedgerError::Corrupt(format!("negative {}: {}", column, value)))
}

fn decode_account(row: &PgRow) -> Result<Account> {
    let id: Uuid = row.try_get("id").map_err(map_sqlx_error)?;
    let username: String = row.try_get("username").map_err(map_sqlx_error)?;
    let name: String = row.try_get("name").map_err(map_sqlx_error)?;
    let balance: i64 = row.try_get("balance").map_err(map_sqlx_error)?;
    let created_at: Timestamp = row.try_get("created_at").map_err(map_sqlx_error)?;
    let updated_at: Timestamp = row.try_get("updated_at").map_err(map_sqlx_error)?;

    Ok(Account {
        id: AccountId::from_uuid(id),
        username: Username::new(username),
        name,
        balance: decode_amount(balance, "balance")?,
        created_at,
        updated_at,
    })
}

fn decode_record(row: &PgRow) -> Result<TransactionRecord> {
    let id: Uuid = row.try_get("id").map_err(map_sqlx_error)?;
    let kind: String = row.try_get("kind").map_err(map_sqlx_error)?;
    let amount: i64 = row.try_get("amount").map_err(map_sqlx_error)?;
    let balance_after: i64 = row.try_get("balance_after").map_err(map_sqlx_error)?;
    let from: String = row.try_get("from_username").map_err(map_sqlx_error)?;
    let to: String = row.try_get("to_username").map_err(map_sqlx_error)?;
    let created_at: Timestamp = row.try_get("created_at").map_err(map_sqlx_error)?;
    let updated_at: Timestamp = row.try_get("updated_at").map_err(map_sqlx_error)?;

    Ok(TransactionRecord {
        id: TransactionId::from_uuid(id),
        kind: TransactionType::from_str(&kind)?,
        amount: decode_amount(amount, "amount")?,
        balance_after: decode_amount(balance_after, "balance_after")?,
        from: Username::new(from),
        to: Username::new(to),
        created_at,
        updated_at,
    })
}

/// Map a driver error onto the ledger taxonomy.
pub fn map_sqlx_error(error: sqlx::Error) -> LedgerError {
    match &error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => LedgerError::Conflict(db.message().to_string()),
            // unique_violation
            Some("23505") => LedgerError::DuplicateUsername(db.message().to_string()),
            // check_violation
            Some("23514") => LedgerError::Corrupt(db.message().to_string()),
            // query_canceled, usually statement_timeout
            Some("57014") => LedgerError::Aborted(db.message().to_string()),
            _ => LedgerError::Unavailable(error.to_string()),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_) => LedgerError::Unavailable(error.to_string()),
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => LedgerError::Corrupt(error.to_string()),
        _ => LedgerError::Unavailable(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            LedgerError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            LedgerError::Unavailable(_)
        ));
    }

    #[test]
    fn test_decode_errors_are_corrupt() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::ColumnNotFound("balance".into())),
            LedgerError::Corrupt(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            LedgerError::Corrupt(_)
        ));
    }

    #[test]
    fn test_negative_amount_is_corrupt() {
        assert_eq!(decode_amount(12, "balance").unwrap(), Amount::new(12));
        assert!(matches!(
            decode_amount(-5, "balance"),
            Err(LedgerError::Corrupt(_))
        ));
    }
}
