//! Transaction records appended to the ledger.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use walletledger_common::{Amount, LedgerError, Timestamp, TransactionId, Username};

/// Type of balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Funds added to an account.
    TopUp,
    /// Funds removed from an account.
    Withdraw,
    /// Funds moved from one account to another.
    Transfer,
}

impl TransactionType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::TopUp => "TOP_UP",
            TransactionType::Withdraw => "WITHDRAW",
            TransactionType::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TOP_UP" => Ok(TransactionType::TopUp),
            "WITHDRAW" => Ok(TransactionType::Withdraw),
            "TRANSFER" => Ok(TransactionType::Transfer),
            other => Err(LedgerError::Corrupt(format!(
                "unknown transaction type: {}",
                other
            ))),
        }
    }
}

/// Immutable record of one committed balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique record ID.
    pub id: TransactionId,
    /// Movement type.
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Magnitude moved.
    pub amount: Amount,
    /// Balance of the initiating account after the mutation.
    pub balance_after: Amount,
    /// Debited (or only) account.
    pub from: Username,
    /// Credited (or only) account.
    pub to: Username,
    /// When the record was created.
    pub created_at: Timestamp,
    /// Equal to `created_at`; records are never updated.
    pub updated_at: Timestamp,
}

impl TransactionRecord {
    fn new(
        kind: TransactionType,
        from: Username,
        to: Username,
        amount: Amount,
        balance_after: Amount,
        at: Timestamp,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            kind,
            amount,
            balance_after,
            from,
            to,
            created_at: at,
            updated_at: at,
        }
    }

    /// Record a top-up of `account`.
    pub fn top_up(account: Username, amount: Amount, balance_after: Amount, at: Timestamp) -> Self {
        Self::new(
            TransactionType::TopUp,
            account.clone(),
            account,
            amount,
            balance_after,
            at,
        )
    }

    /// Record a withdrawal from `account`.
    pub fn withdraw(account: Username, amount: Amount, balance_after: Amount, at: Timestamp) -> Self {
        Self::new(
            TransactionType::Withdraw,
            account.clone(),
            account,
            amount,
            balance_after,
            at,
        )
    }

    /// Record a transfer. `balance_after` is the source's new balance.
    pub fn transfer(
        from: Username,
        to: Username,
        amount: Amount,
        balance_after: Amount,
        at: Timestamp,
    ) -> Self {
        Self::new(TransactionType::Transfer, from, to, amount, balance_after, at)
    }

    /// Check if the record names `username` on either side.
    pub fn involves(&self, username: &str) -> bool {
        self.from.as_str() == username || self.to.as_str() == username
    }

    /// Signed effect of this record on `username`'s balance.
    pub fn delta_for(&self, username: &str) -> i128 {
        let amount = self.amount.minor_units() as i128;
        match self.kind {
            TransactionType::TopUp if self.to.as_str() == username => amount,
            TransactionType::Withdraw if self.from.as_str() == username => -amount,
            TransactionType::Transfer if self.from.as_str() == username => -amount,
            TransactionType::Transfer if self.to.as_str() == username => amount,
            _ => 0,
        }
    }
}
