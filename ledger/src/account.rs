//! Account definitions for the wallet ledger.

use serde::{Deserialize, Serialize};
use walletledger_common::{now, AccountId, Amount, Timestamp, Username};

/// A wallet account and its current balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Unique handle, immutable after creation.
    pub username: Username,
    /// Display name.
    pub name: String,
    /// Balance in minor units.
    pub balance: Amount,
    /// When the account was created.
    pub created_at: Timestamp,
    /// When the balance was last mutated.
    pub updated_at: Timestamp,
}

/// Registration request for a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    /// Requested handle.
    pub username: Username,
    /// Display name.
    pub name: String,
}

impl NewAccount {
    /// Create a registration request.
    pub fn new(username: Username, name: impl Into<String>) -> Self {
        Self {
            username,
            name: name.into(),
        }
    }

    /// Materialize the account with a fresh id and a zero balance.
    pub fn into_account(self) -> Account {
        let created_at = now();
        Account {
            id: AccountId::new(),
            username: self.username,
            name: self.name,
            balance: Amount::ZERO,
            created_at,
            updated_at: created_at,
        }
    }
}
