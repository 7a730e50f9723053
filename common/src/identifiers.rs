//! Identifier types for wallet ledger entities.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an account.
/// Uses UUID v7 for time-ordered identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Create a new account ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ledger transaction record.
///
/// Uses UUID v7 for time-ordered identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Create a new transaction ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maximum username length accepted by the ledger.
pub const MAX_USERNAME_LEN: usize = 64;

/// Unique human-readable account handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Create a username without validation.
    ///
    /// Use [`Username::parse`] for input coming from outside the process.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Parse and validate a username.
    pub fn parse(name: impl Into<String>) -> Result<Self, crate::LedgerError> {
        let username = Self(name.into());
        if username.is_valid() {
            Ok(username)
        } else {
            Err(crate::LedgerError::InvalidUsername(username.0))
        }
    }

    /// Get the username as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the username format.
    pub fn is_valid(&self) -> bool {
        // Non-empty, bounded, alphanumeric with underscores
        !self.0.is_empty()
            && self.0.len() <= MAX_USERNAME_LEN
            && self.0.chars().all(|c| c.is_alphanumeric() || c == '_')
    }

    /// Consume into the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Username {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Username {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_creation() {
        let id1 = AccountId::new();
        let id2 = AccountId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_transaction_id_parse() {
        let uuid_str = "019456ab-1234-7def-8901-234567890abc";
        let id = TransactionId::parse(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn test_username_validation() {
        assert!(Username::new("alice").is_valid());
        assert!(Username::new("bob_42").is_valid());
        assert!(!Username::new("").is_valid());
        assert!(!Username::new("with-dash").is_valid());
        assert!(!Username::new("a".repeat(MAX_USERNAME_LEN + 1)).is_valid());

        assert!(Username::parse("carol").is_ok());
        assert!(matches!(
            Username::parse("no spaces"),
            Err(crate::LedgerError::InvalidUsername(_))
        ));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = AccountId::parse("019456ab-1234-7def-8901-234567890abc").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"019456ab-1234-7def-8901-234567890abc\"");
    }
}
