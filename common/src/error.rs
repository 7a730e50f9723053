//! Error types for the wallet ledger.

use crate::AccountId;
use thiserror::Error;

/// Broad class of a [`LedgerError`], used to decide retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected before any store access; never retried.
    Validation,
    /// Terminal business outcome for the current call.
    Domain,
    /// Transient optimistic-concurrency failure; safe to retry the whole unit.
    Concurrency,
    /// Timeout or storage failure; retry policy belongs to the caller.
    Infrastructure,
}

/// Main error type for wallet ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount must be strictly positive.
    #[error("Amount must be greater than zero")]
    InsufficientAmount,

    /// Source and target of a transfer are the same account.
    #[error("Cannot transfer to the same account")]
    SameAccount,

    /// Username does not satisfy the handle format.
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Account not found.
    #[error("Account not found: {0}")]
    NotFound(AccountId),

    /// Transfer target not found.
    #[error("Target account not found: {0}")]
    TargetNotFound(String),

    /// Balance does not cover the requested amount.
    #[error("Insufficient funds in account {account_id}")]
    InsufficientFunds { account_id: AccountId },

    /// Username already registered.
    #[error("Username already exists: {0}")]
    DuplicateUsername(String),

    /// Balance would exceed the representable maximum.
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Concurrent modification detected.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unit of work aborted (deadline or timeout exceeded).
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// Storage or service unavailable.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Stored data violates an invariant.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl LedgerError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InsufficientAmount
            | LedgerError::SameAccount
            | LedgerError::InvalidUsername(_) => ErrorKind::Validation,
            LedgerError::NotFound(_)
            | LedgerError::TargetNotFound(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::DuplicateUsername(_)
            | LedgerError::BalanceOverflow => ErrorKind::Domain,
            LedgerError::Conflict(_) => ErrorKind::Concurrency,
            LedgerError::Aborted(_)
            | LedgerError::Unavailable(_)
            | LedgerError::Corrupt(_)
            | LedgerError::ConfigurationError(_) => ErrorKind::Infrastructure,
        }
    }

    /// Check if the engine may retry the unit that produced this error.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }

    /// Check if this is a concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }

    /// Get stable error code for callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientAmount => "INSUFFICIENT_AMOUNT",
            LedgerError::SameAccount => "SAME_ACCOUNT",
            LedgerError::InvalidUsername(_) => "INVALID_USERNAME",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::TargetNotFound(_) => "TARGET_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::DuplicateUsername(_) => "DUPLICATE_USERNAME",
            LedgerError::BalanceOverflow => "BALANCE_OVERFLOW",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::Aborted(_) => "ABORTED",
            LedgerError::Unavailable(_) => "UNAVAILABLE",
            LedgerError::Corrupt(_) => "CORRUPT_RECORD",
            LedgerError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for wallet ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(LedgerError::Conflict("balance changed".into()).is_retryable());
        assert!(!LedgerError::Aborted("deadline".into()).is_retryable());
        assert!(!LedgerError::InsufficientFunds {
            account_id: AccountId::new()
        }
        .is_retryable());
        assert!(!LedgerError::InsufficientAmount.is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(LedgerError::SameAccount.kind(), ErrorKind::Validation);
        assert_eq!(
            LedgerError::TargetNotFound("ghost".into()).kind(),
            ErrorKind::Domain
        );
        assert_eq!(
            LedgerError::Unavailable("pool closed".into()).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn test_insufficient_funds_does_not_leak_balance() {
        let account_id = AccountId::new();
        let message = LedgerError::InsufficientFunds { account_id }.to_string();
        assert_eq!(message, format!("Insufficient funds in account {}", account_id));
        assert_eq!(
            LedgerError::InsufficientFunds { account_id }.error_code(),
            "INSUFFICIENT_FUNDS"
        );
    }
}
