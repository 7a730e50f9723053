//! Pending balance writes inside an atomic unit.

use walletledger_common::{AccountId, Amount, Timestamp};

/// A conditional balance write buffered by a unit until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceWrite {
    /// Account being written.
    pub account_id: AccountId,
    /// Balance the write was conditioned on.
    pub previous: Amount,
    /// New balance.
    pub balance: Amount,
    /// Mutation time.
    pub at: Timestamp,
}

impl BalanceWrite {
    /// Create a new pending write.
    pub fn new(account_id: AccountId, previous: Amount, balance: Amount, at: Timestamp) -> Self {
        Self {
            account_id,
            previous,
            balance,
            at,
        }
    }

    /// Fold a later write to the same account into this one.
    ///
    /// The first precondition is kept; only the target balance moves.
    pub fn merge(&mut self, later: BalanceWrite) {
        debug_assert_eq!(self.account_id, later.account_id);
        self.balance = later.balance;
        self.at = later.at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletledger_common::now;

    #[test]
    fn test_merge_keeps_first_precondition() {
        let id = AccountId::new();
        let mut write = BalanceWrite::new(id, Amount::new(100), Amount::new(150), now());
        write.merge(BalanceWrite::new(id, Amount::new(150), Amount::new(120), now()));

        assert_eq!(write.previous, Amount::new(100));
        assert_eq!(write.balance, Amount::new(120));
    }
}
