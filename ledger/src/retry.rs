//! Bounded retry with exponential backoff for conflicting units.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use walletledger_common::{LedgerError, Result};

/// Retry policy applied when a unit fails with `Conflict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total unit attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub base_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Randomize each backoff over its upper half.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(50),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Check if a unit that failed on `attempt` (1-based) should run again.
    pub fn should_retry(&self, attempt: u32, error: &LedgerError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Backoff to sleep after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);

        if !self.jitter || backoff.is_zero() {
            return backoff;
        }

        let half = backoff / 2;
        let spread = (backoff - half).as_micros() as u64;
        half + Duration::from_micros(rand::thread_rng().gen_range(0..=spread))
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(LedgerError::ConfigurationError(
                "retry max_attempts must be at least 1".into(),
            ));
        }
        if self.base_backoff > self.max_backoff {
            return Err(LedgerError::ConfigurationError(
                "retry base_backoff must not exceed max_backoff".into(),
            ));
        }
        Ok(())
    }
}
