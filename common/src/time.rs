//! Time utilities and deadlines for wallet ledger operations.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Default timing constants.
pub mod constants {
    use std::time::Duration;

    /// Wall-clock budget for a single atomic unit (2 seconds).
    pub const fn default_unit_timeout() -> Duration {
        Duration::from_secs(2)
    }

    /// Wall-clock budget for a whole operation including retries (10 seconds).
    pub const fn default_operation_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Maximum time `stop` waits for in-flight operations (5 seconds).
    pub const fn default_drain_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Caller-supplied bound on the total duration of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Create a deadline expiring `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    /// Check if the deadline has been exceeded.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Get remaining duration, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Remaining duration capped at `budget`.
    pub fn budget(&self, budget: Duration) -> Duration {
        self.remaining().min(budget)
    }
}
