//! Atomic unit executor.
//!
//! Runs a closure against a fresh [`UnitOfWork`], committing on success and
//! rolling back on error or timeout. The time budget covers opening the unit
//! and running the closure; the commit itself always runs to completion so
//! its outcome is never lost.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use walletledger_common::{Deadline, LedgerError, Result};

use crate::store::{LedgerBackend, UnitOfWork};

/// Executes closures as all-or-nothing units on a backend.
pub struct AtomicUnitExecutor<B: LedgerBackend> {
    backend: Arc<B>,
    unit_timeout: Duration,
}

impl<B: LedgerBackend> AtomicUnitExecutor<B> {
    /// Create an executor with a per-unit timeout.
    pub fn new(backend: Arc<B>, unit_timeout: Duration) -> Self {
        Self {
            backend,
            unit_timeout,
        }
    }

    /// Backend the executor opens units on.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Per-unit timeout.
    pub fn unit_timeout(&self) -> Duration {
        self.unit_timeout
    }

    /// Run `work` as one unit bounded by `deadline` and the unit timeout.
    ///
    /// Returns `Aborted` if the budget runs out before the commit starts, and
    /// `Conflict` if the commit loses a race with another unit. Neither leaves
    /// any partial effect. A commit whose outcome cannot be observed surfaces
    /// as `Unavailable`.
    pub async fn run<T, F>(&self, deadline: Deadline, work: F) -> Result<T>
    where
        T: Send,
        F: for<'u> FnOnce(&'u mut B::Unit) -> BoxFuture<'u, Result<T>> + Send,
    {
        let budget = deadline.budget(self.unit_timeout);
        if budget.is_zero() {
            return Err(LedgerError::Aborted(
                "deadline expired before unit start".into(),
            ));
        }
        let expires = tokio::time::Instant::now() + budget;

        let mut unit = match tokio::time::timeout_at(expires, self.backend.begin()).await {
            Ok(unit) => unit?,
            Err(_) => return Err(timed_out(budget)),
        };

        let outcome = tokio::time::timeout_at(expires, work(&mut unit)).await;
        match outcome {
            Ok(Ok(value)) => {
                // Not raced against the budget: once sent, a commit may already
                // be durable.
                unit.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                debug!(error = %err, "Unit failed, rolling back");
                rollback(unit).await;
                Err(err)
            }
            Err(_) => {
                rollback(unit).await;
                Err(timed_out(budget))
            }
        }
    }
}

async fn rollback<U: UnitOfWork>(unit: U) {
    if let Err(err) = unit.rollback().await {
        warn!(error = %err, "Rollback failed");
    }
}

fn timed_out(budget: Duration) -> LedgerError {
    warn!(budget_ms = budget.as_millis() as u64, "Unit timed out");
    LedgerError::Aborted(format!("unit exceeded {}ms budget", budget.as_millis()))
}
