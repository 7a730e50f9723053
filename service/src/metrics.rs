//! Metrics collection for wallet service monitoring.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use walletledger_common::{ErrorKind, LedgerError};
use walletledger_ledger::EngineStatsSnapshot;

/// Operations tracked by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Register,
    Account,
    TopUp,
    Withdraw,
    Transfer,
    ListTransactions,
}

impl OperationKind {
    /// All kinds, in export order.
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Register,
        OperationKind::Account,
        OperationKind::TopUp,
        OperationKind::Withdraw,
        OperationKind::Transfer,
        OperationKind::ListTransactions,
    ];

    /// Label used in metric exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Register => "register",
            OperationKind::Account => "account",
            OperationKind::TopUp => "top_up",
            OperationKind::Withdraw => "withdraw",
            OperationKind::Transfer => "transfer",
            OperationKind::ListTransactions => "list_transactions",
        }
    }

    fn index(&self) -> usize {
        match self {
            OperationKind::Register => 0,
            OperationKind::Account => 1,
            OperationKind::TopUp => 2,
            OperationKind::Withdraw => 3,
            OperationKind::Transfer => 4,
            OperationKind::ListTransactions => 5,
        }
    }
}

#[derive(Debug, Default)]
struct OperationCounters {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Service metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    operations: [OperationCounters; 6],
    /// Failures by error class: validation, domain, concurrency, infrastructure.
    failures_by_kind: [AtomicU64; 4],
    /// Requests refused because the service was not running.
    rejected_unavailable: AtomicU64,
    /// Operations currently executing.
    in_flight: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation start.
    pub fn operation_started(&self, kind: OperationKind) {
        self.operations[kind.index()]
            .started
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation success.
    pub fn operation_succeeded(&self, kind: OperationKind) {
        self.operations[kind.index()]
            .succeeded
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation failure.
    pub fn operation_failed(&self, kind: OperationKind, error: &LedgerError) {
        self.operations[kind.index()]
            .failed
            .fetch_add(1, Ordering::Relaxed);
        let class = match error.kind() {
            ErrorKind::Validation => 0,
            ErrorKind::Domain => 1,
            ErrorKind::Concurrency => 2,
            ErrorKind::Infrastructure => 3,
        };
        self.failures_by_kind[class].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request refused while not running.
    pub fn request_rejected(&self) {
        self.rejected_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the in-flight gauge.
    pub fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the in-flight gauge.
    pub fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Operations currently executing.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Get current metrics snapshot, including engine counters.
    pub fn snapshot(&self, engine: EngineStatsSnapshot) -> MetricsSnapshot {
        let operations = OperationKind::ALL
            .iter()
            .map(|kind| {
                let counters = &self.operations[kind.index()];
                OperationSnapshot {
                    kind: *kind,
                    started: counters.started.load(Ordering::Relaxed),
                    succeeded: counters.succeeded.load(Ordering::Relaxed),
                    failed: counters.failed.load(Ordering::Relaxed),
                }
            })
            .collect();

        MetricsSnapshot {
            operations,
            validation_failures: self.failures_by_kind[0].load(Ordering::Relaxed),
            domain_failures: self.failures_by_kind[1].load(Ordering::Relaxed),
            concurrency_failures: self.failures_by_kind[2].load(Ordering::Relaxed),
            infrastructure_failures: self.failures_by_kind[3].load(Ordering::Relaxed),
            rejected_unavailable: self.rejected_unavailable.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            engine,
        }
    }
}

/// Counters for one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub kind: OperationKind,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub operations: Vec<OperationSnapshot>,
    pub validation_failures: u64,
    pub domain_failures: u64,
    pub concurrency_failures: u64,
    pub infrastructure_failures: u64,
    pub rejected_unavailable: u64,
    pub in_flight: u64,
    pub engine: EngineStatsSnapshot,
}

impl MetricsSnapshot {
    /// Counters for one operation kind.
    pub fn operation(&self, kind: OperationKind) -> OperationSnapshot {
        self.operations
            .iter()
            .find(|op| op.kind == kind)
            .copied()
            .unwrap_or(OperationSnapshot {
                kind,
                started: 0,
                succeeded: 0,
                failed: 0,
            })
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        for (counter, help) in [
            ("started", "Total operations started"),
            ("succeeded", "Total operations succeeded"),
            ("failed", "Total operations failed"),
        ] {
            let name = format!("walletledger_operations_{}_total", counter);
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            for op in &self.operations {
                let value = match counter {
                    "started" => op.started,
                    "succeeded" => op.succeeded,
                    _ => op.failed,
                };
                let _ = writeln!(out, "{}{{operation=\"{}\"}} {}", name, op.kind.as_str(), value);
            }
            out.push('\n');
        }

        let _ = writeln!(out, "# HELP walletledger_failures_total Failed operations by error class");
        let _ = writeln!(out, "# TYPE walletledger_failures_total counter");
        for (class, value) in [
            ("validation", self.validation_failures),
            ("domain", self.domain_failures),
            ("concurrency", self.concurrency_failures),
            ("infrastructure", self.infrastructure_failures),
        ] {
            let _ = writeln!(out, "walletledger_failures_total{{class=\"{}\"}} {}", class, value);
        }
        out.push('\n');

        for (name, kind, help, value) in [
            (
                "walletledger_rejected_unavailable_total",
                "counter",
                "Requests refused while the service was not running",
                self.rejected_unavailable,
            ),
            (
                "walletledger_in_flight",
                "gauge",
                "Operations currently executing",
                self.in_flight,
            ),
            (
                "walletledger_units_committed_total",
                "counter",
                "Atomic units committed",
                self.engine.committed,
            ),
            (
                "walletledger_conflicts_retried_total",
                "counter",
                "Conflicting units retried",
                self.engine.conflicts_retried,
            ),
            (
                "walletledger_conflicts_exhausted_total",
                "counter",
                "Operations that exhausted conflict retries",
                self.engine.conflicts_exhausted,
            ),
            (
                "walletledger_aborted_total",
                "counter",
                "Operations aborted by deadline or timeout",
                self.engine.aborted,
            ),
        ] {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            let _ = writeln!(out, "{} {}", name, value);
            out.push('\n');
        }

        out
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

/// Keeps the in-flight gauge raised until dropped.
pub(crate) struct InFlightGuard {
    metrics: SharedMetrics,
}

impl InFlightGuard {
    pub(crate) fn new(metrics: &SharedMetrics) -> Self {
        metrics.enter();
        Self {
            metrics: Arc::clone(metrics),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.exit();
    }
}
