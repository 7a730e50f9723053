//! WalletLedger Service
//!
//! Wraps the ledger engine with configuration, a start/stop lifecycle,
//! operation metrics and logging setup.

pub mod config;
pub mod metrics;
pub mod service;
pub mod state;
pub mod telemetry;

pub use config::{BackendKind, ServiceConfig};
pub use metrics::{Metrics, MetricsSnapshot, OperationKind, OperationSnapshot, SharedMetrics};
pub use service::WalletService;
pub use state::ServiceState;
