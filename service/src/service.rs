//! Wallet service: lifecycle, deadlines and metrics around the engine.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use walletledger_common::{AccountId, Amount, Deadline, LedgerError, Result};
use walletledger_ledger::{Account, LedgerBackend, LedgerEngine, TransactionRecord};

use crate::config::ServiceConfig;
use crate::metrics::{InFlightGuard, Metrics, MetricsSnapshot, OperationKind, SharedMetrics};
use crate::state::ServiceState;

/// Entry point for callers: owns the engine and tracks its lifecycle.
pub struct WalletService<B: LedgerBackend> {
    config: ServiceConfig,
    node_id: String,
    state: Arc<RwLock<ServiceState>>,
    engine: LedgerEngine<B>,
    metrics: SharedMetrics,
}

impl<B: LedgerBackend> WalletService<B> {
    /// Create a service over `backend`. Call [`start`](Self::start) before use.
    pub fn new(config: ServiceConfig, backend: Arc<B>) -> Self {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| format!("wallet-{}", uuid::Uuid::new_v4()));
        let engine = LedgerEngine::new(backend, config.engine.clone());

        Self {
            config,
            node_id,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            engine,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Start accepting requests.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn start(&self) -> Result<()> {
        self.transition(ServiceState::Running)?;
        info!(
            backend = %self.config.backend,
            unit_timeout_ms = self.config.engine.unit_timeout.as_millis() as u64,
            max_attempts = self.config.engine.retry.max_attempts,
            "Wallet service started"
        );
        Ok(())
    }

    /// Stop accepting requests, drain in-flight operations, close the backend.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn stop(&self) -> Result<()> {
        self.transition(ServiceState::ShuttingDown)?;
        info!("Stopping wallet service");

        self.drain_in_flight().await;
        self.engine.backend().close().await;

        self.transition(ServiceState::Stopped)?;
        info!("Wallet service stopped");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Check if the service is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Node ID for this instance.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Underlying engine.
    pub fn engine(&self) -> &LedgerEngine<B> {
        &self.engine
    }

    /// Service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Current metrics, engine counters included.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.engine.stats())
    }

    /// Register a new account.
    pub async fn register(&self, username: &str, name: &str) -> Result<Account> {
        self.observe(OperationKind::Register, self.engine.register(username, name))
            .await
    }

    /// Get account details.
    pub async fn account(&self, account_id: AccountId) -> Result<Account> {
        self.observe(OperationKind::Account, self.engine.account(account_id))
            .await
    }

    /// Top up with the default operation deadline.
    pub async fn top_up(&self, account_id: AccountId, amount: Amount) -> Result<TransactionRecord> {
        self.top_up_with_deadline(account_id, amount, self.engine.default_deadline())
            .await
    }

    /// Top up bounded by a caller deadline.
    pub async fn top_up_with_deadline(
        &self,
        account_id: AccountId,
        amount: Amount,
        deadline: Deadline,
    ) -> Result<TransactionRecord> {
        self.observe(
            OperationKind::TopUp,
            self.engine.top_up(account_id, amount, deadline),
        )
        .await
    }

    /// Withdraw with the default operation deadline.
    pub async fn withdraw(&self, account_id: AccountId, amount: Amount) -> Result<TransactionRecord> {
        self.withdraw_with_deadline(account_id, amount, self.engine.default_deadline())
            .await
    }

    /// Withdraw bounded by a caller deadline.
    pub async fn withdraw_with_deadline(
        &self,
        account_id: AccountId,
        amount: Amount,
        deadline: Deadline,
    ) -> Result<TransactionRecord> {
        self.observe(
            OperationKind::Withdraw,
            self.engine.withdraw(account_id, amount, deadline),
        )
        .await
    }

    /// Transfer with the default operation deadline.
    pub async fn transfer(
        &self,
        account_id: AccountId,
        target: &str,
        amount: Amount,
    ) -> Result<TransactionRecord> {
        self.transfer_with_deadline(account_id, target, amount, self.engine.default_deadline())
            .await
    }

    /// Transfer bounded by a caller deadline.
    pub async fn transfer_with_deadline(
        &self,
        account_id: AccountId,
        target: &str,
        amount: Amount,
        deadline: Deadline,
    ) -> Result<TransactionRecord> {
        self.observe(
            OperationKind::Transfer,
            self.engine.transfer(account_id, target, amount, deadline),
        )
        .await
    }

    /// All records naming the account, oldest first.
    pub async fn list_transactions(&self, account_id: AccountId) -> Result<Vec<TransactionRecord>> {
        self.observe(
            OperationKind::ListTransactions,
            self.engine.list_transactions(account_id),
        )
        .await
    }

    // --- Private methods ---

    async fn observe<T, F>(&self, kind: OperationKind, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        // Raised before the state check so a concurrent stop() waits for us.
        let _guard = InFlightGuard::new(&self.metrics);
        if let Err(err) = self.ensure_running() {
            self.metrics.request_rejected();
            return Err(err);
        }

        self.metrics.operation_started(kind);
        let result = operation.await;
        match &result {
            Ok(_) => self.metrics.operation_succeeded(kind),
            Err(err) => self.metrics.operation_failed(kind, err),
        }
        result
    }

    fn ensure_running(&self) -> Result<()> {
        let state = self.state();
        if state.accepts_requests() {
            Ok(())
        } else {
            Err(LedgerError::Unavailable(format!(
                "service is {:?}",
                state
            )))
        }
    }

    fn transition(&self, next: ServiceState) -> Result<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(LedgerError::Unavailable(format!(
                "cannot move service from {:?} to {:?}",
                *state, next
            )));
        }
        *state = next;
        Ok(())
    }

    async fn drain_in_flight(&self) {
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            loop {
                let pending = self.metrics.in_flight();
                if pending == 0 {
                    break;
                }
                info!(pending, "Waiting for in-flight operations");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pending = self.metrics.in_flight(),
                "Drain timeout elapsed with operations still running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletledger_ledger::MemoryStore;

    fn service() -> WalletService<MemoryStore> {
        WalletService::new(ServiceConfig::default(), Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_service_start_stop() {
        let service = service();
        assert_eq!(service.state(), ServiceState::Starting);

        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert!(service.start().await.is_err());

        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(service.engine().backend().begin().await.is_err());
    }

    #[tokio::test]
    async fn test_requests_refused_unless_running() {
        let service = service();

        let err = service.register("alice", "Alice").await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));

        service.start().await.unwrap();
        let alice = service.register("alice", "Alice").await.unwrap();
        service.stop().await.unwrap();

        let err = service.top_up(alice.id, Amount::new(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
        assert_eq!(service.metrics().rejected_unavailable, 2);
    }

    #[tokio::test]
    async fn test_account_lookup_is_observed() {
        let service = service();

        let err = service.account(AccountId::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
        assert_eq!(service.metrics().rejected_unavailable, 1);

        service.start().await.unwrap();
        let alice = service.register("alice", "Alice").await.unwrap();
        service.account(alice.id).await.unwrap();
        let err = service.account(AccountId::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let metrics = service.metrics();
        let lookups = metrics.operation(OperationKind::Account);
        assert_eq!(lookups.started, 2);
        assert_eq!(lookups.succeeded, 1);
        assert_eq!(lookups.failed, 1);
        assert_eq!(metrics.domain_failures, 1);
        assert_eq!(metrics.in_flight, 0);
    }

    #[tokio::test]
    async fn test_operations_are_counted() {
        let service = service();
        service.start().await.unwrap();

        let alice = service.register("alice", "Alice").await.unwrap();
        service.register("bob", "Bob").await.unwrap();
        service.top_up(alice.id, Amount::new(100)).await.unwrap();
        service
            .transfer(alice.id, "bob", Amount::new(30))
            .await
            .unwrap();
        let err = service.withdraw(alice.id, Amount::new(500)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let records = service.list_transactions(alice.id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(service.account(alice.id).await.unwrap().balance, Amount::new(70));

        let metrics = service.metrics();
        assert_eq!(metrics.operation(OperationKind::Register).succeeded, 2);
        assert_eq!(metrics.operation(OperationKind::Transfer).succeeded, 1);
        assert_eq!(metrics.operation(OperationKind::Withdraw).failed, 1);
        assert_eq!(metrics.domain_failures, 1);
        assert_eq!(metrics.engine.committed, 2);
        assert_eq!(metrics.in_flight, 0);
    }

    #[tokio::test]
    async fn test_caller_deadline_is_honoured() {
        let service = service();
        service.start().await.unwrap();
        let alice = service.register("alice", "Alice").await.unwrap();

        let err = service
            .top_up_with_deadline(alice.id, Amount::new(5), Deadline::after(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Aborted(_)));
        assert_eq!(service.metrics().infrastructure_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_in_flight() {
        let service = Arc::new(service());
        service.start().await.unwrap();
        let alice = service.register("alice", "Alice").await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.top_up(alice.id, Amount::new(1)).await })
            })
            .collect();
        tokio::task::yield_now().await;
        service.stop().await.unwrap();

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                committed += 1;
            }
        }
        assert_eq!(service.metrics().in_flight, 0);
        assert_eq!(service.metrics().engine.committed, committed);
    }
}
