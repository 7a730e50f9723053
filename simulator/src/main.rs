//! WalletLedger Simulator
//!
//! Drives concurrent wallet operations against a ledger backend and checks
//! that the books still balance afterwards.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use walletledger_ledger::{LedgerBackend, MemoryStore, PgStore};
use walletledger_service::{telemetry, BackendKind, MetricsSnapshot, ServiceConfig, WalletService};

mod controller;
mod metrics;
mod scenario;

use controller::{SimulationController, VerificationReport};
use metrics::SimulationMetrics;
use scenario::Scenario;

/// WalletLedger Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "WalletLedger load generator and scenario runner")]
struct Args {
    /// Number of simulated accounts to register
    #[arg(short, long, default_value = "8")]
    accounts: usize,

    /// Concurrent workers for random load
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Random operations to run when no scenario is given
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Funding per account at startup
    #[arg(long, default_value = "10000")]
    initial_balance: u64,

    /// Scenario name or path to a JSON scenario file
    #[arg(short, long)]
    scenario: Option<String>,

    /// Storage backend (overrides WALLET_BACKEND)
    #[arg(short, long)]
    backend: Option<BackendKind>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    report_json: bool,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    scenario: Option<String>,
    backend: BackendKind,
    elapsed_ms: u64,
    simulation: SimulationMetrics,
    service: MetricsSnapshot,
    verification: VerificationReport,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::from_env();
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    config.validate()?;
    telemetry::init(&config.log_level, config.log_json)?;

    info!("Starting WalletLedger Simulator");
    info!(
        backend = %config.backend,
        accounts = args.accounts,
        workers = args.workers,
        "Simulator configured"
    );

    match config.backend {
        BackendKind::Memory => run(args, config, Arc::new(MemoryStore::new())).await,
        BackendKind::Postgres => {
            let store = PgStore::connect(
                &config.database_url,
                config.max_connections,
                config.acquire_timeout,
            )
            .await?
            .with_statement_timeout(config.engine.unit_timeout);
            store.ensure_schema().await?;
            run(args, config, Arc::new(store)).await
        }
    }
}

async fn run<B: LedgerBackend>(
    args: Args,
    config: ServiceConfig,
    backend: Arc<B>,
) -> anyhow::Result<()> {
    let backend_kind = config.backend;
    let service = Arc::new(WalletService::new(config, backend));
    service.start().await?;

    let scenario = args.scenario.as_deref().map(Scenario::load).transpose()?;
    let (accounts, initial_balance) = match &scenario {
        Some(scenario) => (
            args.accounts.max(scenario.accounts),
            scenario.initial_balance.unwrap_or(args.initial_balance),
        ),
        None => (args.accounts, args.initial_balance),
    };

    let mut controller = SimulationController::new(Arc::clone(&service), args.workers, args.seed);
    controller.initialize(accounts, initial_balance).await?;
    info!(
        accounts = controller.accounts().len(),
        "Simulator initialized"
    );

    let started = Instant::now();
    let outcome = match &scenario {
        Some(scenario) => controller.run_scenario(scenario).await,
        None => controller.run_random(args.operations).await,
    };
    let elapsed = started.elapsed();

    let verification = controller.verify().await?;
    let simulation = controller.metrics().await;
    let service_metrics = service.metrics();
    service.stop().await?;

    info!("Simulation complete");
    info!("Total operations: {}", simulation.total_operations);
    info!("Successful: {}", simulation.successful_operations);
    info!("Failed: {}", simulation.failed_operations);
    for (code, count) in &simulation.failures_by_code {
        info!("  {}: {}", code, count);
    }
    info!("Conflicts retried: {}", service_metrics.engine.conflicts_retried);
    info!(
        "Latency: avg {}us, p50 {}us, p99 {}us",
        simulation.average_latency_us(),
        simulation.p50_latency_us(),
        simulation.p99_latency_us()
    );
    info!(
        "Throughput: {:.1} ops/s, success rate {:.1}%",
        simulation.throughput(elapsed.as_secs_f64()),
        simulation.success_rate() * 100.0
    );

    if args.report_json {
        let report = SimulationReport {
            scenario: scenario.map(|s| s.name),
            backend: backend_kind,
            elapsed_ms: elapsed.as_millis() as u64,
            simulation,
            service: service_metrics,
            verification: verification.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    for mismatch in &verification.mismatches {
        error!("Verification failed: {}", mismatch);
    }
    outcome?;
    if !verification.is_ok() {
        anyhow::bail!("{} ledger inconsistencies found", verification.mismatches.len());
    }

    info!(
        total_balance = verification.total_balance as u64,
        records = verification.records,
        "Ledger verified"
    );
    Ok(())
}
