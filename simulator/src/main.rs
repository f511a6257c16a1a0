//! CafeLedger Simulator
//!
//! Drives generated deposit, withdraw and transfer traffic through the
//! ledger service and audits the result.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

mod controller;
mod metrics;
mod workload;

use cafeledger_ledger::{LedgerEngine, LedgerStore, MemoryLedgerStore, PgLedgerStore};
use cafeledger_service::telemetry::init_tracing;
use cafeledger_service::{LedgerService, ServiceConfig};
use controller::{SimulationController, SimulationReport};
use workload::{Workload, WorkloadSpec};

/// CafeLedger Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "CafeLedger load and consistency simulator")]
struct Args {
    /// Number of accounts to open
    #[arg(short, long, default_value = "10")]
    accounts: usize,

    /// Number of operations to run
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Operations in flight at once
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Balance each account starts with
    #[arg(long, default_value = "10000")]
    initial_deposit: i64,

    /// Largest amount per operation
    #[arg(long, default_value = "1000")]
    max_amount: i64,

    /// Traffic shape: uniform, contention or overdraw
    #[arg(short, long, default_value = "uniform")]
    workload: Workload,

    /// Share of operations sent with a non-positive amount
    #[arg(long, default_value = "0.0")]
    invalid_rate: f64,

    /// Share of operations whose commit is forced to fail (in-memory only)
    #[arg(long, default_value = "0.0")]
    fault_rate: f64,

    /// Write the report as JSON to this file
    #[arg(long)]
    report_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();
    init_tracing(&config.log_level, config.log_format);

    let args = Args::parse();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    info!("Starting CafeLedger Simulator");

    let report = match config.storage.database_url.clone() {
        Some(url) => {
            if args.fault_rate > 0.0 {
                return Err(anyhow::anyhow!("Fault injection needs in-memory storage"));
            }
            let store = PgLedgerStore::connect(&url, config.storage.max_connections).await?;
            if config.storage.run_migrations {
                store.migrate().await?;
            }
            simulate(&args, config, Arc::new(store), None).await?
        }
        None => {
            let store = Arc::new(MemoryLedgerStore::new());
            let hook = store.clone();
            let injector: controller::FaultInjector = Arc::new(move || hook.fail_next_commit());
            simulate(&args, config, store, Some(injector)).await?
        }
    };

    info!("Simulation complete");
    info!("Total operations: {}", report.metrics.total_operations);
    info!("Completed: {}", report.metrics.completed);
    info!("Rejected: {}", report.metrics.rejected_total());
    info!("Failed: {}", report.metrics.failed);
    info!("Throughput: {:.1} ops/s", report.throughput);
    info!(
        "Latency: avg {}us, p50 {}us, p99 {}us",
        report.average_latency_us, report.p50_latency_us, report.p99_latency_us
    );

    if let Some(path) = &args.report_json {
        std::fs::write(path, serde_json::to_vec_pretty(&report)?)?;
        info!("Report written to {}", path.display());
    }

    if !report.audit.is_consistent() {
        error!(audit = ?report.audit, "Ledger audit failed");
        return Err(anyhow::anyhow!("Ledger audit found inconsistencies"));
    }

    info!(
        accounts = report.audit.accounts_checked,
        transactions = report.audit.transactions_checked,
        "Ledger audit passed"
    );
    Ok(())
}

async fn simulate<S: LedgerStore + 'static>(
    args: &Args,
    config: ServiceConfig,
    store: Arc<S>,
    injector: Option<controller::FaultInjector>,
) -> anyhow::Result<SimulationReport> {
    let service = Arc::new(LedgerService::new(config, LedgerEngine::new(store)));
    service.start();

    let mut controller = SimulationController::new(service.clone(), args.seed);
    if let Some(injector) = injector.filter(|_| args.fault_rate > 0.0) {
        controller = controller.with_faults(injector, args.fault_rate);
    }
    info!("Seed: {}", controller.seed());

    controller
        .initialize(args.accounts, args.initial_deposit)
        .await?;

    let spec = WorkloadSpec {
        workload: args.workload,
        accounts: controller.accounts().to_vec(),
        operations: args.operations,
        max_amount: args.max_amount,
        invalid_rate: args.invalid_rate,
    };
    controller.run(&spec, args.concurrency).await?;

    service.stop().await;
    controller.finish().await
}
