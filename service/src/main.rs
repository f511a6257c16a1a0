//! CafeLedger daemon.
//!
//! Reads newline-delimited JSON requests on stdin and answers each with one
//! JSON response line on stdout.

use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{error, info};

use cafeledger_ledger::{LedgerEngine, LedgerStore, MemoryLedgerStore, PgLedgerStore};
use cafeledger_service::telemetry::init_tracing;
use cafeledger_service::{serve_lines, LedgerService, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServiceConfig::from_env();
    init_tracing(&config.log_level, config.log_format);

    info!("Starting CafeLedger daemon");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    match config.storage.database_url.clone() {
        Some(url) => {
            let store = PgLedgerStore::connect(&url, config.storage.max_connections).await?;
            if config.storage.run_migrations {
                store.migrate().await?;
            }
            serve(config, store).await
        }
        None => {
            info!("No DATABASE_URL set, using in-memory storage");
            serve(config, MemoryLedgerStore::new()).await
        }
    }
}

async fn serve<S: LedgerStore + 'static>(config: ServiceConfig, store: S) -> anyhow::Result<()> {
    let engine = LedgerEngine::new(Arc::new(store));
    let service = Arc::new(LedgerService::new(config, engine));
    service.start();

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                error!(error = %e, "Cannot listen for shutdown signal");
                std::future::pending::<()>().await
            }
        }
    };

    serve_lines(
        service.clone(),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown,
    )
    .await?;

    info!("CafeLedger daemon shutdown complete");
    Ok(())
}
