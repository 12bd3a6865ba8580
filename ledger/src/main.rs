use anyhow::{Context, Result};
use onchess_ledger::{start_api_server, LedgerConfig, SessionLedger};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = LedgerConfig::from_env().context("failed to load ledger configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    info!(
        addr = %config.addr,
        admin = %config.admin,
        fee_rate = %config.fee_rate,
        self_join = ?config.self_join,
        "ledger starting"
    );

    let ledger = Arc::new(SessionLedger::new(config.settings()));

    tokio::select! {
        result = start_api_server(ledger, config.addr.clone()) => {
            result.context("ledger API server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("ledger stopped");
    Ok(())
}
