use std::sync::Arc;

use anyhow::{Context, Result};
use autotrader::broker::{BrokerConnector, PaperBroker, PaperConnector, RestConnector};
use autotrader::{EngineSettings, TradingServices};
use migration::{Migrator, MigratorTrait};
use shared::{get_db_connection, BrokerBackend, Config, TradingMode};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const PAPER_STARTING_CASH: i64 = 100_000_000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting autotrader execution core...");

    let config = Config::from_env().context("Failed to load configuration")?;
    let db = get_db_connection(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    if config.run_migrations {
        Migrator::up(&db, None).await.context("Failed to run migrations")?;
        tracing::info!("Migrations applied");
    }

    let connector: Arc<dyn BrokerConnector> = match config.broker_backend {
        BrokerBackend::Paper => {
            tracing::info!("Using in-process paper broker (test mode only)");
            Arc::new(PaperConnector::new().with_broker(
                TradingMode::Test,
                Arc::new(PaperBroker::new(TradingMode::Test, PAPER_STARTING_CASH)),
            ))
        }
        BrokerBackend::Rest => {
            tracing::info!(
                "Using broker gateway (live: {}, test: {})",
                config.broker_live_url,
                config.broker_test_url
            );
            Arc::new(RestConnector::new(&config.broker_live_url, &config.broker_test_url))
        }
    };

    let services = TradingServices::new(db, connector, EngineSettings::from_config(&config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(services.scheduler.clone().run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("Shutdown requested");
    shutdown_tx.send(true).ok();
    scheduler.await.context("Scheduler task failed")?;

    tracing::info!("Autotrader stopped");
    Ok(())
}
