mod error;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use autotrader::broker::{BrokerConnector, PaperBroker, PaperConnector, RestConnector};
use autotrader::{EngineSettings, TradingControl, TradingServices};
use migration::{Migrator, MigratorTrait};
use shared::{get_db_connection, BrokerBackend, Config, TradingMode};
use tracing::info;
use tracing_subscriber::EnvFilter;

const PAPER_STARTING_CASH: i64 = 100_000_000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting autotrader control API...");

    let config = Config::from_env().context("Failed to load configuration")?;
    let db = get_db_connection(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");
    if config.run_migrations {
        Migrator::up(&db, None).await.context("Failed to run migrations")?;
    }

    let connector: Arc<dyn BrokerConnector> = match config.broker_backend {
        BrokerBackend::Paper => Arc::new(PaperConnector::new().with_broker(
            TradingMode::Test,
            Arc::new(PaperBroker::new(TradingMode::Test, PAPER_STARTING_CASH)),
        )),
        BrokerBackend::Rest => Arc::new(RestConnector::new(&config.broker_live_url, &config.broker_test_url)),
    };
    let services = TradingServices::new(db, connector, EngineSettings::from_config(&config));
    let app = routes::router(TradingControl::new(services));

    let listener = tokio::net::TcpListener::bind(&config.api_bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api_bind_addr))?;
    info!("API server listening on http://{}", config.api_bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
