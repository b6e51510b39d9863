use dotenv::dotenv;

/// Which broker adapter the daemon wires into the credential vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    /// In-process paper broker, no network calls.
    Paper,
    /// JSON gateway reached over HTTP.
    Rest,
}

pub struct Config {
    pub database_url: String,
    pub api_bind_addr: String,
    pub scheduler_interval_secs: u64,
    pub broker_timeout_ms: u64,
    pub strategy_tick_timeout_secs: u64,
    pub broker_backend: BrokerBackend,
    pub broker_live_url: String,
    pub broker_test_url: String,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenv().ok();

        let broker_backend = match std::env::var("BROKER_BACKEND")
            .unwrap_or_else(|_| "paper".to_string())
            .to_lowercase()
            .as_str()
        {
            "paper" => BrokerBackend::Paper,
            "rest" => BrokerBackend::Rest,
            other => anyhow::bail!("Unsupported BROKER_BACKEND: {}", other),
        };

        Ok(Config {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://autotrader.db?mode=rwc".to_string()),
            api_bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:9999".to_string()),
            scheduler_interval_secs: parse_or("SCHEDULER_INTERVAL_SECS", 10)?,
            broker_timeout_ms: parse_or("BROKER_TIMEOUT_MS", 5_000)?,
            strategy_tick_timeout_secs: parse_or("STRATEGY_TICK_TIMEOUT_SECS", 30)?,
            broker_backend,
            broker_live_url: std::env::var("BROKER_LIVE_URL")
                .unwrap_or_else(|_| "http://localhost:8700/live".to_string()),
            broker_test_url: std::env::var("BROKER_TEST_URL")
                .unwrap_or_else(|_| "http://localhost:8700/paper".to_string()),
            run_migrations: std::env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }
}

fn parse_or(key: &str, default: u64) -> Result<u64, anyhow::Error> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be a positive integer: {}", key, e)),
        Err(_) => Ok(default),
    }
}
