//! Shared fixtures: in-memory SQLite, migrated schema, one paper account.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use autotrader::broker::{PaperBroker, PaperConnector};
use autotrader::control::{NewSignal, NewStrategy};
use autotrader::services::{AllocationRequest, Condition, IngestOutcome, NewCredential};
use autotrader::{EngineSettings, TradingControl, TradingServices};
use migration::{Migrator, MigratorTrait};
use sea_orm::{EntityTrait, PaginatorTrait};
use shared::entity::{capital_allocations, orders, positions, signal_consumptions, strategies, trading_signals};
use shared::{get_db_connection, SignalType, TradingMode};

pub const USER: i64 = 1;
pub const ACCOUNT_CASH: i64 = 10_000_000;

pub struct Harness {
    pub control: TradingControl,
    pub services: TradingServices,
    pub broker: Arc<PaperBroker>,
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        scheduler_interval: Duration::from_millis(50),
        broker_timeout: Duration::from_millis(100),
        strategy_tick_timeout: Duration::from_secs(5),
    }
}

pub async fn setup() -> Harness {
    setup_with(settings()).await
}

pub async fn setup_with(settings: EngineSettings) -> Harness {
    let db = get_db_connection("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let broker = Arc::new(PaperBroker::new(TradingMode::Test, ACCOUNT_CASH));
    let connector = PaperConnector::new().with_broker(TradingMode::Test, broker.clone());
    let services = TradingServices::new(db, Arc::new(connector), settings);
    let control = TradingControl::new(services.clone());

    control
        .register_credential(NewCredential {
            user_id: USER,
            provider: "paper".to_string(),
            mode: TradingMode::Test,
            app_key: "paper-key".to_string(),
            app_secret: "paper-secret".to_string(),
            account_no: "00000000-01".to_string(),
            active: true,
        })
        .await
        .unwrap();

    Harness {
        control,
        services,
        broker,
    }
}

pub struct StrategySetup<'a> {
    pub name: &'a str,
    pub user_id: i64,
    pub capital: i64,
    pub position_size_percent: f64,
    pub stocks: &'a [&'a str],
    pub entry: Option<Condition>,
    pub exit: Option<Condition>,
}

impl<'a> StrategySetup<'a> {
    pub fn new(name: &'a str, stocks: &'a [&'a str]) -> Self {
        Self {
            name,
            user_id: USER,
            capital: 1_000_000,
            position_size_percent: 30.0,
            stocks,
            entry: None,
            exit: None,
        }
    }
}

/// Creates a funded strategy, a universe over `stocks`, and starts auto-trading.
pub async fn running_strategy(h: &Harness, setup: StrategySetup<'_>) -> (strategies::Model, String) {
    let strategy = h
        .control
        .create_strategy(NewStrategy {
            user_id: setup.user_id,
            name: setup.name.to_string(),
            trading_mode: TradingMode::Test,
            entry_conditions: setup.entry,
            exit_conditions: setup.exit,
            position_size_percent: setup.position_size_percent,
        })
        .await
        .unwrap();

    if setup.capital > 0 {
        h.control
            .allocate_capital(&strategy.id, AllocationRequest::Amount(setup.capital))
            .await
            .unwrap();
    }

    let codes: Vec<String> = setup.stocks.iter().map(|s| s.to_string()).collect();
    let universe = h
        .control
        .create_universe(&format!("{} universe", setup.name), &codes)
        .await
        .unwrap();
    h.control
        .start_auto_trading(&strategy.id, &[universe.id.clone()])
        .await
        .unwrap();

    (strategy, universe.id)
}

pub async fn submit(h: &Harness, strategy_id: &str, stock: &str, signal_type: SignalType) -> IngestOutcome {
    h.control
        .submit_signal(NewSignal {
            id: None,
            strategy_id: strategy_id.to_string(),
            stock_code: stock.to_string(),
            signal_type,
            strength: 80,
            generated_at: None,
        })
        .await
        .unwrap()
        .outcome
}

pub async fn accepted_order(h: &Harness, strategy_id: &str, stock: &str, signal_type: SignalType) -> orders::Model {
    match submit(h, strategy_id, stock, signal_type).await {
        IngestOutcome::Accepted { order_id, .. } => h.services.orders.get(&order_id).await.unwrap(),
        other => panic!("expected an accepted signal, got {:?}", other),
    }
}

/// A signal row as a producer would write it, for `SignalIngester::record`.
pub fn stored_signal(id: &str, strategy_id: &str, stock: &str, signal_type: SignalType) -> trading_signals::Model {
    trading_signals::Model {
        id: id.to_string(),
        strategy_id: strategy_id.to_string(),
        stock_code: stock.to_string(),
        signal_type,
        strength: 80,
        generated_at: chrono::Utc::now(),
    }
}

pub async fn consumption(h: &Harness, signal_id: &str) -> Option<signal_consumptions::Model> {
    signal_consumptions::Entity::find_by_id(signal_id.to_string())
        .one(h.services.db.as_ref())
        .await
        .unwrap()
}

pub async fn capital(h: &Harness, strategy_id: &str) -> capital_allocations::Model {
    h.services.ledger.snapshot(strategy_id).await.unwrap()
}

pub async fn position(h: &Harness, strategy_id: &str, stock: &str) -> Option<positions::Model> {
    positions::Entity::find_by_id((strategy_id.to_string(), stock.to_string()))
        .one(h.services.db.as_ref())
        .await
        .unwrap()
}

pub async fn order_count(h: &Harness) -> u64 {
    orders::Entity::find().count(h.services.db.as_ref()).await.unwrap()
}

pub fn assert_balanced(allocation: &capital_allocations::Model) {
    assert_eq!(
        allocation.total_allocated,
        allocation.in_use + allocation.available,
        "ledger out of balance: {:?}",
        allocation
    );
    assert!(allocation.in_use >= 0, "negative in_use: {:?}", allocation);
}
