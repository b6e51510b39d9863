use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use shared::Config;

use crate::broker::BrokerConnector;
use crate::services::{
    CapitalLedger, CredentialVault, EmergencyController, EventBus, OrderLifecycleManager,
    PercentOfAllocation, PositionSizer, SignalGenerator, SignalIngester, StrategyScheduler,
    UniverseBinder,
};

/// Timing knobs of the execution core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub scheduler_interval: Duration,
    pub broker_timeout: Duration,
    pub strategy_tick_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scheduler_interval: Duration::from_secs(config.scheduler_interval_secs.max(1)),
            broker_timeout: Duration::from_millis(config.broker_timeout_ms.max(1)),
            strategy_tick_timeout: Duration::from_secs(config.strategy_tick_timeout_secs.max(1)),
        }
    }

    /// Age after which a `processing` signal marker belongs to an ingest that
    /// will never finish: a whole strategy pass plus the broker calls one
    /// ingest can make.
    pub fn claim_expiry(&self) -> Duration {
        self.strategy_tick_timeout + self.broker_timeout * 4
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scheduler_interval: Duration::from_secs(10),
            broker_timeout: Duration::from_millis(5_000),
            strategy_tick_timeout: Duration::from_secs(30),
        }
    }
}

/// Every service of the core, wired once and shared.
#[derive(Clone)]
pub struct TradingServices {
    pub db: Arc<DatabaseConnection>,
    pub events: EventBus,
    pub vault: Arc<CredentialVault>,
    pub ledger: Arc<CapitalLedger>,
    pub binder: Arc<UniverseBinder>,
    pub orders: Arc<OrderLifecycleManager>,
    pub ingester: Arc<SignalIngester>,
    pub generator: Arc<SignalGenerator>,
    pub scheduler: Arc<StrategyScheduler>,
    pub emergency: Arc<EmergencyController>,
}

impl TradingServices {
    pub fn new(
        db: DatabaseConnection,
        connector: Arc<dyn BrokerConnector>,
        settings: EngineSettings,
    ) -> Self {
        Self::with_sizer(db, connector, settings, Arc::new(PercentOfAllocation))
    }

    pub fn with_sizer(
        db: DatabaseConnection,
        connector: Arc<dyn BrokerConnector>,
        settings: EngineSettings,
        sizer: Arc<dyn PositionSizer>,
    ) -> Self {
        let db = Arc::new(db);
        let events = EventBus::default();

        let vault = Arc::new(CredentialVault::new(db.clone(), connector, settings.broker_timeout));
        let ledger = Arc::new(CapitalLedger::new(db.clone(), events.clone()));
        let binder = Arc::new(UniverseBinder::new(db.clone()));
        let orders = Arc::new(OrderLifecycleManager::new(
            db.clone(),
            ledger.clone(),
            vault.clone(),
            events.clone(),
            settings.broker_timeout,
        ));
        let ingester = Arc::new(SignalIngester::new(
            db.clone(),
            binder.clone(),
            ledger.clone(),
            vault.clone(),
            orders.clone(),
            sizer,
            events.clone(),
            settings.claim_expiry(),
        ));
        let generator = Arc::new(SignalGenerator::new(db.clone(), vault.clone()));
        let scheduler = Arc::new(StrategyScheduler::new(
            db.clone(),
            binder.clone(),
            generator.clone(),
            ingester.clone(),
            orders.clone(),
            settings.scheduler_interval,
            settings.strategy_tick_timeout,
        ));
        let emergency = Arc::new(EmergencyController::new(db.clone(), orders.clone(), events.clone()));
        tracing::info!("Trading services initialized");

        Self {
            db,
            events,
            vault,
            ledger,
            binder,
            orders,
            ingester,
            generator,
            scheduler,
            emergency,
        }
    }
}
