//! The operator-facing control surface.
//!
//! Every method returns a structured report; nothing here answers with a bare bool.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use shared::entity::{capital_allocations, credential_sets, investment_universes, strategies, trading_signals};
use shared::{SignalType, TradingMode};
use tracing::info;
use uuid::Uuid;

use crate::broker::FillReport;
use crate::error::{TradingError, TradingResult};
use crate::services::{
    AllocationRequest, BulkReport, Condition, Confirmation, FillOutcome, HaltReport, IngestOutcome,
    NewCredential, TickReport, TradingEvent, UniverseBinder,
};
use crate::state::TradingServices;

#[derive(Debug, Clone, Deserialize)]
pub struct NewStrategy {
    pub user_id: i64,
    pub name: String,
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub entry_conditions: Option<Condition>,
    #[serde(default)]
    pub exit_conditions: Option<Condition>,
    pub position_size_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSignal {
    /// Producer-side id; re-submitting the same id never trades twice.
    #[serde(default)]
    pub id: Option<String>,
    pub strategy_id: String,
    pub stock_code: String,
    pub signal_type: SignalType,
    #[serde(default = "default_strength")]
    pub strength: i32,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

fn default_strength() -> i32 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoTradingReport {
    pub strategy_id: String,
    pub active: bool,
    pub auto_execute_enabled: bool,
    pub active_universes: Vec<String>,
    pub inactive_universes: Vec<String>,
    pub active_stocks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapitalStatus {
    pub strategy_id: String,
    pub total_allocated: i64,
    pub in_use: i64,
    pub available: i64,
    pub allocated_percent: f64,
    /// Set while `available` is negative after slippage.
    pub anomaly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalReceipt {
    pub signal_id: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

#[derive(Clone)]
pub struct TradingControl {
    services: TradingServices,
}

impl TradingControl {
    pub fn new(services: TradingServices) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &TradingServices {
        &self.services
    }

    pub async fn create_strategy(&self, new: NewStrategy) -> TradingResult<strategies::Model> {
        if !(0.0..=100.0).contains(&new.position_size_percent) {
            return Err(TradingError::InvalidAllocation(format!(
                "position size percent must be within 0-100, got {}",
                new.position_size_percent
            )));
        }
        let encode = |rule: Option<Condition>| -> TradingResult<Option<String>> {
            rule.map(|r| serde_json::to_string(&r))
                .transpose()
                .map_err(|e| TradingError::Condition(e.to_string()))
        };
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let txn = self.services.db.begin().await?;
        let strategy = strategies::ActiveModel {
            id: Set(id.clone()),
            user_id: Set(new.user_id),
            name: Set(new.name),
            trading_mode: Set(new.trading_mode),
            entry_conditions: Set(encode(new.entry_conditions)?),
            exit_conditions: Set(encode(new.exit_conditions)?),
            position_size_percent: Set(new.position_size_percent),
            auto_execute_enabled: Set(false),
            active: Set(false),
            allocated_capital: Set(0),
            allocated_percent: Set(0.0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        capital_allocations::ActiveModel {
            strategy_id: Set(id),
            total_allocated: Set(0),
            in_use: Set(0),
            available: Set(0),
            version: Set(0),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!("Created strategy {} ({})", strategy.name, strategy.id);
        Ok(strategy)
    }

    pub async fn create_universe(
        &self,
        name: &str,
        stock_codes: &[String],
    ) -> TradingResult<investment_universes::Model> {
        self.services.binder.create_universe(name, stock_codes).await
    }

    pub async fn set_universe_active(
        &self,
        universe_id: &str,
        active: bool,
    ) -> TradingResult<investment_universes::Model> {
        self.services.binder.set_universe_active(universe_id, active).await
    }

    pub async fn register_credential(&self, credential: NewCredential) -> TradingResult<credential_sets::Model> {
        self.services.vault.register(credential).await
    }

    /// Activates a strategy, binds it to `universe_ids` and re-enables its other bindings.
    pub async fn start_auto_trading(
        &self,
        strategy_id: &str,
        universe_ids: &[String],
    ) -> TradingResult<AutoTradingReport> {
        let txn = self.services.db.begin().await?;
        let strategy = strategies::Entity::find_by_id(strategy_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| TradingError::not_found("strategy", strategy_id))?;
        for universe_id in universe_ids {
            if investment_universes::Entity::find_by_id(universe_id.clone())
                .one(&txn)
                .await?
                .is_none()
            {
                return Err(TradingError::not_found("universe", universe_id));
            }
        }

        let mut model: strategies::ActiveModel = strategy.into();
        model.active = Set(true);
        model.auto_execute_enabled = Set(true);
        model.updated_at = Set(Utc::now());
        let strategy = model.update(&txn).await?;

        for universe_id in universe_ids {
            UniverseBinder::bind_in(&txn, strategy_id, universe_id).await?;
        }
        let bindings = UniverseBinder::refresh_bindings_in(&txn, strategy_id).await?;
        let active_stocks = UniverseBinder::resolve_active_stocks_in(&txn, strategy_id).await?;
        txn.commit().await?;

        let (active, inactive): (Vec<_>, Vec<_>) = bindings.into_iter().partition(|b| b.active);
        let report = AutoTradingReport {
            strategy_id: strategy.id.clone(),
            active: strategy.active,
            auto_execute_enabled: strategy.auto_execute_enabled,
            active_universes: active.into_iter().map(|b| b.universe_id).collect(),
            inactive_universes: inactive.into_iter().map(|b| b.universe_id).collect(),
            active_stocks: active_stocks.len(),
        };
        info!(
            "Auto-trading started for strategy {} over {} universes ({} stocks)",
            strategy_id,
            report.active_universes.len(),
            report.active_stocks
        );
        self.services.events.publish(TradingEvent::AutoTradingStarted {
            strategy_id: strategy_id.to_string(),
            universe_ids: report.active_universes.clone(),
        });
        Ok(report)
    }

    /// Stops one strategy. Its open orders keep working.
    pub async fn stop_auto_trading(&self, strategy_id: &str) -> TradingResult<AutoTradingReport> {
        let txn = self.services.db.begin().await?;
        let strategy = strategies::Entity::find_by_id(strategy_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| TradingError::not_found("strategy", strategy_id))?;

        let mut model: strategies::ActiveModel = strategy.into();
        model.active = Set(false);
        model.auto_execute_enabled = Set(false);
        model.updated_at = Set(Utc::now());
        let strategy = model.update(&txn).await?;
        UniverseBinder::deactivate_bindings_in(&txn, &[strategy_id.to_string()]).await?;
        let bindings = UniverseBinder::refresh_bindings_in(&txn, strategy_id).await?;
        txn.commit().await?;

        info!("Auto-trading stopped for strategy {}", strategy_id);
        self.services.events.publish(TradingEvent::AutoTradingStopped {
            strategy_id: strategy_id.to_string(),
        });
        Ok(AutoTradingReport {
            strategy_id: strategy.id,
            active: strategy.active,
            auto_execute_enabled: strategy.auto_execute_enabled,
            active_universes: Vec::new(),
            inactive_universes: bindings.into_iter().map(|b| b.universe_id).collect(),
            active_stocks: 0,
        })
    }

    pub async fn halt_all(&self, confirmation: &str) -> TradingResult<HaltReport> {
        let confirmation = Confirmation::parse(confirmation)?;
        self.services.emergency.halt_all(confirmation).await
    }

    pub async fn cancel_all_pending(&self, confirmation: &str) -> TradingResult<BulkReport> {
        let confirmation = Confirmation::parse(confirmation)?;
        self.services.emergency.cancel_all_pending(confirmation).await
    }

    pub async fn liquidate_all(&self, confirmation: &str) -> TradingResult<BulkReport> {
        let confirmation = Confirmation::parse(confirmation)?;
        self.services.emergency.liquidate_all(confirmation).await
    }

    /// Sizes the strategy budget against the cash of its broker account.
    pub async fn allocate_capital(
        &self,
        strategy_id: &str,
        request: AllocationRequest,
    ) -> TradingResult<CapitalStatus> {
        let strategy = self.strategy(strategy_id).await?;
        let session = self
            .services
            .vault
            .resolve(strategy.user_id, strategy.trading_mode)
            .await?;
        let balance = session.get_balance().await?;
        self.services
            .ledger
            .allocate(strategy_id, request, balance.cash)
            .await?;
        self.capital_status(strategy_id).await
    }

    pub async fn capital_status(&self, strategy_id: &str) -> TradingResult<CapitalStatus> {
        let strategy = self.strategy(strategy_id).await?;
        let allocation = self.services.ledger.snapshot(strategy_id).await?;
        Ok(CapitalStatus {
            strategy_id: allocation.strategy_id,
            total_allocated: allocation.total_allocated,
            in_use: allocation.in_use,
            available: allocation.available,
            allocated_percent: strategy.allocated_percent,
            anomaly: allocation.available < 0,
        })
    }

    /// Records a signal from an external producer and ingests it right away.
    pub async fn submit_signal(&self, signal: NewSignal) -> TradingResult<SignalReceipt> {
        let model = trading_signals::Model {
            id: signal.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            strategy_id: signal.strategy_id,
            stock_code: signal.stock_code,
            signal_type: signal.signal_type,
            strength: signal.strength,
            generated_at: signal.generated_at.unwrap_or_else(Utc::now),
        };
        self.strategy(&model.strategy_id).await?;
        let stored = self.services.ingester.record(&model).await?;
        if stored.strategy_id != model.strategy_id {
            return Err(TradingError::InvalidOrder(format!(
                "signal {} already belongs to strategy {}",
                stored.id, stored.strategy_id
            )));
        }
        let outcome = self.services.ingester.ingest(&stored).await?;
        Ok(SignalReceipt {
            signal_id: stored.id,
            outcome,
        })
    }

    pub async fn reconcile_fill(&self, fill: FillReport) -> TradingResult<FillOutcome> {
        self.services.orders.reconcile(&fill).await
    }

    pub async fn tick(&self) -> TradingResult<TickReport> {
        self.services.scheduler.tick().await
    }

    async fn strategy(&self, strategy_id: &str) -> TradingResult<strategies::Model> {
        strategies::Entity::find_by_id(strategy_id.to_string())
            .one(self.services.db.as_ref())
            .await?
            .ok_or_else(|| TradingError::not_found("strategy", strategy_id))
    }
}
