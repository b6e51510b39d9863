//! Turns trading signals into orders, at most once per signal id.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::sea_query::Query;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlErr,
};
use serde::Serialize;
use shared::entity::{orders, positions, signal_consumptions, strategies, trading_signals};
use shared::{ConsumptionOutcome, OrderType, Side, SignalType};
use tracing::{debug, info, warn};

use crate::error::{TradingError, TradingResult};
use crate::services::capital_ledger::CapitalLedger;
use crate::services::credential_vault::CredentialVault;
use crate::services::events::{EventBus, TradingEvent};
use crate::services::order_manager::{OrderLifecycleManager, OrderRequest, PlacementOutcome};
use crate::services::sizing::{PositionSizer, SizingContext};
use crate::services::universe_binder::UniverseBinder;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted { order_id: String, outcome_unknown: bool },
    DuplicateIgnored,
    OutOfScope,
    Skipped { reason: String },
}

pub struct SignalIngester {
    db: Arc<DatabaseConnection>,
    binder: Arc<UniverseBinder>,
    ledger: Arc<CapitalLedger>,
    vault: Arc<CredentialVault>,
    orders: Arc<OrderLifecycleManager>,
    sizer: Arc<dyn PositionSizer>,
    events: EventBus,
    claim_expiry: Duration,
}

impl SignalIngester {
    pub fn new(
        db: Arc<DatabaseConnection>,
        binder: Arc<UniverseBinder>,
        ledger: Arc<CapitalLedger>,
        vault: Arc<CredentialVault>,
        orders: Arc<OrderLifecycleManager>,
        sizer: Arc<dyn PositionSizer>,
        events: EventBus,
        claim_expiry: Duration,
    ) -> Self {
        Self {
            db,
            binder,
            ledger,
            vault,
            orders,
            sizer,
            events,
            claim_expiry,
        }
    }

    /// Signals of a strategy that were never consumed, oldest first.
    pub async fn pending_signals(&self, strategy_id: &str) -> TradingResult<Vec<trading_signals::Model>> {
        Ok(trading_signals::Entity::find()
            .filter(trading_signals::Column::StrategyId.eq(strategy_id))
            .filter(
                trading_signals::Column::Id.not_in_subquery(
                    Query::select()
                        .column(signal_consumptions::Column::SignalId)
                        .from(signal_consumptions::Entity)
                        .and_where(signal_consumptions::Column::StrategyId.eq(strategy_id))
                        .to_owned(),
                ),
            )
            .order_by_asc(trading_signals::Column::GeneratedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Appends a signal to the source table unless its id is already there.
    pub async fn record(&self, signal: &trading_signals::Model) -> TradingResult<trading_signals::Model> {
        if let Some(existing) = trading_signals::Entity::find_by_id(signal.id.clone())
            .one(self.db.as_ref())
            .await?
        {
            return Ok(existing);
        }
        let model = trading_signals::ActiveModel {
            id: Set(signal.id.clone()),
            strategy_id: Set(signal.strategy_id.clone()),
            stock_code: Set(signal.stock_code.clone()),
            signal_type: Set(signal.signal_type),
            strength: Set(signal.strength.clamp(0, 100)),
            generated_at: Set(signal.generated_at),
        };
        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// Claims, processes and records one signal in its own task, so a caller
    /// that stops waiting cannot leave the claim half done.
    pub async fn ingest(self: &Arc<Self>, signal: &trading_signals::Model) -> TradingResult<IngestOutcome> {
        let ingester = Arc::clone(self);
        let signal = signal.clone();
        tokio::spawn(async move { ingester.ingest_detached(&signal).await })
            .await
            .map_err(|e| TradingError::Task(format!("signal ingestion: {}", e)))?
    }

    async fn ingest_detached(&self, signal: &trading_signals::Model) -> TradingResult<IngestOutcome> {
        match self.claim(signal).await {
            Ok(()) => {}
            Err(TradingError::DuplicateSignal(id)) => {
                debug!("Signal {} already consumed, ignoring", id);
                return Ok(IngestOutcome::DuplicateIgnored);
            }
            Err(e) => return Err(e),
        }

        match self.process(signal).await {
            Ok(outcome) => {
                let (recorded, order_id, detail) = match &outcome {
                    IngestOutcome::Accepted { order_id, .. } => {
                        (ConsumptionOutcome::Accepted, Some(order_id.clone()), None)
                    }
                    IngestOutcome::OutOfScope => (ConsumptionOutcome::OutOfScope, None, None),
                    IngestOutcome::Skipped { reason } => {
                        (ConsumptionOutcome::Skipped, None, Some(reason.clone()))
                    }
                    IngestOutcome::DuplicateIgnored => return Ok(outcome),
                };
                self.finish(&signal.id, recorded, order_id, detail).await?;
                Ok(outcome)
            }
            Err(e) => {
                if e.is_operator_facing() {
                    warn!("Signal {} for strategy {} rejected: {}", signal.id, signal.strategy_id, e);
                } else {
                    info!("Signal {} for strategy {} failed: {}", signal.id, signal.strategy_id, e);
                }
                self.finish(&signal.id, ConsumptionOutcome::Rejected, None, Some(e.to_string()))
                    .await?;
                self.events.publish(TradingEvent::SignalRejected {
                    signal_id: signal.id.clone(),
                    strategy_id: signal.strategy_id.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Inserts the consumption marker. The primary key makes a second claim fail.
    async fn claim(&self, signal: &trading_signals::Model) -> TradingResult<()> {
        let marker = signal_consumptions::ActiveModel {
            signal_id: Set(signal.id.clone()),
            strategy_id: Set(signal.strategy_id.clone()),
            outcome: Set(ConsumptionOutcome::Processing),
            order_id: Set(None),
            detail: Set(None),
            consumed_at: Set(Utc::now()),
        };
        match signal_consumptions::Entity::insert(marker)
            .exec_without_returning(self.db.as_ref())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(TradingError::DuplicateSignal(signal.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Settles `processing` markers left behind by an ingest that never finished.
    ///
    /// A marker whose signal has an order becomes `accepted` for that order.
    /// Any other marker is removed, so the signal is pending again; no order
    /// row means nothing reached the broker.
    pub async fn recover_stale_claims(&self, strategy_id: &str) -> TradingResult<usize> {
        let expiry = chrono::Duration::from_std(self.claim_expiry).unwrap_or_else(|_| chrono::Duration::days(1));
        let stale = signal_consumptions::Entity::find()
            .filter(signal_consumptions::Column::StrategyId.eq(strategy_id))
            .filter(signal_consumptions::Column::Outcome.eq(ConsumptionOutcome::Processing))
            .filter(signal_consumptions::Column::ConsumedAt.lt(Utc::now() - expiry))
            .all(self.db.as_ref())
            .await?;

        for marker in &stale {
            let order = orders::Entity::find()
                .filter(orders::Column::SignalId.eq(marker.signal_id.as_str()))
                .one(self.db.as_ref())
                .await?;
            match order {
                Some(order) => {
                    warn!(
                        "Signal {} was left processing; recording its order {}",
                        marker.signal_id, order.id
                    );
                    self.finish(
                        &marker.signal_id,
                        ConsumptionOutcome::Accepted,
                        Some(order.id),
                        Some("recovered from an unfinished ingest".to_string()),
                    )
                    .await?;
                }
                None => {
                    warn!(
                        "Signal {} was left processing without an order; releasing it for retry",
                        marker.signal_id
                    );
                    signal_consumptions::Entity::delete_by_id(marker.signal_id.clone())
                        .exec(self.db.as_ref())
                        .await?;
                }
            }
        }
        Ok(stale.len())
    }

    async fn finish(
        &self,
        signal_id: &str,
        outcome: ConsumptionOutcome,
        order_id: Option<String>,
        detail: Option<String>,
    ) -> TradingResult<()> {
        let marker = signal_consumptions::ActiveModel {
            signal_id: Set(signal_id.to_string()),
            outcome: Set(outcome),
            order_id: Set(order_id),
            detail: Set(detail),
            consumed_at: Set(Utc::now()),
            ..Default::default()
        };
        marker.update(self.db.as_ref()).await?;
        Ok(())
    }

    async fn process(&self, signal: &trading_signals::Model) -> TradingResult<IngestOutcome> {
        let in_scope = self.binder.resolve_active_stocks(&signal.strategy_id).await?;
        if !in_scope.contains(&signal.stock_code) {
            debug!(
                "Signal {} for {} is outside the active universes of strategy {}",
                signal.id, signal.stock_code, signal.strategy_id
            );
            return Ok(IngestOutcome::OutOfScope);
        }

        let side = match signal.signal_type {
            SignalType::Buy => Side::Buy,
            SignalType::Sell => Side::Sell,
            SignalType::Hold => {
                return Ok(IngestOutcome::Skipped {
                    reason: "hold signal".to_string(),
                })
            }
        };

        let strategy = strategies::Entity::find_by_id(signal.strategy_id.clone())
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| TradingError::not_found("strategy", &signal.strategy_id))?;
        if !(strategy.active && strategy.auto_execute_enabled) {
            return Ok(IngestOutcome::Skipped {
                reason: "strategy is not auto-trading".to_string(),
            });
        }

        let session = self.vault.resolve(strategy.user_id, strategy.trading_mode).await?;
        let quote = session.get_current_price(&signal.stock_code).await?;
        let capital = self.ledger.snapshot(&strategy.id).await?;
        let held_quantity = positions::Entity::find_by_id((strategy.id.clone(), signal.stock_code.clone()))
            .one(self.db.as_ref())
            .await?
            .map(|p| p.quantity)
            .unwrap_or(0);

        let quantity = self.sizer.size(
            signal,
            &capital,
            &SizingContext {
                price: quote.price,
                held_quantity,
                position_size_percent: strategy.position_size_percent,
            },
        )?;
        if quantity <= 0 {
            return Ok(IngestOutcome::Skipped {
                reason: format!("{:?} sized to zero shares at {}", side, quote.price),
            });
        }

        let request = OrderRequest {
            strategy_id: strategy.id.clone(),
            stock_code: signal.stock_code.clone(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            reference_price: Some(quote.price),
            signal_id: Some(signal.id.clone()),
        };
        let outcome = match self.orders.place(request).await? {
            PlacementOutcome::Placed(order) => IngestOutcome::Accepted {
                order_id: order.id,
                outcome_unknown: false,
            },
            PlacementOutcome::Unknown(order) => IngestOutcome::Accepted {
                order_id: order.id,
                outcome_unknown: true,
            },
        };
        Ok(outcome)
    }
}
