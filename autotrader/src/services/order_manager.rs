//! Order placement, fill reconciliation and cancellation.
//!
//! Lock order is always: strategy ledger lock, then a database transaction.
//! Broker calls are never made while a transaction is open.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use shared::entity::{order_fills, orders, positions, strategies};
use shared::{OrderEvent, OrderStatus, OrderType, Side};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerError, BrokerOrderState, BrokerOrderStatus, BrokerSession, FillReport, PlaceOrderRequest};
use crate::error::{TradingError, TradingResult};
use crate::services::capital_ledger::CapitalLedger;
use crate::services::credential_vault::CredentialVault;
use crate::services::events::{EventBus, TradingEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub strategy_id: String,
    pub stock_code: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i64,
    /// Required for limit orders, refused for market orders.
    #[serde(default)]
    pub limit_price: Option<i64>,
    /// Quote the caller already holds for a market order; fetched when absent.
    #[serde(default)]
    pub reference_price: Option<i64>,
    #[serde(default)]
    pub signal_id: Option<String>,
}

impl OrderRequest {
    pub fn market(strategy_id: &str, stock_code: &str, side: Side, quantity: i64) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            stock_code: stock_code.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            reference_price: None,
            signal_id: None,
        }
    }

    pub fn limit(strategy_id: &str, stock_code: &str, side: Side, quantity: i64, price: i64) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(price),
            ..Self::market(strategy_id, stock_code, side, quantity)
        }
    }

    fn validate(&self) -> TradingResult<()> {
        if self.quantity <= 0 {
            return Err(TradingError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        match (self.order_type, self.limit_price) {
            (OrderType::Limit, None) => Err(TradingError::InvalidOrder("limit order without a price".to_string())),
            (OrderType::Limit, Some(price)) if price <= 0 => Err(TradingError::InvalidOrder(format!(
                "limit price must be positive, got {}",
                price
            ))),
            (OrderType::Market, Some(_)) => Err(TradingError::InvalidOrder(
                "market orders carry no limit price".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "order", rename_all = "snake_case")]
pub enum PlacementOutcome {
    /// The broker acknowledged the order.
    Placed(orders::Model),
    /// The placement timed out. The order is stored PENDING with `outcome_unknown` set.
    Unknown(orders::Model),
}

impl PlacementOutcome {
    pub fn order(&self) -> &orders::Model {
        match self {
            PlacementOutcome::Placed(order) | PlacementOutcome::Unknown(order) => order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "order", rename_all = "snake_case")]
pub enum FillOutcome {
    Applied(orders::Model),
    /// The same fill was reconciled before; nothing changed.
    Duplicate(orders::Model),
}

/// Counters from one pass over a strategy's open orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub fills_applied: usize,
    pub resolved_unknown: usize,
    pub cancelled: usize,
    /// Placements still waiting on their broker call, left alone this pass.
    pub in_flight: usize,
    pub errors: Vec<String>,
}

pub struct OrderLifecycleManager {
    db: Arc<DatabaseConnection>,
    ledger: Arc<CapitalLedger>,
    vault: Arc<CredentialVault>,
    events: EventBus,
    /// How long a placement may own its `outcome_unknown` row before sync resolves it.
    placement_grace: Duration,
}

impl OrderLifecycleManager {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: Arc<CapitalLedger>,
        vault: Arc<CredentialVault>,
        events: EventBus,
        placement_grace: Duration,
    ) -> Self {
        Self {
            db,
            ledger,
            vault,
            events,
            placement_grace,
        }
    }

    pub async fn get(&self, order_id: &str) -> TradingResult<orders::Model> {
        orders::Entity::find_by_id(order_id.to_string())
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| TradingError::not_found("order", order_id))
    }

    /// Orders still working at the broker, optionally for one strategy, oldest first.
    pub async fn open_orders(&self, strategy_id: Option<&str>) -> TradingResult<Vec<orders::Model>> {
        let mut query = orders::Entity::find().filter(orders::Column::Status.is_in(OrderStatus::OPEN));
        if let Some(strategy_id) = strategy_id {
            query = query.filter(orders::Column::StrategyId.eq(strategy_id));
        }
        Ok(query
            .order_by_asc(orders::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Reserves capital, stores the order, then sends it.
    ///
    /// The order row and its reservation are written together before the
    /// broker is called, flagged `outcome_unknown`, so an interrupted
    /// placement is always visible to [`OrderLifecycleManager::sync_open_orders`].
    /// A refused or failed placement deletes the row and releases the
    /// reservation. A timed-out placement keeps both until the next sync finds
    /// out what the broker did.
    ///
    /// The work runs in its own task: a caller that gives up waiting does not
    /// stop a placement halfway.
    pub async fn place(self: &Arc<Self>, request: OrderRequest) -> TradingResult<PlacementOutcome> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.place_detached(request).await })
            .await
            .map_err(|e| TradingError::Task(format!("order placement: {}", e)))?
    }

    async fn place_detached(&self, request: OrderRequest) -> TradingResult<PlacementOutcome> {
        request.validate()?;

        let strategy = strategies::Entity::find_by_id(request.strategy_id.clone())
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| TradingError::not_found("strategy", &request.strategy_id))?;
        let session = self.vault.resolve(strategy.user_id, strategy.trading_mode).await?;

        let reference_price = match (request.order_type, request.limit_price, request.reference_price) {
            (OrderType::Limit, Some(price), _) => price,
            (_, _, Some(price)) if price > 0 => price,
            _ => session.get_current_price(&request.stock_code).await?.price,
        };

        let reserved_amount = match request.side {
            Side::Buy => reference_price
                .checked_mul(request.quantity)
                .ok_or_else(|| TradingError::InvalidOrder("order value overflows".to_string()))?,
            Side::Sell => 0,
        };
        let order = self.open_pending(&strategy, &request, reference_price, reserved_amount).await?;

        let broker_request = PlaceOrderRequest {
            client_order_id: order.id.clone(),
            stock_code: request.stock_code.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.limit_price,
        };

        match session.place_order(&broker_request).await {
            Ok(ack) if ack.status == BrokerOrderStatus::Rejected => {
                self.withdraw(&order).await;
                Err(TradingError::BrokerRejected(format!(
                    "{} {:?} x {} refused ({})",
                    request.stock_code, request.side, request.quantity, ack.broker_order_ref
                )))
            }
            Ok(ack) => {
                let mut confirmed: orders::ActiveModel = order.clone().into();
                confirmed.broker_order_ref = Set(Some(ack.broker_order_ref.clone()));
                confirmed.outcome_unknown = Set(false);
                confirmed.updated_at = Set(Utc::now());
                let order = match confirmed.update(self.db.as_ref()).await {
                    Ok(order) => order,
                    Err(e) => {
                        // The row stays flagged; the next sync finds it by client order id.
                        error!(
                            "Order {} was accepted by the broker as {} but could not be updated: {}",
                            order.id, ack.broker_order_ref, e
                        );
                        self.publish_unknown(&order);
                        return Ok(PlacementOutcome::Unknown(order));
                    }
                };
                info!(
                    "Placed order {} ({} {:?} {:?} x {}) as {}",
                    order.id, order.stock_code, order.side, order.order_type, order.requested_quantity, ack.broker_order_ref
                );
                self.events.publish(TradingEvent::OrderPlaced {
                    order_id: order.id.clone(),
                    strategy_id: order.strategy_id.clone(),
                    stock_code: order.stock_code.clone(),
                    side: order.side,
                    quantity: order.requested_quantity,
                });

                for fill in &ack.fills {
                    if let Err(e) = self.reconcile(fill).await {
                        warn!("Fill {:?} on new order {} not applied: {}", fill, order.id, e);
                    }
                }
                if ack.status == BrokerOrderStatus::Cancelled {
                    self.apply_cancel(&order.id).await?;
                }
                Ok(PlacementOutcome::Placed(self.get(&order.id).await?))
            }
            Err(BrokerError::Timeout(reason)) => {
                warn!(
                    "Placement of order {} timed out ({}); outcome unknown until the next sync",
                    order.id, reason
                );
                self.publish_unknown(&order);
                Ok(PlacementOutcome::Unknown(order))
            }
            Err(e) => {
                self.withdraw(&order).await;
                warn!("Placement of {} for strategy {} failed: {}", request.stock_code, strategy.id, e);
                Err(e.into())
            }
        }
    }

    /// Reserves capital and inserts the order as PENDING with `outcome_unknown`, in one transaction.
    async fn open_pending(
        &self,
        strategy: &strategies::Model,
        request: &OrderRequest,
        reference_price: i64,
        reserved_amount: i64,
    ) -> TradingResult<orders::Model> {
        let _guard = self.ledger.lock(&strategy.id).await;
        let txn = self.db.begin().await?;

        if request.side == Side::Sell {
            let sellable = Self::sellable_in(&txn, &strategy.id, &request.stock_code).await?;
            if sellable < request.quantity {
                return Err(TradingError::InvalidOrder(format!(
                    "cannot sell {} {}: only {} not already on sale",
                    request.quantity, request.stock_code, sellable
                )));
            }
        }
        if reserved_amount > 0 {
            self.ledger.reserve_in(&txn, &strategy.id, reserved_amount).await?;
        }

        let now = Utc::now();
        let order = orders::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            strategy_id: Set(strategy.id.clone()),
            user_id: Set(strategy.user_id),
            trading_mode: Set(strategy.trading_mode),
            stock_code: Set(request.stock_code.clone()),
            side: Set(request.side),
            order_type: Set(request.order_type),
            requested_price: Set(reference_price),
            requested_quantity: Set(request.quantity),
            status: Set(OrderStatus::Pending),
            executed_price: Set(None),
            executed_quantity: Set(0),
            reserved_amount: Set(reserved_amount),
            broker_order_ref: Set(None),
            outcome_unknown: Set(true),
            signal_id: Set(request.signal_id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(order)
    }

    /// Undoes [`OrderLifecycleManager::open_pending`] after the broker refused the order.
    ///
    /// On failure the row stays flagged and the next sync cancels it, releasing
    /// the reservation there.
    async fn withdraw(&self, order: &orders::Model) {
        let result = async {
            let _guard = self.ledger.lock(&order.strategy_id).await;
            let txn = self.db.begin().await?;
            if order.reserved_amount > 0 {
                self.ledger
                    .release_in(&txn, &order.strategy_id, order.reserved_amount)
                    .await?;
            }
            orders::Entity::delete_by_id(order.id.clone()).exec(&txn).await?;
            txn.commit().await?;
            Ok::<(), TradingError>(())
        }
        .await;
        if let Err(e) = result {
            error!(
                "Could not withdraw order {} of strategy {}: {}",
                order.id, order.strategy_id, e
            );
        }
    }

    fn publish_unknown(&self, order: &orders::Model) {
        self.events.publish(TradingEvent::OrderOutcomeUnknown {
            order_id: order.id.clone(),
            strategy_id: order.strategy_id.clone(),
        });
    }

    /// Shares of a stock the strategy can still sell: the position minus what open sells claim.
    pub async fn sellable_quantity(&self, strategy_id: &str, stock_code: &str) -> TradingResult<i64> {
        Self::sellable_in(self.db.as_ref(), strategy_id, stock_code).await
    }

    async fn sellable_in<C: ConnectionTrait>(conn: &C, strategy_id: &str, stock_code: &str) -> TradingResult<i64> {
        let held = positions::Entity::find_by_id((strategy_id.to_string(), stock_code.to_string()))
            .one(conn)
            .await?
            .map(|p| p.quantity)
            .unwrap_or(0);
        let committed: i64 = orders::Entity::find()
            .filter(orders::Column::StrategyId.eq(strategy_id))
            .filter(orders::Column::StockCode.eq(stock_code))
            .filter(orders::Column::Side.eq(Side::Sell))
            .filter(orders::Column::Status.is_in(OrderStatus::OPEN))
            .all(conn)
            .await?
            .iter()
            .map(orders::Model::remaining_quantity)
            .sum();
        Ok((held - committed).max(0))
    }

    /// Applies one broker fill report. Re-delivery of the same report is a no-op.
    pub async fn reconcile(&self, fill: &FillReport) -> TradingResult<FillOutcome> {
        let order = orders::Entity::find()
            .filter(orders::Column::BrokerOrderRef.eq(fill.broker_order_ref.as_str()))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| TradingError::not_found("order with broker ref", &fill.broker_order_ref))?;

        let _guard = self.ledger.lock(&order.strategy_id).await;
        let txn = self.db.begin().await?;
        let (order, allocation) = match Self::apply_fill(&self.ledger, &txn, &order.id, fill).await? {
            Some(applied) => applied,
            None => {
                txn.rollback().await?;
                debug!(
                    "Fill {}@{} already reconciled",
                    fill.broker_order_ref,
                    fill.filled_at.timestamp_millis()
                );
                return Ok(FillOutcome::Duplicate(order));
            }
        };
        txn.commit().await?;

        if let Some(allocation) = allocation {
            self.ledger.observe(&allocation);
        }
        info!(
            "Order {} filled {} @ {} ({}/{}), now {:?}",
            order.id, fill.quantity, fill.price, order.executed_quantity, order.requested_quantity, order.status
        );
        self.events.publish(TradingEvent::OrderUpdated {
            order_id: order.id.clone(),
            strategy_id: order.strategy_id.clone(),
            status: order.status,
            executed_quantity: order.executed_quantity,
        });
        Ok(FillOutcome::Applied(order))
    }

    /// Returns `None` when this exact fill was applied before.
    async fn apply_fill<C: ConnectionTrait>(
        ledger: &CapitalLedger,
        conn: &C,
        order_id: &str,
        fill: &FillReport,
    ) -> TradingResult<Option<(orders::Model, Option<shared::entity::capital_allocations::Model>)>> {
        let order = orders::Entity::find_by_id(order_id.to_string())
            .one(conn)
            .await?
            .ok_or_else(|| TradingError::not_found("order", order_id))?;
        let filled_at_ms = fill.filled_at.timestamp_millis();

        if let Some(seen) = order_fills::Entity::find_by_id((fill.broker_order_ref.clone(), filled_at_ms))
            .one(conn)
            .await?
        {
            if seen.quantity == fill.quantity && seen.price == fill.price {
                return Ok(None);
            }
            error!(
                "Conflicting fill reports for {}@{}: stored {} @ {}, received {} @ {}",
                fill.broker_order_ref, filled_at_ms, seen.quantity, seen.price, fill.quantity, fill.price
            );
            return Err(TradingError::ReconciliationConflict(format!(
                "fill {}@{} reported as {} @ {} and {} @ {}",
                fill.broker_order_ref, filled_at_ms, seen.quantity, seen.price, fill.quantity, fill.price
            )));
        }

        if order.status.is_terminal() {
            return Err(TradingError::ReconciliationConflict(format!(
                "fill for order {} which is already {:?}",
                order.id, order.status
            )));
        }
        if fill.quantity <= 0 || fill.quantity > order.remaining_quantity() || fill.price <= 0 {
            return Err(TradingError::ReconciliationConflict(format!(
                "fill of {} @ {} does not fit order {} ({} remaining)",
                fill.quantity,
                fill.price,
                order.id,
                order.remaining_quantity()
            )));
        }

        let executed_quantity = order.executed_quantity + fill.quantity;
        let event = if executed_quantity == order.requested_quantity {
            OrderEvent::FullFill
        } else {
            OrderEvent::PartialFill
        };
        let status = order.status.on(event).map_err(|source| TradingError::InvalidTransition {
            order_id: order.id.clone(),
            status: order.status,
            source,
        })?;
        let cost = fill.price.checked_mul(fill.quantity).ok_or_else(|| {
            TradingError::ReconciliationConflict(format!(
                "fill of {} @ {} on order {} overflows its cost",
                fill.quantity, fill.price, order.id
            ))
        })?;
        let executed_price = (order.executed_price.unwrap_or(0.0) * order.executed_quantity as f64
            + cost as f64)
            / executed_quantity as f64;

        let (allocation, reserved_amount) = match order.side {
            Side::Buy => {
                let released = if event == OrderEvent::FullFill {
                    order.reserved_amount
                } else {
                    order.requested_price.saturating_mul(fill.quantity).min(order.reserved_amount)
                };
                let allocation = ledger.settle_in(conn, &order.strategy_id, released, cost).await?;
                Self::add_to_position(conn, &order, fill, cost).await?;
                (Some(allocation), order.reserved_amount - released)
            }
            Side::Sell => {
                Self::remove_from_position(conn, &order, fill).await?;
                let allocation = ledger.credit_in(conn, &order.strategy_id, cost).await?;
                (Some(allocation), order.reserved_amount)
            }
        };

        order_fills::ActiveModel {
            broker_order_ref: Set(fill.broker_order_ref.clone()),
            filled_at_ms: Set(filled_at_ms),
            order_id: Set(order.id.clone()),
            quantity: Set(fill.quantity),
            price: Set(fill.price),
            applied_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        let mut updated: orders::ActiveModel = order.into();
        updated.status = Set(status);
        updated.executed_quantity = Set(executed_quantity);
        updated.executed_price = Set(Some(executed_price));
        updated.reserved_amount = Set(reserved_amount);
        updated.outcome_unknown = Set(false);
        updated.updated_at = Set(Utc::now());
        let order = updated.update(conn).await?;

        Ok(Some((order, allocation)))
    }

    async fn add_to_position<C: ConnectionTrait>(
        conn: &C,
        order: &orders::Model,
        fill: &FillReport,
        cost: i64,
    ) -> TradingResult<()> {
        let key = (order.strategy_id.clone(), order.stock_code.clone());
        match positions::Entity::find_by_id(key).one(conn).await? {
            Some(position) => {
                let quantity = position.quantity + fill.quantity;
                let average_price =
                    (position.average_price * position.quantity as f64 + cost as f64) / quantity as f64;
                let mut position: positions::ActiveModel = position.into();
                position.quantity = Set(quantity);
                position.average_price = Set(average_price);
                position.updated_at = Set(Utc::now());
                position.update(conn).await?;
            }
            None => {
                positions::ActiveModel {
                    strategy_id: Set(order.strategy_id.clone()),
                    stock_code: Set(order.stock_code.clone()),
                    quantity: Set(fill.quantity),
                    average_price: Set(fill.price as f64),
                    updated_at: Set(Utc::now()),
                }
                .insert(conn)
                .await?;
            }
        }
        Ok(())
    }

    async fn remove_from_position<C: ConnectionTrait>(
        conn: &C,
        order: &orders::Model,
        fill: &FillReport,
    ) -> TradingResult<()> {
        let key = (order.strategy_id.clone(), order.stock_code.clone());
        let position = positions::Entity::find_by_id(key.clone())
            .one(conn)
            .await?
            .filter(|p| p.quantity >= fill.quantity)
            .ok_or_else(|| {
                TradingError::ReconciliationConflict(format!(
                    "sell fill of {} {} exceeds the position of strategy {}",
                    fill.quantity, order.stock_code, order.strategy_id
                ))
            })?;

        let quantity = position.quantity - fill.quantity;
        if quantity == 0 {
            positions::Entity::delete_by_id(key).exec(conn).await?;
        } else {
            let mut position: positions::ActiveModel = position.into();
            position.quantity = Set(quantity);
            position.updated_at = Set(Utc::now());
            position.update(conn).await?;
        }
        Ok(())
    }

    /// Asks the broker to cancel and, once it confirms, cancels the remaining quantity here.
    pub async fn cancel(&self, order_id: &str) -> TradingResult<orders::Model> {
        let order = self.get(order_id).await?;
        if order.status.is_terminal() {
            return Err(TradingError::InvalidTransition {
                order_id: order.id.clone(),
                status: order.status,
                source: shared::TransitionError {
                    from: order.status,
                    event: OrderEvent::Cancel,
                },
            });
        }
        let broker_ref = match (&order.broker_order_ref, order.outcome_unknown) {
            (Some(broker_ref), false) => broker_ref.clone(),
            _ => {
                return Err(TradingError::InvalidOrder(format!(
                    "order {} has no confirmed broker reference yet",
                    order.id
                )))
            }
        };

        let session = self.vault.resolve(order.user_id, order.trading_mode).await?;
        let ack = session.cancel_order(&broker_ref).await?;
        if ack.status != BrokerOrderStatus::Cancelled {
            return Err(TradingError::BrokerRejected(format!(
                "cancel of {} not confirmed, broker reports {:?}",
                broker_ref, ack.status
            )));
        }

        // Fills that landed before the cancel still count.
        match session.order_state(&broker_ref).await {
            Ok(state) => {
                self.apply_reported_fills(&state).await;
            }
            Err(e) => warn!("Could not fetch fills of cancelled order {}: {}", broker_ref, e),
        }
        self.apply_cancel(&order.id).await
    }

    /// Moves an open order to CANCELLED and releases what it still reserves.
    async fn apply_cancel(&self, order_id: &str) -> TradingResult<orders::Model> {
        let order = self.get(order_id).await?;
        let _guard = self.ledger.lock(&order.strategy_id).await;
        let txn = self.db.begin().await?;

        let order = orders::Entity::find_by_id(order_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| TradingError::not_found("order", order_id))?;
        let status = order.status.on(OrderEvent::Cancel).map_err(|source| TradingError::InvalidTransition {
            order_id: order.id.clone(),
            status: order.status,
            source,
        })?;
        if order.reserved_amount > 0 {
            self.ledger
                .release_in(&txn, &order.strategy_id, order.reserved_amount)
                .await?;
        }

        let mut updated: orders::ActiveModel = order.into();
        updated.status = Set(status);
        updated.reserved_amount = Set(0);
        updated.outcome_unknown = Set(false);
        updated.updated_at = Set(Utc::now());
        let order = updated.update(&txn).await?;
        txn.commit().await?;

        info!(
            "Order {} cancelled with {}/{} filled",
            order.id, order.executed_quantity, order.requested_quantity
        );
        self.events.publish(TradingEvent::OrderUpdated {
            order_id: order.id.clone(),
            strategy_id: order.strategy_id.clone(),
            status: order.status,
            executed_quantity: order.executed_quantity,
        });
        Ok(order)
    }

    async fn apply_reported_fills(&self, state: &BrokerOrderState) -> (usize, Vec<String>) {
        let mut applied = 0;
        let mut errors = Vec::new();
        for fill in &state.fills {
            match self.reconcile(fill).await {
                Ok(FillOutcome::Applied(_)) => applied += 1,
                Ok(FillOutcome::Duplicate(_)) => {}
                Err(e) => {
                    warn!("Fill on {} not applied: {}", state.broker_order_ref, e);
                    errors.push(e.to_string());
                }
            }
        }
        (applied, errors)
    }

    /// Brings every open order of a strategy up to date with the broker.
    pub async fn sync_open_orders(&self, strategy_id: &str) -> TradingResult<SyncReport> {
        let mut report = SyncReport::default();
        for order in self.open_orders(Some(strategy_id)).await? {
            report.checked += 1;
            if order.outcome_unknown && self.is_in_flight(&order) {
                report.in_flight += 1;
                continue;
            }
            let session = match self.vault.resolve(order.user_id, order.trading_mode).await {
                Ok(session) => session,
                Err(e) => {
                    report.errors.push(format!("{}: {}", order.id, e));
                    continue;
                }
            };
            let result = if order.outcome_unknown {
                self.resolve_unknown(&session, &order, &mut report).await
            } else {
                self.poll_order(&session, &order, &mut report).await
            };
            if let Err(e) = result {
                warn!("Sync of order {} failed: {}", order.id, e);
                report.errors.push(format!("{}: {}", order.id, e));
            }
        }
        if report.checked > 0 {
            debug!("Synced open orders of strategy {}: {:?}", strategy_id, report);
        }
        Ok(report)
    }

    /// A flagged order younger than the broker timeout may still be in its placement call.
    fn is_in_flight(&self, order: &orders::Model) -> bool {
        Utc::now()
            .signed_duration_since(order.created_at)
            .to_std()
            .map(|age| age < self.placement_grace)
            .unwrap_or(true)
    }

    /// Finds out whether an interrupted or timed-out placement reached the broker.
    async fn resolve_unknown(
        &self,
        session: &BrokerSession,
        order: &orders::Model,
        report: &mut SyncReport,
    ) -> TradingResult<()> {
        match session.find_order(&order.id).await? {
            Some(state) => {
                let mut updated: orders::ActiveModel = order.clone().into();
                updated.broker_order_ref = Set(Some(state.broker_order_ref.clone()));
                updated.outcome_unknown = Set(false);
                updated.updated_at = Set(Utc::now());
                updated.update(self.db.as_ref()).await?;
                info!(
                    "Order {} with unknown outcome found at the broker as {}",
                    order.id, state.broker_order_ref
                );
                report.resolved_unknown += 1;
                self.absorb_state(&state, order, report).await
            }
            None => {
                info!("Order {} never reached the broker; cancelling it", order.id);
                self.apply_cancel(&order.id).await?;
                report.resolved_unknown += 1;
                report.cancelled += 1;
                Ok(())
            }
        }
    }

    async fn poll_order(
        &self,
        session: &BrokerSession,
        order: &orders::Model,
        report: &mut SyncReport,
    ) -> TradingResult<()> {
        let Some(broker_ref) = order.broker_order_ref.as_deref() else {
            return Ok(());
        };
        let state = session.order_state(broker_ref).await?;
        self.absorb_state(&state, order, report).await
    }

    async fn absorb_state(
        &self,
        state: &BrokerOrderState,
        order: &orders::Model,
        report: &mut SyncReport,
    ) -> TradingResult<()> {
        let (applied, errors) = self.apply_reported_fills(state).await;
        report.fills_applied += applied;
        report.errors.extend(errors);

        if matches!(state.status, BrokerOrderStatus::Cancelled | BrokerOrderStatus::Rejected) {
            let current = self.get(&order.id).await?;
            if !current.status.is_terminal() {
                self.apply_cancel(&order.id).await?;
                report.cancelled += 1;
            }
        }
        Ok(())
    }
}
