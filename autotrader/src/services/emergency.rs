//! Operator kill switches: halt everything, cancel everything, sell everything.
//!
//! Each operation needs a [`Confirmation`] built from its own phrase. Bulk
//! operations try every item and report each outcome; one failure never stops
//! the loop.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::{Condition as Where, Expr};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use serde::Serialize;
use shared::entity::{positions, strategies};
use shared::Side;
use tracing::{error, info, warn};

use crate::error::{TradingError, TradingResult};
use crate::services::events::{EventBus, TradingEvent};
use crate::services::order_manager::{OrderLifecycleManager, OrderRequest, PlacementOutcome};
use crate::services::universe_binder::UniverseBinder;

pub trait EmergencyOperation {
    const OPERATION: BulkOperation;
    const PHRASE: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    HaltAll,
    CancelAllPending,
    LiquidateAll,
}

impl BulkOperation {
    pub fn name(self) -> &'static str {
        match self {
            BulkOperation::HaltAll => "halt_all",
            BulkOperation::CancelAllPending => "cancel_all_pending",
            BulkOperation::LiquidateAll => "liquidate_all",
        }
    }
}

#[derive(Debug)]
pub struct HaltAll;
#[derive(Debug)]
pub struct CancelAllPending;
#[derive(Debug)]
pub struct LiquidateAll;

impl EmergencyOperation for HaltAll {
    const OPERATION: BulkOperation = BulkOperation::HaltAll;
    const PHRASE: &'static str = "HALT ALL";
}

impl EmergencyOperation for CancelAllPending {
    const OPERATION: BulkOperation = BulkOperation::CancelAllPending;
    const PHRASE: &'static str = "CANCEL ALL";
}

impl EmergencyOperation for LiquidateAll {
    const OPERATION: BulkOperation = BulkOperation::LiquidateAll;
    const PHRASE: &'static str = "LIQUIDATE ALL";
}

/// Proof that an operator typed the phrase of operation `O`.
#[derive(Debug)]
pub struct Confirmation<O> {
    _operation: PhantomData<O>,
}

impl<O: EmergencyOperation> Confirmation<O> {
    pub fn parse(phrase: &str) -> TradingResult<Self> {
        if phrase.trim() == O::PHRASE {
            Ok(Self {
                _operation: PhantomData,
            })
        } else {
            Err(TradingError::ConfirmationMismatch {
                operation: O::OPERATION.name(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded,
    Failed,
    /// The broker did not answer in time. Counted as failed.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItem {
    pub item_id: String,
    pub outcome: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub operation: BulkOperation,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BulkItem>,
}

impl BulkReport {
    fn new(operation: BulkOperation) -> Self {
        Self {
            operation,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            items: Vec::new(),
        }
    }

    fn push(&mut self, item_id: String, result: TradingResult<bool>) {
        self.attempted += 1;
        let (outcome, error) = match result {
            Ok(true) => (ItemOutcome::Succeeded, None),
            Ok(false) => (ItemOutcome::Unknown, Some("broker outcome unknown".to_string())),
            Err(e @ TradingError::BrokerTimeout(_)) => (ItemOutcome::Unknown, Some(e.to_string())),
            Err(e) => (ItemOutcome::Failed, Some(e.to_string())),
        };
        if outcome == ItemOutcome::Succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.items.push(BulkItem {
            item_id,
            outcome,
            error,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HaltReport {
    pub halted: Vec<String>,
    pub bindings_deactivated: u64,
}

pub struct EmergencyController {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderLifecycleManager>,
    events: EventBus,
}

impl EmergencyController {
    pub fn new(db: Arc<DatabaseConnection>, orders: Arc<OrderLifecycleManager>, events: EventBus) -> Self {
        Self { db, orders, events }
    }

    /// Switches every running strategy off in one transaction. Open orders stay open.
    pub async fn halt_all(&self, _confirmation: Confirmation<HaltAll>) -> TradingResult<HaltReport> {
        let running = Where::any()
            .add(strategies::Column::Active.eq(true))
            .add(strategies::Column::AutoExecuteEnabled.eq(true));

        let txn = self.db.begin().await?;
        let halted: Vec<String> = strategies::Entity::find()
            .select_only()
            .column(strategies::Column::Id)
            .filter(running.clone())
            .order_by_asc(strategies::Column::Id)
            .into_tuple()
            .all(&txn)
            .await?;

        strategies::Entity::update_many()
            .col_expr(strategies::Column::Active, Expr::value(false))
            .col_expr(strategies::Column::AutoExecuteEnabled, Expr::value(false))
            .col_expr(strategies::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(running)
            .exec(&txn)
            .await?;
        let bindings_deactivated = UniverseBinder::deactivate_bindings_in(&txn, &halted).await?;
        txn.commit().await?;

        warn!("HALT ALL: {} strategies halted", halted.len());
        self.events.publish(TradingEvent::StrategiesHalted {
            strategy_ids: halted.clone(),
        });
        Ok(HaltReport {
            halted,
            bindings_deactivated,
        })
    }

    /// Tries to cancel every PENDING or PARTIAL order.
    pub async fn cancel_all_pending(
        &self,
        _confirmation: Confirmation<CancelAllPending>,
    ) -> TradingResult<BulkReport> {
        let open = self.orders.open_orders(None).await?;
        let mut report = BulkReport::new(BulkOperation::CancelAllPending);
        for order in open {
            let result = self.orders.cancel(&order.id).await.map(|_| true);
            if let Err(e) = &result {
                warn!("CANCEL ALL: order {} not cancelled: {}", order.id, e);
            }
            report.push(order.id, result);
        }
        info!(
            "CANCEL ALL: {}/{} orders cancelled",
            report.succeeded, report.attempted
        );
        Ok(report)
    }

    /// Market-sells every held position, less what open sell orders already cover.
    pub async fn liquidate_all(&self, _confirmation: Confirmation<LiquidateAll>) -> TradingResult<BulkReport> {
        let held = positions::Entity::find()
            .filter(positions::Column::Quantity.gt(0))
            .order_by_asc(positions::Column::StrategyId)
            .order_by_asc(positions::Column::StockCode)
            .all(self.db.as_ref())
            .await?;

        let mut report = BulkReport::new(BulkOperation::LiquidateAll);
        for position in held {
            let item_id = format!("{}:{}", position.strategy_id, position.stock_code);
            let quantity = match self
                .orders
                .sellable_quantity(&position.strategy_id, &position.stock_code)
                .await
            {
                Ok(0) => {
                    info!("LIQUIDATE ALL: {} is already fully on sale", item_id);
                    continue;
                }
                Ok(quantity) => quantity,
                Err(e) => {
                    report.push(item_id, Err(e));
                    continue;
                }
            };
            let request = OrderRequest::market(&position.strategy_id, &position.stock_code, Side::Sell, quantity);
            let result = match self.orders.place(request).await {
                Ok(PlacementOutcome::Placed(_)) => Ok(true),
                Ok(PlacementOutcome::Unknown(order)) => {
                    warn!("LIQUIDATE ALL: sell order {} outcome unknown", order.id);
                    Ok(false)
                }
                Err(e) => {
                    error!("LIQUIDATE ALL: {} not sold: {}", item_id, e);
                    Err(e)
                }
            };
            report.push(item_id, result);
        }
        info!(
            "LIQUIDATE ALL: {}/{} positions sold",
            report.succeeded, report.attempted
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_requires_exact_phrase() {
        assert!(Confirmation::<HaltAll>::parse("HALT ALL").is_ok());
        assert!(Confirmation::<HaltAll>::parse("  HALT ALL ").is_ok());
        assert!(matches!(
            Confirmation::<HaltAll>::parse("halt all"),
            Err(TradingError::ConfirmationMismatch { operation: "halt_all" })
        ));
        assert!(Confirmation::<LiquidateAll>::parse("CANCEL ALL").is_err());
        assert!(Confirmation::<CancelAllPending>::parse("CANCEL ALL").is_ok());
    }

    #[test]
    fn test_bulk_report_counts_unknown_as_failed() {
        let mut report = BulkReport::new(BulkOperation::CancelAllPending);
        report.push("a".to_string(), Ok(true));
        report.push("b".to_string(), Err(TradingError::BrokerTimeout("cancel_order".to_string())));
        report.push("c".to_string(), Err(TradingError::BrokerRejected("no".to_string())));

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.items[1].outcome, ItemOutcome::Unknown);
        assert_eq!(report.items[2].outcome, ItemOutcome::Failed);
        assert_eq!(report.succeeded + report.failed, report.attempted);
    }
}
