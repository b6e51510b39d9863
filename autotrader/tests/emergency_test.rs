mod common;

use autotrader::broker::FillPolicy;
use autotrader::services::{BulkOperation, ItemOutcome, OrderRequest, TradingEvent};
use autotrader::TradingError;
use common::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use shared::entity::{strategies, strategy_universe_bindings};
use shared::{OrderStatus, Side, SignalType};

#[tokio::test]
async fn test_halt_all_stops_every_strategy_before_next_tick() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_fill_policy(FillPolicy::Resting);
    let (first, _) = running_strategy(&h, StrategySetup::new("first", &["005930"])).await;
    let (second, _) = running_strategy(&h, StrategySetup::new("second", &["005930"])).await;
    let open = accepted_order(&h, &first.id, "005930", SignalType::Buy).await;
    let mut events = h.services.events.subscribe();

    let before = h.control.tick().await.unwrap();
    assert_eq!(before.processed.len(), 2);

    let report = h.control.halt_all("HALT ALL").await.unwrap();
    let mut expected = vec![first.id.clone(), second.id.clone()];
    expected.sort();
    assert_eq!(report.halted, expected);
    assert_eq!(report.bindings_deactivated, 2);

    let after = h.control.tick().await.unwrap();
    assert!(after.processed.is_empty());
    assert!(after.failed.is_empty());

    let still_running = strategies::Entity::find()
        .filter(strategies::Column::Active.eq(true))
        .all(h.services.db.as_ref())
        .await
        .unwrap();
    assert!(still_running.is_empty());
    let active_bindings = strategy_universe_bindings::Entity::find()
        .filter(strategy_universe_bindings::Column::Active.eq(true))
        .all(h.services.db.as_ref())
        .await
        .unwrap();
    assert!(active_bindings.is_empty());

    // Halting leaves working orders alone.
    assert_eq!(h.services.orders.get(&open.id).await.unwrap().status, OrderStatus::Pending);

    let mut saw_halt = false;
    while let Ok(event) = events.try_recv() {
        if let TradingEvent::StrategiesHalted { strategy_ids } = event {
            assert_eq!(strategy_ids.len(), 2);
            saw_halt = true;
        }
    }
    assert!(saw_halt);
}

#[tokio::test]
async fn test_wrong_phrase_changes_nothing() {
    let h = setup().await;
    let (strategy, _) = running_strategy(&h, StrategySetup::new("guarded", &["005930"])).await;

    for result in [
        h.control.halt_all("halt").await.map(|_| ()),
        h.control.cancel_all_pending("HALT ALL").await.map(|_| ()),
        h.control.liquidate_all("").await.map(|_| ()),
    ] {
        assert!(matches!(result, Err(TradingError::ConfirmationMismatch { .. })));
    }

    let row = strategies::Entity::find_by_id(strategy.id.clone())
        .one(h.services.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert!(row.active && row.auto_execute_enabled);
}

#[tokio::test]
async fn test_liquidate_all_continues_past_rejection() {
    let h = setup().await;
    for code in ["005930", "000660", "035420"] {
        h.broker.set_price(code, 10_000);
    }
    let (strategy, _) =
        running_strategy(&h, StrategySetup::new("liquidate", &["005930", "000660", "035420"])).await;
    for code in ["005930", "000660", "035420"] {
        accepted_order(&h, &strategy.id, code, SignalType::Buy).await;
        assert_eq!(position(&h, &strategy.id, code).await.unwrap().quantity, 30);
    }

    h.broker.reject_stock("000660");
    let report = h.control.liquidate_all("LIQUIDATE ALL").await.unwrap();

    assert_eq!(report.operation, BulkOperation::LiquidateAll);
    assert_eq!((report.attempted, report.succeeded, report.failed), (3, 2, 1));
    let failed: Vec<_> = report
        .items
        .iter()
        .filter(|item| item.outcome == ItemOutcome::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].item_id, format!("{}:000660", strategy.id));
    assert!(failed[0].error.is_some());

    assert!(position(&h, &strategy.id, "005930").await.is_none());
    assert!(position(&h, &strategy.id, "035420").await.is_none());
    assert_eq!(position(&h, &strategy.id, "000660").await.unwrap().quantity, 30);

    let after = capital(&h, &strategy.id).await;
    assert_eq!((after.total_allocated, after.in_use, after.available), (700_000, 0, 700_000));
}

#[tokio::test]
async fn test_cancel_all_pending_is_best_effort() {
    let h = setup().await;
    for code in ["005930", "000660", "035420"] {
        h.broker.set_price(code, 10_000);
    }
    h.broker.set_fill_policy(FillPolicy::Resting);
    let (strategy, _) =
        running_strategy(&h, StrategySetup::new("cancel-all", &["005930", "000660", "035420"])).await;
    let mut open = Vec::new();
    for code in ["005930", "000660", "035420"] {
        open.push(accepted_order(&h, &strategy.id, code, SignalType::Buy).await);
    }
    assert_eq!(capital(&h, &strategy.id).await.in_use, 900_000);

    let stubborn = open[1].clone();
    h.broker.fail_cancel(stubborn.broker_order_ref.as_deref().unwrap());

    let report = h.control.cancel_all_pending("CANCEL ALL").await.unwrap();
    assert_eq!((report.attempted, report.succeeded, report.failed), (3, 2, 1));
    assert_eq!(report.succeeded + report.failed, report.attempted);

    let stubborn_item = report.items.iter().find(|i| i.item_id == stubborn.id).unwrap();
    assert_eq!(stubborn_item.outcome, ItemOutcome::Failed);

    assert_eq!(h.services.orders.get(&stubborn.id).await.unwrap().status, OrderStatus::Pending);
    for order in [&open[0], &open[2]] {
        assert_eq!(h.services.orders.get(&order.id).await.unwrap().status, OrderStatus::Cancelled);
    }
    let after = capital(&h, &strategy.id).await;
    assert_eq!((after.in_use, after.available), (300_000, 700_000));
    assert_balanced(&after);
}

#[tokio::test]
async fn test_liquidate_all_sells_only_what_is_not_already_on_sale() {
    let h = setup().await;
    for code in ["005930", "000660"] {
        h.broker.set_price(code, 10_000);
    }
    let (strategy, _) = running_strategy(&h, StrategySetup::new("half sold", &["005930", "000660"])).await;
    for code in ["005930", "000660"] {
        accepted_order(&h, &strategy.id, code, SignalType::Buy).await;
    }

    assert_eq!(position(&h, &strategy.id, "005930").await.unwrap().quantity, 30);
    let other_held = position(&h, &strategy.id, "000660").await.unwrap().quantity;

    h.broker.set_fill_policy(FillPolicy::Resting);
    let partly = h
        .services
        .orders
        .place(OrderRequest::limit(&strategy.id, "005930", Side::Sell, 10, 12_000))
        .await
        .unwrap();
    h.services
        .orders
        .place(OrderRequest::limit(&strategy.id, "000660", Side::Sell, other_held, 12_000))
        .await
        .unwrap();
    assert_eq!(h.services.orders.sellable_quantity(&strategy.id, "005930").await.unwrap(), 20);
    assert_eq!(h.services.orders.sellable_quantity(&strategy.id, "000660").await.unwrap(), 0);

    let report = h.control.liquidate_all("LIQUIDATE ALL").await.unwrap();
    assert_eq!((report.attempted, report.succeeded, report.failed), (1, 1, 0));
    assert_eq!(report.items[0].item_id, format!("{}:005930", strategy.id));

    let mut on_sale: Vec<_> = h
        .services
        .orders
        .open_orders(Some(&strategy.id))
        .await
        .unwrap()
        .into_iter()
        .filter(|o| o.side == Side::Sell && o.stock_code == "005930")
        .map(|o| (o.id == partly.order().id, o.requested_quantity))
        .collect();
    on_sale.sort();
    assert_eq!(on_sale, vec![(false, 20), (true, 10)]);
    assert_eq!(h.services.orders.sellable_quantity(&strategy.id, "005930").await.unwrap(), 0);
}
