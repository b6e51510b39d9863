mod common;

use std::sync::Arc;

use autotrader::broker::{BrokerApi, FillPolicy};
use autotrader::services::{AllocationRequest, TradingEvent};
use autotrader::TradingError;
use common::*;
use shared::entity::strategies;
use shared::SignalType;
use sea_orm::EntityTrait;

#[tokio::test]
async fn test_buy_reserves_then_settles_on_fill() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_fill_policy(FillPolicy::Resting);
    let (strategy, _) = running_strategy(&h, StrategySetup::new("momentum", &["005930"])).await;

    let order = accepted_order(&h, &strategy.id, "005930", SignalType::Buy).await;
    assert_eq!(order.requested_quantity, 30);
    assert_eq!(order.reserved_amount, 300_000);

    let reserved = capital(&h, &strategy.id).await;
    assert_eq!((reserved.in_use, reserved.available), (300_000, 700_000));
    assert_balanced(&reserved);

    let broker_ref = order.broker_order_ref.clone().unwrap();
    let fill = h.broker.fill(&broker_ref, 30, 10_000).unwrap();
    h.control.reconcile_fill(fill).await.unwrap();

    let settled = capital(&h, &strategy.id).await;
    assert_eq!((settled.in_use, settled.available), (0, 700_000));
    assert_balanced(&settled);
    assert_eq!(position(&h, &strategy.id, "005930").await.unwrap().quantity, 30);

    let err = h.services.ledger.reserve(&strategy.id, 800_000).await.unwrap_err();
    assert!(matches!(
        err,
        TradingError::InsufficientCapital {
            requested: 800_000,
            available: 700_000,
            ..
        }
    ));
    let unchanged = capital(&h, &strategy.id).await;
    assert_eq!((unchanged.in_use, unchanged.available), (0, 700_000));
}

#[tokio::test]
async fn test_concurrent_reservations_never_overdraw() {
    let h = setup().await;
    let (strategy, _) = running_strategy(&h, StrategySetup::new("parallel", &["005930"])).await;
    let ledger = h.services.ledger.clone();

    let mut handles = Vec::new();
    for _ in 0..25 {
        let ledger = Arc::clone(&ledger);
        let id = strategy.id.clone();
        handles.push(tokio::spawn(async move { ledger.reserve(&id, 100_000).await }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            granted += 1;
        }
    }

    assert_eq!(granted, 10);
    let after = capital(&h, &strategy.id).await;
    assert_eq!((after.in_use, after.available), (1_000_000, 0));
    assert_balanced(&after);
}

#[tokio::test]
async fn test_release_beyond_in_use_is_refused() {
    let h = setup().await;
    let (strategy, _) = running_strategy(&h, StrategySetup::new("release", &["005930"])).await;

    h.services.ledger.reserve(&strategy.id, 200_000).await.unwrap();
    let err = h.services.ledger.release(&strategy.id, 200_001).await.unwrap_err();
    assert!(matches!(err, TradingError::OverRelease { .. }));

    let after = h.services.ledger.release(&strategy.id, 200_000).await.unwrap();
    assert_eq!((after.in_use, after.available), (0, 1_000_000));
}

#[tokio::test]
async fn test_allocate_by_percent_keeps_both_representations() {
    let h = setup().await;
    let (strategy, _) = running_strategy(&h, StrategySetup::new("percent", &["005930"])).await;

    let status = h
        .control
        .allocate_capital(&strategy.id, AllocationRequest::Percent(12.5))
        .await
        .unwrap();
    assert_eq!(status.total_allocated, 1_250_000);
    assert_eq!(status.allocated_percent, 12.5);

    let row = strategies::Entity::find_by_id(strategy.id.clone())
        .one(h.services.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.allocated_capital, 1_250_000);
    assert_eq!(row.allocated_percent, 12.5);

    let err = h
        .control
        .allocate_capital(&strategy.id, AllocationRequest::Percent(120.0))
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::InvalidAllocation(_)));
}

#[tokio::test]
async fn test_shrinking_below_in_use_is_invalid() {
    let h = setup().await;
    let (strategy, _) = running_strategy(&h, StrategySetup::new("shrink", &["005930"])).await;
    h.services.ledger.reserve(&strategy.id, 600_000).await.unwrap();

    let err = h
        .control
        .allocate_capital(&strategy.id, AllocationRequest::Amount(500_000))
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::InvalidAllocation(_)));
    assert_eq!(capital(&h, &strategy.id).await.total_allocated, 1_000_000);
}

#[tokio::test]
async fn test_slippage_deficit_raises_anomaly_and_blocks_buys() {
    let h = setup().await;
    h.broker.set_price("000660", 10_000);
    h.broker.set_slippage(100);
    let mut events = h.services.events.subscribe();
    let mut params = StrategySetup::new("all-in", &["000660"]);
    params.position_size_percent = 100.0;
    let (strategy, _) = running_strategy(&h, params).await;

    let order = accepted_order(&h, &strategy.id, "000660", SignalType::Buy).await;
    assert_eq!(order.requested_quantity, 100);
    assert_eq!(order.executed_price, Some(10_100.0));

    let after = capital(&h, &strategy.id).await;
    assert_eq!(after.available, -10_000);
    assert_balanced(&after);
    assert!(h.control.capital_status(&strategy.id).await.unwrap().anomaly);

    let mut saw_anomaly = false;
    while let Ok(event) = events.try_recv() {
        if let TradingEvent::CapitalAnomaly { available, .. } = event {
            assert_eq!(available, -10_000);
            saw_anomaly = true;
        }
    }
    assert!(saw_anomaly);

    let err = h.services.ledger.reserve(&strategy.id, 1).await.unwrap_err();
    assert!(matches!(err, TradingError::InsufficientCapital { .. }));

    // Selling the position restores a positive balance.
    h.broker.set_slippage(0);
    accepted_order(&h, &strategy.id, "000660", SignalType::Sell).await;
    let recovered = capital(&h, &strategy.id).await;
    assert_eq!(recovered.available, 990_000);
    assert_balanced(&recovered);
    assert!(h.broker.get_balance().await.unwrap().positions.is_empty());
}
