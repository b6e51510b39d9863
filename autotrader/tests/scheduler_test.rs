mod common;

use std::time::Duration;

use autotrader::control::NewStrategy;
use autotrader::services::Condition;
use autotrader::EngineSettings;
use common::*;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use shared::entity::signal_consumptions;
use shared::{ConsumptionOutcome, OrderStatus, SignalType, TradingMode};

fn rule(json: &str) -> Condition {
    Condition::parse(json).unwrap()
}

fn cheap_entry() -> Condition {
    rule(r#"{"type": "comparison", "left": "price", "operator": "lt", "right": 20000}"#)
}

#[tokio::test]
async fn test_entry_rule_produces_buy_on_tick() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_price("000660", 150_000);
    let mut params = StrategySetup::new("entry", &["005930", "000660"]);
    params.entry = Some(cheap_entry());
    let (strategy, _) = running_strategy(&h, params).await;

    let report = h.control.tick().await.unwrap();
    assert_eq!(report.processed_ids(), vec![strategy.id.as_str()]);
    let pass = &report.processed[0];
    assert_eq!(pass.active_stocks, 2);
    assert_eq!(pass.signals_generated, 1);
    assert_eq!(pass.accepted, 1);
    assert!(pass.rejected.is_empty());

    assert_eq!(position(&h, &strategy.id, "005930").await.unwrap().quantity, 30);
    assert!(position(&h, &strategy.id, "000660").await.is_none());

    // Held now, and no exit rule: nothing more to do.
    let again = h.control.tick().await.unwrap();
    assert_eq!(again.processed[0].signals_generated, 0);
    assert_eq!(order_count(&h).await, 1);
}

#[tokio::test]
async fn test_exit_rule_sells_on_profit() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    let mut params = StrategySetup::new("exit", &["005930"]);
    params.entry = Some(cheap_entry());
    params.exit = Some(rule(
        r#"{"type": "comparison", "left": "profit_rate", "operator": "gte", "right": 10}"#,
    ));
    let (strategy, _) = running_strategy(&h, params).await;

    h.control.tick().await.unwrap();
    assert_eq!(position(&h, &strategy.id, "005930").await.unwrap().quantity, 30);

    // +5% is not enough.
    h.broker.set_price("005930", 10_500);
    let flat = h.control.tick().await.unwrap();
    assert_eq!(flat.processed[0].signals_generated, 0);

    h.broker.set_price("005930", 11_000);
    let sold = h.control.tick().await.unwrap();
    assert_eq!(sold.processed[0].accepted, 1);
    assert!(position(&h, &strategy.id, "005930").await.is_none());

    let after = capital(&h, &strategy.id).await;
    assert_eq!((after.total_allocated, after.in_use, after.available), (1_030_000, 0, 1_030_000));
}

#[tokio::test]
async fn test_failing_strategy_does_not_block_others() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);

    let mut healthy = StrategySetup::new("healthy", &["005930"]);
    healthy.entry = Some(cheap_entry());
    let (healthy, _) = running_strategy(&h, healthy).await;

    // No credentials are registered for this user.
    let mut orphan = StrategySetup::new("orphan", &["005930"]);
    orphan.user_id = 2;
    orphan.capital = 0;
    orphan.entry = Some(cheap_entry());
    let (orphan, _) = running_strategy(&h, orphan).await;

    let report = h.control.tick().await.unwrap();
    assert_eq!(report.processed_ids(), vec![healthy.id.as_str()]);
    assert_eq!(report.processed[0].accepted, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].strategy_id, orphan.id);
}

#[tokio::test]
async fn test_stopped_strategy_is_not_processed() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    let mut params = StrategySetup::new("paused", &["005930"]);
    params.entry = Some(cheap_entry());
    let (strategy, _) = running_strategy(&h, params).await;

    h.control.stop_auto_trading(&strategy.id).await.unwrap();
    let report = h.control.tick().await.unwrap();
    assert!(report.processed.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(order_count(&h).await, 0);
}

#[tokio::test]
async fn test_active_stocks_are_the_union_of_active_universes() {
    let h = setup().await;
    let strategy = h
        .control
        .create_strategy(NewStrategy {
            user_id: USER,
            name: "union".to_string(),
            trading_mode: TradingMode::Test,
            entry_conditions: None,
            exit_conditions: None,
            position_size_percent: 10.0,
        })
        .await
        .unwrap();
    let codes = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let large_caps = h
        .control
        .create_universe("large caps", &codes(&["005930", "000660"]))
        .await
        .unwrap();
    let chips = h
        .control
        .create_universe("chips", &codes(&["000660", "042700"]))
        .await
        .unwrap();

    let report = h
        .control
        .start_auto_trading(&strategy.id, &[large_caps.id.clone(), chips.id.clone()])
        .await
        .unwrap();
    assert_eq!(report.active_universes.len(), 2);
    assert_eq!(report.active_stocks, 3);

    h.control.set_universe_active(&chips.id, false).await.unwrap();
    let stocks = h.services.binder.resolve_active_stocks(&strategy.id).await.unwrap();
    assert_eq!(
        stocks.into_iter().collect::<Vec<_>>(),
        vec!["000660".to_string(), "005930".to_string()]
    );

    // No active binding left is an empty scope, not an error.
    assert!(h.services.binder.unbind(&strategy.id, &large_caps.id).await.unwrap());
    assert!(!h.services.binder.unbind(&strategy.id, &large_caps.id).await.unwrap());
    assert!(h.services.binder.resolve_active_stocks(&strategy.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_order_blocks_new_signal_for_same_stock() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_fill_policy(autotrader::broker::FillPolicy::Resting);
    let mut params = StrategySetup::new("busy", &["005930"]);
    params.entry = Some(cheap_entry());
    let (strategy, _) = running_strategy(&h, params).await;

    h.control.tick().await.unwrap();
    let second = h.control.tick().await.unwrap();
    assert_eq!(second.processed[0].sync.checked, 1);
    assert_eq!(second.processed[0].signals_generated, 0);

    let open = h.services.orders.open_orders(Some(&strategy.id)).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_pass_timeout_mid_placement_keeps_ledger_consistent() {
    // Two placements at 90ms each cannot fit in one 150ms pass.
    let h = setup_with(EngineSettings {
        strategy_tick_timeout: Duration::from_millis(150),
        ..settings()
    })
    .await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_price("000660", 10_000);
    let (strategy, _) = running_strategy(&h, StrategySetup::new("slow", &["005930", "000660"])).await;
    for (id, code) in [("slow-1", "005930"), ("slow-2", "000660")] {
        h.services
            .ingester
            .record(&stored_signal(id, &strategy.id, code, SignalType::Buy))
            .await
            .unwrap();
    }

    h.broker.set_latency(Some(Duration::from_millis(90)));
    let report = h.control.tick().await.unwrap();
    assert!(report.processed.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].strategy_id, strategy.id);

    // The interrupted ingest finishes on its own.
    let mut waited = Duration::ZERO;
    loop {
        let processing = signal_consumptions::Entity::find()
            .filter(signal_consumptions::Column::Outcome.eq(ConsumptionOutcome::Processing))
            .all(h.services.db.as_ref())
            .await
            .unwrap();
        if processing.is_empty() {
            break;
        }
        assert!(waited < Duration::from_secs(2), "claims stuck: {:?}", processing);
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    h.broker.set_latency(None);

    for id in ["slow-1", "slow-2"] {
        let marker = consumption(&h, id).await.unwrap();
        assert_eq!(marker.outcome, ConsumptionOutcome::Accepted);
        assert!(marker.order_id.is_some());
    }
    assert_eq!(order_count(&h).await, 2);
    assert_eq!(h.broker.placed_count(), 2);

    let open = h.services.orders.open_orders(Some(&strategy.id)).await.unwrap();
    let reserved: i64 = open.iter().map(|o| o.reserved_amount).sum();
    let after = capital(&h, &strategy.id).await;
    assert_eq!(after.in_use, reserved);
    assert_balanced(&after);
    assert!(position(&h, &strategy.id, "005930").await.is_some());
    assert!(position(&h, &strategy.id, "000660").await.is_some());

    let next = h.control.tick().await.unwrap();
    assert_eq!(next.processed_ids(), vec![strategy.id.as_str()]);
    assert_eq!(next.processed[0].accepted, 0);
    assert_eq!(next.processed[0].recovered_claims, 0);
    assert!(next.processed[0].sync.errors.is_empty());
}
