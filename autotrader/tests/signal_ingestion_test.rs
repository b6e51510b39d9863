mod common;

use autotrader::broker::FillPolicy;
use autotrader::control::NewSignal;
use autotrader::services::{IngestOutcome, OrderRequest};
use autotrader::TradingError;
use chrono::Utc;
use common::*;
use sea_orm::{EntityTrait, Set};
use shared::entity::signal_consumptions;
use shared::{ConsumptionOutcome, Side, SignalType};

fn signal(id: &str, strategy_id: &str, stock: &str, signal_type: SignalType) -> NewSignal {
    NewSignal {
        id: Some(id.to_string()),
        strategy_id: strategy_id.to_string(),
        stock_code: stock.to_string(),
        signal_type,
        strength: 70,
        generated_at: None,
    }
}

#[tokio::test]
async fn test_same_signal_twice_places_one_order() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    let (strategy, _) = running_strategy(&h, StrategySetup::new("dedup", &["005930"])).await;

    let first = h
        .control
        .submit_signal(signal("sig-1", &strategy.id, "005930", SignalType::Buy))
        .await
        .unwrap();
    assert!(matches!(first.outcome, IngestOutcome::Accepted { outcome_unknown: false, .. }));

    let second = h
        .control
        .submit_signal(signal("sig-1", &strategy.id, "005930", SignalType::Buy))
        .await
        .unwrap();
    assert_eq!(second.outcome, IngestOutcome::DuplicateIgnored);

    assert_eq!(order_count(&h).await, 1);
    assert_eq!(h.broker.placed_count(), 1);
    assert!(h.services.ingester.pending_signals(&strategy.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stock_outside_active_universes_is_out_of_scope() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_price("000660", 120_000);
    let (strategy, universe_id) = running_strategy(&h, StrategySetup::new("scope", &["005930"])).await;

    let receipt = h
        .control
        .submit_signal(signal("sig-scope", &strategy.id, "000660", SignalType::Buy))
        .await
        .unwrap();
    assert_eq!(receipt.outcome, IngestOutcome::OutOfScope);

    // A deactivated universe takes its stocks out of scope too.
    h.control.set_universe_active(&universe_id, false).await.unwrap();
    let receipt = h
        .control
        .submit_signal(signal("sig-inactive", &strategy.id, "005930", SignalType::Buy))
        .await
        .unwrap();
    assert_eq!(receipt.outcome, IngestOutcome::OutOfScope);
    assert_eq!(order_count(&h).await, 0);

    let marker = signal_consumptions::Entity::find_by_id("sig-scope".to_string())
        .one(h.services.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(marker.outcome, ConsumptionOutcome::OutOfScope);
}

#[tokio::test]
async fn test_hold_and_zero_sized_signals_are_skipped() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_price("207940", 900_000);
    let (strategy, _) = running_strategy(&h, StrategySetup::new("skip", &["005930", "207940"])).await;

    let hold = submit(&h, &strategy.id, "005930", SignalType::Hold).await;
    assert!(matches!(hold, IngestOutcome::Skipped { .. }));

    // 30% of 1,000,000 buys no share at 900,000.
    let too_expensive = submit(&h, &strategy.id, "207940", SignalType::Buy).await;
    assert!(matches!(too_expensive, IngestOutcome::Skipped { .. }));

    // Nothing held, nothing to sell.
    let nothing_to_sell = submit(&h, &strategy.id, "005930", SignalType::Sell).await;
    assert!(matches!(nothing_to_sell, IngestOutcome::Skipped { .. }));

    assert_eq!(order_count(&h).await, 0);
}

#[tokio::test]
async fn test_insufficient_capital_is_surfaced_and_recorded() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_price("000660", 10_000);
    h.broker.set_fill_policy(FillPolicy::Resting);
    let mut params = StrategySetup::new("starved", &["005930", "000660"]);
    params.position_size_percent = 80.0;
    let (strategy, _) = running_strategy(&h, params).await;

    submit(&h, &strategy.id, "005930", SignalType::Buy).await;
    let err = h
        .control
        .submit_signal(signal("sig-starved", &strategy.id, "000660", SignalType::Buy))
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::InsufficientCapital { .. }));
    assert!(err.is_operator_facing());

    let marker = signal_consumptions::Entity::find_by_id("sig-starved".to_string())
        .one(h.services.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(marker.outcome, ConsumptionOutcome::Rejected);
    assert!(marker.detail.unwrap().contains("insufficient capital"));

    // Re-delivery never turns into a second attempt.
    let again = h
        .control
        .submit_signal(signal("sig-starved", &strategy.id, "000660", SignalType::Buy))
        .await
        .unwrap();
    assert_eq!(again.outcome, IngestOutcome::DuplicateIgnored);
    assert_eq!(order_count(&h).await, 1);
}

#[tokio::test]
async fn test_stopped_strategy_no_longer_trades() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    let (strategy, _) = running_strategy(&h, StrategySetup::new("stopped", &["005930"])).await;

    let report = h.control.stop_auto_trading(&strategy.id).await.unwrap();
    assert!(!report.active && !report.auto_execute_enabled);
    assert_eq!(report.inactive_universes.len(), 1);

    let outcome = submit(&h, &strategy.id, "005930", SignalType::Buy).await;
    assert_eq!(outcome, IngestOutcome::OutOfScope);
    assert_eq!(order_count(&h).await, 0);
}

async fn leave_processing(h: &Harness, signal_id: &str, strategy_id: &str, claimed_at: chrono::DateTime<Utc>) {
    let marker = signal_consumptions::ActiveModel {
        signal_id: Set(signal_id.to_string()),
        strategy_id: Set(strategy_id.to_string()),
        outcome: Set(ConsumptionOutcome::Processing),
        order_id: Set(None),
        detail: Set(None),
        consumed_at: Set(claimed_at),
    };
    signal_consumptions::Entity::insert(marker)
        .exec_without_returning(h.services.db.as_ref())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unfinished_claims_are_recovered() {
    let h = setup().await;
    h.broker.set_price("005930", 10_000);
    h.broker.set_price("000660", 10_000);
    h.broker.set_price("035420", 10_000);
    h.broker.set_fill_policy(FillPolicy::Resting);
    let (strategy, _) =
        running_strategy(&h, StrategySetup::new("recover", &["005930", "000660", "035420"])).await;

    // An ingest that died after its order was stored.
    let placed = h
        .services
        .orders
        .place(OrderRequest {
            signal_id: Some("sig-placed".to_string()),
            ..OrderRequest::market(&strategy.id, "005930", Side::Buy, 5)
        })
        .await
        .unwrap();
    let long_ago = Utc::now() - chrono::Duration::hours(1);
    for (id, code) in [("sig-placed", "005930"), ("sig-lost", "000660"), ("sig-fresh", "035420")] {
        h.services
            .ingester
            .record(&stored_signal(id, &strategy.id, code, SignalType::Buy))
            .await
            .unwrap();
    }
    leave_processing(&h, "sig-placed", &strategy.id, long_ago).await;
    // An ingest that died before placing anything.
    leave_processing(&h, "sig-lost", &strategy.id, long_ago).await;
    // One that may still be running.
    leave_processing(&h, "sig-fresh", &strategy.id, Utc::now()).await;

    assert_eq!(h.services.ingester.recover_stale_claims(&strategy.id).await.unwrap(), 2);

    let recovered = consumption(&h, "sig-placed").await.unwrap();
    assert_eq!(recovered.outcome, ConsumptionOutcome::Accepted);
    assert_eq!(recovered.order_id.as_deref(), Some(placed.order().id.as_str()));
    assert!(consumption(&h, "sig-lost").await.is_none());
    assert_eq!(
        consumption(&h, "sig-fresh").await.unwrap().outcome,
        ConsumptionOutcome::Processing
    );
    let pending: Vec<_> = h
        .services
        .ingester
        .pending_signals(&strategy.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(pending, vec!["sig-lost".to_string()]);

    let report = h.control.tick().await.unwrap();
    assert_eq!(report.processed[0].accepted, 1);
    assert_eq!(consumption(&h, "sig-lost").await.unwrap().outcome, ConsumptionOutcome::Accepted);
    assert_eq!(order_count(&h).await, 2);
    assert_balanced(&capital(&h, &strategy.id).await);
}
