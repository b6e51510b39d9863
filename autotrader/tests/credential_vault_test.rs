mod common;

use std::sync::Arc;

use autotrader::broker::{PaperBroker, PaperConnector};
use autotrader::control::NewStrategy;
use autotrader::services::{AllocationRequest, NewCredential, OrderRequest};
use autotrader::{TradingControl, TradingError, TradingServices};
use common::settings;
use migration::{Migrator, MigratorTrait};
use sea_orm::{EntityTrait, PaginatorTrait};
use shared::entity::orders;
use shared::{get_db_connection, Side, TradingMode};

struct Vault {
    control: TradingControl,
    services: TradingServices,
    test_broker: Arc<PaperBroker>,
}

/// A genuine test account, plus a live slot wired to a broker that answers as test mode.
async fn vault() -> Vault {
    let db = get_db_connection("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let test_broker = Arc::new(PaperBroker::new(TradingMode::Test, 10_000_000));
    test_broker.set_price("005930", 10_000);
    let miswired = Arc::new(PaperBroker::new(TradingMode::Test, 10_000_000));
    let connector = PaperConnector::new()
        .with_broker(TradingMode::Test, test_broker.clone())
        .with_broker(TradingMode::Live, miswired);
    let services = TradingServices::new(db, Arc::new(connector), settings());
    Vault {
        control: TradingControl::new(services.clone()),
        services,
        test_broker,
    }
}

fn credential(user_id: i64, provider: &str, mode: TradingMode, active: bool) -> NewCredential {
    NewCredential {
        user_id,
        provider: provider.to_string(),
        mode,
        app_key: format!("{}-key", provider),
        app_secret: format!("{}-secret", provider),
        account_no: "11112222-01".to_string(),
        active,
    }
}

#[tokio::test]
async fn test_resolve_requires_exactly_one_active_set() {
    let v = vault().await;
    let vault = &v.services.vault;

    assert!(matches!(
        vault.resolve(5, TradingMode::Test).await,
        Err(TradingError::Credential(_))
    ));

    vault.register(credential(5, "paper", TradingMode::Test, true)).await.unwrap();
    let session = vault.resolve(5, TradingMode::Test).await.unwrap();
    assert_eq!(session.mode(), TradingMode::Test);
    assert_eq!(session.user_id(), 5);

    // A second active set for the same user and mode is ambiguous.
    vault.register(credential(5, "kis", TradingMode::Test, true)).await.unwrap();
    let err = vault.resolve(5, TradingMode::Test).await.unwrap_err();
    assert!(matches!(err, TradingError::Credential(ref msg) if msg.contains("2 active")));

    vault.register(credential(5, "kis", TradingMode::Test, false)).await.unwrap();
    assert!(vault.resolve(5, TradingMode::Test).await.is_ok());

    // Another user's sets never leak across.
    assert!(matches!(
        vault.resolve(6, TradingMode::Test).await,
        Err(TradingError::Credential(_))
    ));
}

#[tokio::test]
async fn test_session_answering_in_other_mode_is_refused() {
    let v = vault().await;
    v.services
        .vault
        .register(credential(5, "paper", TradingMode::Live, true))
        .await
        .unwrap();

    let err = v.services.vault.resolve(5, TradingMode::Live).await.unwrap_err();
    assert!(matches!(
        err,
        TradingError::ModeMismatch {
            requested: TradingMode::Live,
            actual: TradingMode::Test,
        }
    ));
    // The refusal is not cached as a usable session.
    assert!(v.services.vault.resolve(5, TradingMode::Live).await.is_err());
}

#[tokio::test]
async fn test_live_strategy_never_trades_on_test_credentials() {
    let v = vault().await;
    v.services
        .vault
        .register(credential(5, "paper", TradingMode::Test, true))
        .await
        .unwrap();
    let strategy = v
        .control
        .create_strategy(NewStrategy {
            user_id: 5,
            name: "live only".to_string(),
            trading_mode: TradingMode::Live,
            entry_conditions: None,
            exit_conditions: None,
            position_size_percent: 30.0,
        })
        .await
        .unwrap();

    assert!(matches!(
        v.control
            .allocate_capital(&strategy.id, AllocationRequest::Amount(1_000_000))
            .await,
        Err(TradingError::Credential(_))
    ));
    assert!(matches!(
        v.services
            .orders
            .place(OrderRequest::limit(&strategy.id, "005930", Side::Buy, 1, 10_000))
            .await,
        Err(TradingError::Credential(_))
    ));

    assert_eq!(orders::Entity::find().count(v.services.db.as_ref()).await.unwrap(), 0);
    assert_eq!(v.test_broker.placed_count(), 0);
    // The test session itself still works.
    assert!(v.services.vault.resolve(5, TradingMode::Test).await.is_ok());
}
