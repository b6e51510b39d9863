use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Signals are appended by producers and never updated
        manager
            .create_table(
                Table::create()
                    .table(TradingSignals::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TradingSignals::Id).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(TradingSignals::StrategyId).string_len(64).not_null())
                    .col(ColumnDef::new(TradingSignals::StockCode).string_len(16).not_null())
                    .col(ColumnDef::new(TradingSignals::SignalType).string_len(8).not_null()) // "buy", "sell", "hold"
                    .col(ColumnDef::new(TradingSignals::Strength).integer().not_null().default(0))
                    .col(ColumnDef::new(TradingSignals::GeneratedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_signals_strategy_generated")
                    .table(TradingSignals::Table)
                    .col(TradingSignals::StrategyId)
                    .col(TradingSignals::GeneratedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SignalConsumptions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SignalConsumptions::SignalId).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(SignalConsumptions::StrategyId).string_len(64).not_null())
                    .col(ColumnDef::new(SignalConsumptions::Outcome).string_len(16).not_null())
                    .col(ColumnDef::new(SignalConsumptions::OrderId).string_len(64).null())
                    .col(ColumnDef::new(SignalConsumptions::Detail).text().null())
                    .col(ColumnDef::new(SignalConsumptions::ConsumedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(Orders::StrategyId).string_len(64).not_null())
                    .col(ColumnDef::new(Orders::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Orders::TradingMode).string_len(8).not_null())
                    .col(ColumnDef::new(Orders::StockCode).string_len(16).not_null())
                    .col(ColumnDef::new(Orders::Side).string_len(8).not_null())
                    .col(ColumnDef::new(Orders::OrderType).string_len(8).not_null()) // "limit" or "market"
                    .col(ColumnDef::new(Orders::RequestedPrice).big_integer().not_null())
                    .col(ColumnDef::new(Orders::RequestedQuantity).big_integer().not_null())
                    .col(ColumnDef::new(Orders::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Orders::ExecutedPrice).double().null())
                    .col(ColumnDef::new(Orders::ExecutedQuantity).big_integer().not_null().default(0))
                    .col(ColumnDef::new(Orders::ReservedAmount).big_integer().not_null().default(0))
                    .col(ColumnDef::new(Orders::BrokerOrderRef).string_len(64).null())
                    .col(ColumnDef::new(Orders::OutcomeUnknown).boolean().not_null().default(false))
                    .col(ColumnDef::new(Orders::SignalId).string_len(64).null())
                    .col(ColumnDef::new(Orders::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Orders::UpdatedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_broker_ref")
                    .table(Orders::Table)
                    .col(Orders::BrokerOrderRef)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_strategy_status")
                    .table(Orders::Table)
                    .col(Orders::StrategyId)
                    .col(Orders::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderFills::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(OrderFills::BrokerOrderRef).string_len(64).not_null())
                    .col(ColumnDef::new(OrderFills::FilledAtMs).big_integer().not_null())
                    .col(ColumnDef::new(OrderFills::OrderId).string_len(64).not_null())
                    .col(ColumnDef::new(OrderFills::Quantity).big_integer().not_null())
                    .col(ColumnDef::new(OrderFills::Price).big_integer().not_null())
                    .col(ColumnDef::new(OrderFills::AppliedAt).timestamp_with_time_zone().not_null())
                    .primary_key(
                        Index::create()
                            .col(OrderFills::BrokerOrderRef)
                            .col(OrderFills::FilledAtMs),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_fills_order")
                            .from(OrderFills::Table, OrderFills::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Positions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Positions::StrategyId).string_len(64).not_null())
                    .col(ColumnDef::new(Positions::StockCode).string_len(16).not_null())
                    .col(ColumnDef::new(Positions::Quantity).big_integer().not_null())
                    .col(ColumnDef::new(Positions::AveragePrice).double().not_null())
                    .col(ColumnDef::new(Positions::UpdatedAt).timestamp_with_time_zone().not_null())
                    .primary_key(
                        Index::create()
                            .col(Positions::StrategyId)
                            .col(Positions::StockCode),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Positions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OrderFills::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SignalConsumptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TradingSignals::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TradingSignals {
    Table,
    Id,
    StrategyId,
    StockCode,
    SignalType,
    Strength,
    GeneratedAt,
}

#[derive(DeriveIden)]
enum SignalConsumptions {
    Table,
    SignalId,
    StrategyId,
    Outcome,
    OrderId,
    Detail,
    ConsumedAt,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    StrategyId,
    UserId,
    TradingMode,
    StockCode,
    Side,
    OrderType,
    RequestedPrice,
    RequestedQuantity,
    Status,
    ExecutedPrice,
    ExecutedQuantity,
    ReservedAmount,
    BrokerOrderRef,
    OutcomeUnknown,
    SignalId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OrderFills {
    Table,
    BrokerOrderRef,
    FilledAtMs,
    OrderId,
    Quantity,
    Price,
    AppliedAt,
}

#[derive(DeriveIden)]
enum Positions {
    Table,
    StrategyId,
    StockCode,
    Quantity,
    AveragePrice,
    UpdatedAt,
}
