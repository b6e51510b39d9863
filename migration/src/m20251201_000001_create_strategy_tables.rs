use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Strategies::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Strategies::Id).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(Strategies::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Strategies::Name).string().not_null())
                    .col(ColumnDef::new(Strategies::TradingMode).string_len(8).not_null()) // "test" or "live"
                    .col(ColumnDef::new(Strategies::EntryConditions).text().null())
                    .col(ColumnDef::new(Strategies::ExitConditions).text().null())
                    .col(ColumnDef::new(Strategies::PositionSizePercent).double().not_null().default(10.0))
                    .col(ColumnDef::new(Strategies::AutoExecuteEnabled).boolean().not_null().default(false))
                    .col(ColumnDef::new(Strategies::Active).boolean().not_null().default(false))
                    .col(ColumnDef::new(Strategies::AllocatedCapital).big_integer().not_null().default(0))
                    .col(ColumnDef::new(Strategies::AllocatedPercent).double().not_null().default(0.0))
                    .col(ColumnDef::new(Strategies::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Strategies::UpdatedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_strategies_active_auto")
                    .table(Strategies::Table)
                    .col(Strategies::Active)
                    .col(Strategies::AutoExecuteEnabled)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(InvestmentUniverses::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(InvestmentUniverses::Id).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(InvestmentUniverses::Name).string().not_null())
                    .col(ColumnDef::new(InvestmentUniverses::Active).boolean().not_null().default(true))
                    .col(ColumnDef::new(InvestmentUniverses::CreatedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UniverseMembers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UniverseMembers::UniverseId).string_len(64).not_null())
                    .col(ColumnDef::new(UniverseMembers::StockCode).string_len(16).not_null())
                    .primary_key(
                        Index::create()
                            .col(UniverseMembers::UniverseId)
                            .col(UniverseMembers::StockCode),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_universe_members_universe")
                            .from(UniverseMembers::Table, UniverseMembers::UniverseId)
                            .to(InvestmentUniverses::Table, InvestmentUniverses::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StrategyUniverseBindings::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(StrategyUniverseBindings::StrategyId).string_len(64).not_null())
                    .col(ColumnDef::new(StrategyUniverseBindings::UniverseId).string_len(64).not_null())
                    .col(ColumnDef::new(StrategyUniverseBindings::Active).boolean().not_null().default(false))
                    .col(ColumnDef::new(StrategyUniverseBindings::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(StrategyUniverseBindings::UpdatedAt).timestamp_with_time_zone().not_null())
                    .primary_key(
                        Index::create()
                            .col(StrategyUniverseBindings::StrategyId)
                            .col(StrategyUniverseBindings::UniverseId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bindings_strategy")
                            .from(StrategyUniverseBindings::Table, StrategyUniverseBindings::StrategyId)
                            .to(Strategies::Table, Strategies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bindings_universe")
                            .from(StrategyUniverseBindings::Table, StrategyUniverseBindings::UniverseId)
                            .to(InvestmentUniverses::Table, InvestmentUniverses::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StrategyUniverseBindings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UniverseMembers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(InvestmentUniverses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Strategies::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Strategies {
    Table,
    Id,
    UserId,
    Name,
    TradingMode,
    EntryConditions,
    ExitConditions,
    PositionSizePercent,
    AutoExecuteEnabled,
    Active,
    AllocatedCapital,
    AllocatedPercent,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum InvestmentUniverses {
    Table,
    Id,
    Name,
    Active,
    CreatedAt,
}

#[derive(DeriveIden)]
enum UniverseMembers {
    Table,
    UniverseId,
    StockCode,
}

#[derive(DeriveIden)]
enum StrategyUniverseBindings {
    Table,
    StrategyId,
    UniverseId,
    Active,
    CreatedAt,
    UpdatedAt,
}
