use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CapitalAllocations::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CapitalAllocations::StrategyId).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(CapitalAllocations::TotalAllocated).big_integer().not_null())
                    .col(ColumnDef::new(CapitalAllocations::InUse).big_integer().not_null().default(0))
                    .col(ColumnDef::new(CapitalAllocations::Available).big_integer().not_null())
                    .col(ColumnDef::new(CapitalAllocations::Version).big_integer().not_null().default(0))
                    .col(ColumnDef::new(CapitalAllocations::UpdatedAt).timestamp_with_time_zone().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_capital_allocations_strategy")
                            .from(CapitalAllocations::Table, CapitalAllocations::StrategyId)
                            .to(Strategies::Table, Strategies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CredentialSets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CredentialSets::Id).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(CredentialSets::UserId).big_integer().not_null())
                    .col(ColumnDef::new(CredentialSets::Provider).string_len(32).not_null())
                    .col(ColumnDef::new(CredentialSets::Mode).string_len(8).not_null()) // "test" or "live"
                    .col(ColumnDef::new(CredentialSets::AppKey).text().not_null())
                    .col(ColumnDef::new(CredentialSets::AppSecret).text().not_null())
                    .col(ColumnDef::new(CredentialSets::AccountNo).string_len(32).not_null())
                    .col(ColumnDef::new(CredentialSets::Active).boolean().not_null().default(true))
                    .col(ColumnDef::new(CredentialSets::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(CredentialSets::UpdatedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        // One credential set per (user, provider, mode)
        manager
            .create_index(
                Index::create()
                    .name("idx_credential_sets_user_provider_mode")
                    .table(CredentialSets::Table)
                    .col(CredentialSets::UserId)
                    .col(CredentialSets::Provider)
                    .col(CredentialSets::Mode)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CredentialSets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CapitalAllocations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CapitalAllocations {
    Table,
    StrategyId,
    TotalAllocated,
    InUse,
    Available,
    Version,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CredentialSets {
    Table,
    Id,
    UserId,
    Provider,
    Mode,
    AppKey,
    AppSecret,
    AccountNo,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Strategies {
    Table,
    Id,
}
