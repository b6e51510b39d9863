pub use sea_orm_migration::prelude::*;

mod m20251201_000001_create_strategy_tables;
mod m20251201_000002_create_execution_tables;
mod m20251201_000003_create_ledger_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251201_000001_create_strategy_tables::Migration),
            Box::new(m20251201_000002_create_execution_tables::Migration),
            Box::new(m20251201_000003_create_ledger_tables::Migration),
        ]
    }
}
