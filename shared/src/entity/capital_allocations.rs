//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "capital_allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub strategy_id: String,
    pub total_allocated: i64, // always in_use + available
    pub in_use: i64,
    pub available: i64,
    pub version: i64, // bumped on every write, compared before writing
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
