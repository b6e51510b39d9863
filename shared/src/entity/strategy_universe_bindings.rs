//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "strategy_universe_bindings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub strategy_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub universe_id: String,
    pub active: bool, // only true while both the strategy and the universe are active
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
