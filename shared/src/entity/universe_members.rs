//! `SeaORM` Entity, @generated manually
//!
//! Member stock codes are written once when the universe is created.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "universe_members")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub universe_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub stock_code: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
