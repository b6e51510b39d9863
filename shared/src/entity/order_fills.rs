//! `SeaORM` Entity, @generated manually
//!
//! Applied fill reports, keyed by (broker_order_ref, filled_at_ms).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "order_fills")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub broker_order_ref: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub filled_at_ms: i64,
    pub order_id: String,
    pub quantity: i64,
    pub price: i64,
    pub applied_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
