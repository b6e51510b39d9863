//! `SeaORM` Entity, @generated manually
//!
//! A row exists only while quantity is positive.

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "positions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub strategy_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub stock_code: String,
    pub quantity: i64,
    pub average_price: f64,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
