//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;
use serde::Serialize;

use crate::models::{OrderStatus, OrderType, Side, TradingMode};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String, // also sent to the broker as the client order id
    pub strategy_id: String,
    pub user_id: i64,
    pub trading_mode: TradingMode,
    pub stock_code: String,
    pub side: Side,
    pub order_type: OrderType,
    pub requested_price: i64, // limit price, or the reference quote of a market order
    pub requested_quantity: i64,
    pub status: OrderStatus,
    pub executed_price: Option<f64>, // volume weighted average over all fills
    pub executed_quantity: i64,
    pub reserved_amount: i64, // capital still reserved for the unfilled remainder
    pub broker_order_ref: Option<String>,
    pub outcome_unknown: bool, // placement timed out, broker state not yet known
    pub signal_id: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn remaining_quantity(&self) -> i64 {
        self.requested_quantity - self.executed_quantity
    }
}
