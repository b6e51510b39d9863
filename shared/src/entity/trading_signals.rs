//! `SeaORM` Entity, @generated manually
//!
//! Append-only. Producers insert rows; the core never updates them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::SignalType;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trading_signals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub strategy_id: String,
    pub stock_code: String,
    pub signal_type: SignalType,
    pub strength: i32, // 0-100
    pub generated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
