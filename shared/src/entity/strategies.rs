//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;
use serde::Serialize;

use crate::models::TradingMode;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "strategies")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: i64,
    pub name: String,
    pub trading_mode: TradingMode,
    #[sea_orm(column_type = "Text", nullable)]
    pub entry_conditions: Option<String>, // JSON encoded Condition tree
    #[sea_orm(column_type = "Text", nullable)]
    pub exit_conditions: Option<String>,
    pub position_size_percent: f64, // share of totalAllocated spent per BUY, 0-100
    pub auto_execute_enabled: bool,
    pub active: bool,
    pub allocated_capital: i64, // KRW
    pub allocated_percent: f64, // 0-100 of account cash at allocation time
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
