//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

use crate::models::TradingMode;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "credential_sets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: i64,
    pub provider: String,
    pub mode: TradingMode,
    #[sea_orm(column_type = "Text")]
    pub app_key: String,
    #[sea_orm(column_type = "Text")]
    pub app_secret: String,
    pub account_no: String,
    pub active: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
