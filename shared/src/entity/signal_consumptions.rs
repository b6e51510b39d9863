//! `SeaORM` Entity, @generated manually
//!
//! One row per ingested signal id; the primary key is what makes ingestion idempotent.

use sea_orm::entity::prelude::*;
use serde::Serialize;

use crate::models::ConsumptionOutcome;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "signal_consumptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub signal_id: String,
    pub strategy_id: String,
    pub outcome: ConsumptionOutcome,
    pub order_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub detail: Option<String>,
    pub consumed_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
