use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use shared::entity::{investment_universes, strategies, strategy_universe_bindings, universe_members};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{TradingError, TradingResult};

pub struct UniverseBinder {
    db: Arc<DatabaseConnection>,
}

impl UniverseBinder {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a universe whose member list is fixed from here on.
    pub async fn create_universe(
        &self,
        name: &str,
        stock_codes: &[String],
    ) -> TradingResult<investment_universes::Model> {
        let members: BTreeSet<&str> = stock_codes
            .iter()
            .map(|code| code.trim())
            .filter(|code| !code.is_empty())
            .collect();

        let txn = self.db.begin().await?;
        let universe = investment_universes::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            name: Set(name.to_string()),
            active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        if !members.is_empty() {
            universe_members::Entity::insert_many(members.iter().map(|code| {
                universe_members::ActiveModel {
                    universe_id: Set(universe.id.clone()),
                    stock_code: Set(code.to_string()),
                }
            }))
            .exec_without_returning(&txn)
            .await?;
        }
        txn.commit().await?;

        info!(
            "Created universe {} ({}) with {} stocks",
            universe.name,
            universe.id,
            members.len()
        );
        Ok(universe)
    }

    pub async fn bind(
        &self,
        strategy_id: &str,
        universe_id: &str,
    ) -> TradingResult<strategy_universe_bindings::Model> {
        let txn = self.db.begin().await?;
        let binding = Self::bind_in(&txn, strategy_id, universe_id).await?;
        txn.commit().await?;
        Ok(binding)
    }

    /// Upserts the binding. It is active only when both ends are active.
    pub async fn bind_in<C: ConnectionTrait>(
        conn: &C,
        strategy_id: &str,
        universe_id: &str,
    ) -> TradingResult<strategy_universe_bindings::Model> {
        let strategy = strategies::Entity::find_by_id(strategy_id.to_string())
            .one(conn)
            .await?
            .ok_or_else(|| TradingError::not_found("strategy", strategy_id))?;
        let universe = investment_universes::Entity::find_by_id(universe_id.to_string())
            .one(conn)
            .await?
            .ok_or_else(|| TradingError::not_found("universe", universe_id))?;
        let active = strategy.active && universe.active;
        let now = Utc::now();

        let existing = strategy_universe_bindings::Entity::find_by_id((
            strategy_id.to_string(),
            universe_id.to_string(),
        ))
        .one(conn)
        .await?;

        let binding = match existing {
            Some(binding) => {
                let mut binding: strategy_universe_bindings::ActiveModel = binding.into();
                binding.active = Set(active);
                binding.updated_at = Set(now);
                binding.update(conn).await?
            }
            None => {
                strategy_universe_bindings::ActiveModel {
                    strategy_id: Set(strategy_id.to_string()),
                    universe_id: Set(universe_id.to_string()),
                    active: Set(active),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(conn)
                .await?
            }
        };
        debug!(
            "Bound strategy {} to universe {} (active: {})",
            strategy_id, universe_id, active
        );
        Ok(binding)
    }

    /// Returns whether a binding existed.
    pub async fn unbind(&self, strategy_id: &str, universe_id: &str) -> TradingResult<bool> {
        let result = strategy_universe_bindings::Entity::delete_by_id((
            strategy_id.to_string(),
            universe_id.to_string(),
        ))
        .exec(self.db.as_ref())
        .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn resolve_active_stocks(&self, strategy_id: &str) -> TradingResult<BTreeSet<String>> {
        Self::resolve_active_stocks_in(self.db.as_ref(), strategy_id).await
    }

    /// Union of member codes over active bindings to active universes. Empty is a valid answer.
    pub async fn resolve_active_stocks_in<C: ConnectionTrait>(
        conn: &C,
        strategy_id: &str,
    ) -> TradingResult<BTreeSet<String>> {
        let bound: Vec<String> = strategy_universe_bindings::Entity::find()
            .select_only()
            .column(strategy_universe_bindings::Column::UniverseId)
            .filter(strategy_universe_bindings::Column::StrategyId.eq(strategy_id))
            .filter(strategy_universe_bindings::Column::Active.eq(true))
            .into_tuple()
            .all(conn)
            .await?;
        if bound.is_empty() {
            return Ok(BTreeSet::new());
        }

        let live: Vec<String> = investment_universes::Entity::find()
            .select_only()
            .column(investment_universes::Column::Id)
            .filter(investment_universes::Column::Id.is_in(bound))
            .filter(investment_universes::Column::Active.eq(true))
            .into_tuple()
            .all(conn)
            .await?;
        if live.is_empty() {
            return Ok(BTreeSet::new());
        }

        let codes: Vec<String> = universe_members::Entity::find()
            .select_only()
            .column(universe_members::Column::StockCode)
            .filter(universe_members::Column::UniverseId.is_in(live))
            .into_tuple()
            .all(conn)
            .await?;
        Ok(codes.into_iter().collect())
    }

    /// Deactivating a universe also deactivates every binding that points at it.
    pub async fn set_universe_active(
        &self,
        universe_id: &str,
        active: bool,
    ) -> TradingResult<investment_universes::Model> {
        let txn = self.db.begin().await?;
        let universe = investment_universes::Entity::find_by_id(universe_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| TradingError::not_found("universe", universe_id))?;

        let mut model: investment_universes::ActiveModel = universe.into();
        model.active = Set(active);
        let universe = model.update(&txn).await?;

        if !active {
            let result = strategy_universe_bindings::Entity::update_many()
                .col_expr(strategy_universe_bindings::Column::Active, Expr::value(false))
                .col_expr(strategy_universe_bindings::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(strategy_universe_bindings::Column::UniverseId.eq(universe_id))
                .filter(strategy_universe_bindings::Column::Active.eq(true))
                .exec(&txn)
                .await?;
            info!(
                "Universe {} deactivated, {} bindings switched off",
                universe_id, result.rows_affected
            );
        }
        txn.commit().await?;
        Ok(universe)
    }

    /// Switches off every binding of the given strategies.
    pub async fn deactivate_bindings_in<C: ConnectionTrait>(
        conn: &C,
        strategy_ids: &[String],
    ) -> TradingResult<u64> {
        if strategy_ids.is_empty() {
            return Ok(0);
        }
        let result = strategy_universe_bindings::Entity::update_many()
            .col_expr(strategy_universe_bindings::Column::Active, Expr::value(false))
            .col_expr(strategy_universe_bindings::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(strategy_universe_bindings::Column::StrategyId.is_in(strategy_ids.iter().cloned()))
            .filter(strategy_universe_bindings::Column::Active.eq(true))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Re-evaluates every existing binding of an (now active) strategy.
    pub async fn refresh_bindings_in<C: ConnectionTrait>(
        conn: &C,
        strategy_id: &str,
    ) -> TradingResult<Vec<strategy_universe_bindings::Model>> {
        let universe_ids: Vec<String> = strategy_universe_bindings::Entity::find()
            .select_only()
            .column(strategy_universe_bindings::Column::UniverseId)
            .filter(strategy_universe_bindings::Column::StrategyId.eq(strategy_id))
            .into_tuple()
            .all(conn)
            .await?;

        let mut bindings = Vec::with_capacity(universe_ids.len());
        for universe_id in universe_ids {
            bindings.push(Self::bind_in(conn, strategy_id, &universe_id).await?);
        }
        Ok(bindings)
    }
}
