//! Evaluates a strategy's entry/exit rules against live quotes and appends
//! the resulting signals to the signal table.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use shared::entity::{orders, positions, strategies, trading_signals};
use shared::{OrderStatus, SignalType};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TradingResult;
use crate::services::condition::{Condition, MarketContext};
use crate::services::credential_vault::CredentialVault;

pub struct SignalGenerator {
    db: Arc<DatabaseConnection>,
    vault: Arc<CredentialVault>,
}

impl SignalGenerator {
    pub fn new(db: Arc<DatabaseConnection>, vault: Arc<CredentialVault>) -> Self {
        Self { db, vault }
    }

    pub async fn generate(
        &self,
        strategy: &strategies::Model,
        stocks: &BTreeSet<String>,
    ) -> TradingResult<Vec<trading_signals::Model>> {
        let entry = parse_rule(strategy, "entry", strategy.entry_conditions.as_deref());
        let exit = parse_rule(strategy, "exit", strategy.exit_conditions.as_deref());
        if stocks.is_empty() || (entry.is_none() && exit.is_none()) {
            return Ok(Vec::new());
        }

        let held: HashMap<String, positions::Model> = positions::Entity::find()
            .filter(positions::Column::StrategyId.eq(strategy.id.as_str()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|p| (p.stock_code.clone(), p))
            .collect();
        let busy: HashSet<String> = orders::Entity::find()
            .filter(orders::Column::StrategyId.eq(strategy.id.as_str()))
            .filter(orders::Column::Status.is_in(OrderStatus::OPEN))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|o| o.stock_code)
            .collect();

        let candidates: Vec<&String> = stocks.iter().filter(|code| !busy.contains(*code)).collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let session = self.vault.resolve(strategy.user_id, strategy.trading_mode).await?;
        let quotes = join_all(candidates.iter().map(|code| session.get_current_price(code))).await;

        let mut generated = Vec::new();
        for (code, quote) in candidates.into_iter().zip(quotes) {
            let quote = match quote {
                Ok(quote) => quote,
                Err(e) => {
                    warn!("No quote for {} (strategy {}): {}", code, strategy.id, e);
                    continue;
                }
            };
            let position = held.get(code);
            let ctx = MarketContext {
                price: quote.price as f64,
                change_rate: quote.change_rate,
                volume: quote.volume as f64,
                average_price: position.map(|p| p.average_price),
                held_quantity: position.map(|p| p.quantity).unwrap_or(0),
            };

            let (rule, signal_type) = match position {
                Some(_) => (exit.as_ref(), SignalType::Sell),
                None => (entry.as_ref(), SignalType::Buy),
            };
            let Some(rule) = rule else { continue };
            match rule.evaluate(&ctx) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!("Rule for {} not evaluable (strategy {}): {}", code, strategy.id, e);
                    continue;
                }
            }

            let signal = trading_signals::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                strategy_id: Set(strategy.id.clone()),
                stock_code: Set(code.clone()),
                signal_type: Set(signal_type),
                strength: Set(100),
                generated_at: Set(Utc::now()),
            }
            .insert(self.db.as_ref())
            .await?;
            generated.push(signal);
        }

        if !generated.is_empty() {
            info!(
                "Strategy {} generated {} signals over {} stocks",
                strategy.id,
                generated.len(),
                stocks.len()
            );
        }
        Ok(generated)
    }
}

/// A malformed rule disables that side of the strategy rather than failing the pass.
fn parse_rule(strategy: &strategies::Model, which: &str, raw: Option<&str>) -> Option<Condition> {
    let raw = raw.filter(|r| !r.trim().is_empty())?;
    match Condition::parse(raw) {
        Ok(rule) => Some(rule),
        Err(e) => {
            warn!("Strategy {} has an unusable {} rule: {}", strategy.id, which, e);
            None
        }
    }
}
