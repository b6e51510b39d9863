//! Drives auto-trading strategies.
//!
//! Every strategy runs in its own task; one strategy timing out, failing or
//! panicking never holds up the others.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use shared::entity::strategies;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{TradingError, TradingResult};
use crate::services::order_manager::{OrderLifecycleManager, SyncReport};
use crate::services::signal_generator::SignalGenerator;
use crate::services::signal_ingester::{IngestOutcome, SignalIngester};
use crate::services::universe_binder::UniverseBinder;

/// What one pass over one strategy did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StrategyPass {
    pub strategy_id: String,
    pub active_stocks: usize,
    pub sync: SyncReport,
    /// Unfinished signal claims settled at the start of the pass.
    pub recovered_claims: usize,
    pub signals_generated: usize,
    pub accepted: usize,
    pub out_of_scope: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyFailure {
    pub strategy_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub processed: Vec<StrategyPass>,
    pub failed: Vec<StrategyFailure>,
}

impl TickReport {
    pub fn processed_ids(&self) -> Vec<&str> {
        self.processed.iter().map(|p| p.strategy_id.as_str()).collect()
    }
}

pub struct StrategyScheduler {
    db: Arc<DatabaseConnection>,
    binder: Arc<UniverseBinder>,
    generator: Arc<SignalGenerator>,
    ingester: Arc<SignalIngester>,
    orders: Arc<OrderLifecycleManager>,
    interval: Duration,
    strategy_timeout: Duration,
}

impl StrategyScheduler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        binder: Arc<UniverseBinder>,
        generator: Arc<SignalGenerator>,
        ingester: Arc<SignalIngester>,
        orders: Arc<OrderLifecycleManager>,
        interval: Duration,
        strategy_timeout: Duration,
    ) -> Self {
        Self {
            db,
            binder,
            generator,
            ingester,
            orders,
            interval,
            strategy_timeout,
        }
    }

    /// Strategies with both `active` and `auto_execute_enabled` set.
    pub async fn eligible_strategies(&self) -> TradingResult<Vec<strategies::Model>> {
        Ok(strategies::Entity::find()
            .filter(strategies::Column::Active.eq(true))
            .filter(strategies::Column::AutoExecuteEnabled.eq(true))
            .order_by_asc(strategies::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// One pass over one strategy. `None` when it was halted or stopped meanwhile.
    pub async fn run_strategy(&self, strategy_id: &str) -> TradingResult<Option<StrategyPass>> {
        let strategy = strategies::Entity::find_by_id(strategy_id.to_string())
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| TradingError::not_found("strategy", strategy_id))?;
        if !(strategy.active && strategy.auto_execute_enabled) {
            return Ok(None);
        }

        let mut pass = StrategyPass {
            strategy_id: strategy.id.clone(),
            ..Default::default()
        };
        pass.sync = self.orders.sync_open_orders(&strategy.id).await?;
        pass.recovered_claims = self.ingester.recover_stale_claims(&strategy.id).await?;

        let stocks = self.binder.resolve_active_stocks(&strategy.id).await?;
        pass.active_stocks = stocks.len();
        if stocks.is_empty() {
            debug!("Strategy {} has no active stocks this pass", strategy.id);
        }
        pass.signals_generated = self.generator.generate(&strategy, &stocks).await?.len();

        for signal in self.ingester.pending_signals(&strategy.id).await? {
            match self.ingester.ingest(&signal).await {
                Ok(IngestOutcome::Accepted { .. }) => pass.accepted += 1,
                Ok(IngestOutcome::OutOfScope) => pass.out_of_scope += 1,
                Ok(IngestOutcome::Skipped { .. }) => pass.skipped += 1,
                Ok(IngestOutcome::DuplicateIgnored) => pass.duplicates += 1,
                Err(e) => pass.rejected.push(format!("{}: {}", signal.id, e)),
            }
        }
        Ok(Some(pass))
    }

    /// One scheduler pass over every eligible strategy, each in its own task.
    pub async fn tick(self: &Arc<Self>) -> TradingResult<TickReport> {
        let eligible = self.eligible_strategies().await?;
        let mut tasks = JoinSet::new();
        for strategy in eligible {
            let scheduler = Arc::clone(self);
            let timeout = self.strategy_timeout;
            tasks.spawn(async move {
                let id = strategy.id;
                let work = AssertUnwindSafe(scheduler.run_strategy(&id)).catch_unwind();
                let result = match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(Ok(pass))) => Ok(pass),
                    Ok(Ok(Err(e))) => Err(e.to_string()),
                    Ok(Err(_)) => Err("strategy pass panicked".to_string()),
                    Err(_) => Err(format!("strategy pass exceeded {:?}", timeout)),
                };
                (id, result)
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(pass)))) => report.processed.push(pass),
                Ok((_, Ok(None))) => {}
                Ok((strategy_id, Err(reason))) => {
                    warn!("Strategy {} failed this tick: {}", strategy_id, reason);
                    report.failed.push(StrategyFailure { strategy_id, reason });
                }
                Err(e) => error!("Strategy task could not be joined: {}", e),
            }
        }
        report.processed.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id));
        Ok(report)
    }

    /// Keeps one worker per eligible strategy until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Strategy scheduler started (interval {:?})", self.interval);
        let mut workers: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            workers.retain(|_, handle| !handle.is_finished());
            match self.eligible_strategies().await {
                Ok(eligible) => {
                    for strategy in eligible {
                        if workers.contains_key(&strategy.id) {
                            continue;
                        }
                        info!("Starting worker for strategy {}", strategy.id);
                        let handle = tokio::spawn(Arc::clone(&self).worker(strategy.id.clone(), shutdown.clone()));
                        workers.insert(strategy.id, handle);
                    }
                }
                Err(e) => error!("Could not read eligible strategies: {}", e),
            }
        }

        info!("Strategy scheduler stopping, waiting for {} workers", workers.len());
        for (_, handle) in workers {
            let _ = handle.await;
        }
    }

    async fn worker(self: Arc<Self>, strategy_id: String, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let work = AssertUnwindSafe(self.run_strategy(&strategy_id)).catch_unwind();
            match tokio::time::timeout(self.strategy_timeout, work).await {
                Ok(Ok(Ok(Some(pass)))) => {
                    if pass.accepted > 0 || !pass.rejected.is_empty() {
                        info!(
                            "Strategy {}: {} orders, {} rejected signals",
                            strategy_id,
                            pass.accepted,
                            pass.rejected.len()
                        );
                    }
                }
                Ok(Ok(Ok(None))) => {
                    info!("Strategy {} is no longer auto-trading, worker exits", strategy_id);
                    return;
                }
                Ok(Ok(Err(e))) => warn!("Strategy {} pass failed: {}", strategy_id, e),
                Ok(Err(_)) => error!("Strategy {} pass panicked", strategy_id),
                Err(_) => warn!(
                    "Strategy {} pass exceeded {:?}",
                    strategy_id, self.strategy_timeout
                ),
            }
        }
    }
}
