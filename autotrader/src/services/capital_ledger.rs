//! Per-strategy capital accounting.
//!
//! `total_allocated == in_use + available` holds after every write. Writers for
//! one strategy are serialised by [`StrategyLocks`] and every row update is a
//! compare-and-swap on `version`, so a writer that bypasses the lock still
//! cannot overwrite a newer snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use shared::entity::{capital_allocations, strategies};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use crate::error::{TradingError, TradingResult};
use crate::services::events::{EventBus, TradingEvent};

/// The three ledger figures of one strategy, detached from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapitalSnapshot {
    pub total_allocated: i64,
    pub in_use: i64,
    pub available: i64,
}

impl CapitalSnapshot {
    pub fn new(total_allocated: i64) -> Self {
        Self {
            total_allocated,
            in_use: 0,
            available: total_allocated,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.total_allocated == self.in_use + self.available
    }

    pub fn reserve(&self, strategy_id: &str, amount: i64) -> TradingResult<Self> {
        if amount < 0 {
            return Err(TradingError::InvalidOrder(format!(
                "cannot reserve a negative amount ({})",
                amount
            )));
        }
        if self.available < amount {
            return Err(TradingError::InsufficientCapital {
                strategy_id: strategy_id.to_string(),
                requested: amount,
                available: self.available,
            });
        }
        Ok(Self {
            total_allocated: self.total_allocated,
            in_use: self.in_use + amount,
            available: self.available - amount,
        })
    }

    pub fn release(&self, strategy_id: &str, amount: i64) -> TradingResult<Self> {
        if amount < 0 || amount > self.in_use {
            return Err(TradingError::OverRelease {
                strategy_id: strategy_id.to_string(),
                amount,
                in_use: self.in_use,
            });
        }
        Ok(Self {
            total_allocated: self.total_allocated,
            in_use: self.in_use - amount,
            available: self.available + amount,
        })
    }

    /// Closes `reserved` of the in-use balance against a fill that cost `actual`.
    ///
    /// The unspent part of the reservation returns to `available`; the cost
    /// leaves the allocation. Slippage (`actual > reserved`) is taken from
    /// `available`, which may go negative.
    pub fn settle(&self, strategy_id: &str, reserved: i64, actual: i64) -> TradingResult<Self> {
        if reserved < 0 || reserved > self.in_use {
            return Err(TradingError::OverRelease {
                strategy_id: strategy_id.to_string(),
                amount: reserved,
                in_use: self.in_use,
            });
        }
        if actual < 0 {
            return Err(TradingError::InvalidOrder(format!(
                "negative settlement cost ({})",
                actual
            )));
        }
        Ok(Self {
            total_allocated: self.total_allocated - actual,
            in_use: self.in_use - reserved,
            available: self.available + reserved - actual,
        })
    }

    /// Sale proceeds flow back into the allocation.
    pub fn credit(&self, amount: i64) -> TradingResult<Self> {
        if amount < 0 {
            return Err(TradingError::InvalidOrder(format!(
                "cannot credit a negative amount ({})",
                amount
            )));
        }
        match (self.total_allocated.checked_add(amount), self.available.checked_add(amount)) {
            (Some(total_allocated), Some(available)) => Ok(Self {
                total_allocated,
                in_use: self.in_use,
                available,
            }),
            _ => Err(TradingError::InvalidOrder(format!(
                "crediting {} overflows the allocation",
                amount
            ))),
        }
    }

    /// Moves the allocation to `total_allocated`, keeping what is already in use.
    pub fn reallocate(&self, total_allocated: i64) -> TradingResult<Self> {
        if total_allocated < 0 {
            return Err(TradingError::InvalidAllocation(format!(
                "amount must not be negative, got {}",
                total_allocated
            )));
        }
        if total_allocated < self.in_use {
            return Err(TradingError::InvalidAllocation(format!(
                "{} is below the {} already in use",
                total_allocated, self.in_use
            )));
        }
        Ok(Self {
            total_allocated,
            in_use: self.in_use,
            available: total_allocated - self.in_use,
        })
    }
}

impl From<&capital_allocations::Model> for CapitalSnapshot {
    fn from(model: &capital_allocations::Model) -> Self {
        Self {
            total_allocated: model.total_allocated,
            in_use: model.in_use,
            available: model.available,
        }
    }
}

/// How an operator sizes a strategy's budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AllocationRequest {
    /// Share of the account's cash, 0-100.
    Percent(f64),
    /// Absolute KRW amount.
    Amount(i64),
}

/// Capital reserved for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub strategy_id: String,
    pub amount: i64,
}

/// One async mutex per strategy id.
#[derive(Default)]
pub struct StrategyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StrategyLocks {
    pub async fn lock(&self, strategy_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(strategy_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct CapitalLedger {
    db: Arc<DatabaseConnection>,
    locks: Arc<StrategyLocks>,
    events: EventBus,
}

impl CapitalLedger {
    pub fn new(db: Arc<DatabaseConnection>, events: EventBus) -> Self {
        Self {
            db,
            locks: Arc::new(StrategyLocks::default()),
            events,
        }
    }

    /// Serialises ledger writers for one strategy. Take it before opening a transaction.
    pub async fn lock(&self, strategy_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(strategy_id).await
    }

    pub async fn snapshot(&self, strategy_id: &str) -> TradingResult<capital_allocations::Model> {
        Self::load(self.db.as_ref(), strategy_id).await
    }

    async fn load<C: ConnectionTrait>(
        conn: &C,
        strategy_id: &str,
    ) -> TradingResult<capital_allocations::Model> {
        capital_allocations::Entity::find_by_id(strategy_id.to_string())
            .one(conn)
            .await?
            .ok_or_else(|| TradingError::not_found("capital allocation", strategy_id))
    }

    /// Compare-and-swap write of `next` over `current`.
    async fn write<C: ConnectionTrait>(
        conn: &C,
        current: &capital_allocations::Model,
        next: CapitalSnapshot,
    ) -> TradingResult<capital_allocations::Model> {
        if !next.is_balanced() {
            error!(
                "Refusing unbalanced ledger write for strategy {}: {:?}",
                current.strategy_id, next
            );
            return Err(TradingError::ConcurrentUpdate(format!(
                "unbalanced snapshot for {}",
                current.strategy_id
            )));
        }

        let now = Utc::now();
        let result = capital_allocations::Entity::update_many()
            .col_expr(capital_allocations::Column::TotalAllocated, Expr::value(next.total_allocated))
            .col_expr(capital_allocations::Column::InUse, Expr::value(next.in_use))
            .col_expr(capital_allocations::Column::Available, Expr::value(next.available))
            .col_expr(capital_allocations::Column::Version, Expr::value(current.version + 1))
            .col_expr(capital_allocations::Column::UpdatedAt, Expr::value(now))
            .filter(capital_allocations::Column::StrategyId.eq(current.strategy_id.as_str()))
            .filter(capital_allocations::Column::Version.eq(current.version))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(
                "Capital allocation for strategy {} changed underneath version {}",
                current.strategy_id, current.version
            );
            return Err(TradingError::ConcurrentUpdate(format!(
                "capital allocation {}",
                current.strategy_id
            )));
        }

        Ok(capital_allocations::Model {
            strategy_id: current.strategy_id.clone(),
            total_allocated: next.total_allocated,
            in_use: next.in_use,
            available: next.available,
            version: current.version + 1,
            updated_at: now,
        })
    }

    /// Sets the strategy budget from a percent of `account_cash` or an absolute amount.
    ///
    /// The strategy row's `allocated_capital`/`allocated_percent` and the ledger
    /// row are written in the same transaction, one always derived from the other.
    pub async fn allocate(
        &self,
        strategy_id: &str,
        request: AllocationRequest,
        account_cash: i64,
    ) -> TradingResult<capital_allocations::Model> {
        let (total, percent) = derive_allocation(request, account_cash)?;

        let _guard = self.lock(strategy_id).await;
        let txn = self.db.begin().await?;

        let strategy = strategies::Entity::find_by_id(strategy_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| TradingError::not_found("strategy", strategy_id))?;

        let existing = capital_allocations::Entity::find_by_id(strategy_id.to_string())
            .one(&txn)
            .await?;
        let allocation = match existing {
            Some(current) => {
                let next = CapitalSnapshot::from(&current).reallocate(total)?;
                Self::write(&txn, &current, next).await?
            }
            None => {
                capital_allocations::ActiveModel {
                    strategy_id: Set(strategy_id.to_string()),
                    total_allocated: Set(total),
                    in_use: Set(0),
                    available: Set(total),
                    version: Set(0),
                    updated_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?
            }
        };

        let mut strategy: strategies::ActiveModel = strategy.into();
        strategy.allocated_capital = Set(total);
        strategy.allocated_percent = Set(percent);
        strategy.updated_at = Set(Utc::now());
        strategy.update(&txn).await?;

        txn.commit().await?;
        info!(
            "Allocated {} KRW ({:.2}%) to strategy {}",
            total, percent, strategy_id
        );
        self.observe(&allocation);
        Ok(allocation)
    }

    pub async fn reserve(&self, strategy_id: &str, amount: i64) -> TradingResult<Reservation> {
        let _guard = self.lock(strategy_id).await;
        let txn = self.db.begin().await?;
        let reservation = self.reserve_in(&txn, strategy_id, amount).await?;
        txn.commit().await?;
        Ok(reservation)
    }

    pub async fn reserve_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        strategy_id: &str,
        amount: i64,
    ) -> TradingResult<Reservation> {
        let current = Self::load(conn, strategy_id).await?;
        let next = match CapitalSnapshot::from(&current).reserve(strategy_id, amount) {
            Ok(next) => next,
            Err(e) => {
                warn!("Reservation refused for strategy {}: {}", strategy_id, e);
                return Err(e);
            }
        };
        Self::write(conn, &current, next).await?;
        Ok(Reservation {
            strategy_id: strategy_id.to_string(),
            amount,
        })
    }

    pub async fn release(&self, strategy_id: &str, amount: i64) -> TradingResult<capital_allocations::Model> {
        let _guard = self.lock(strategy_id).await;
        let txn = self.db.begin().await?;
        let allocation = self.release_in(&txn, strategy_id, amount).await?;
        txn.commit().await?;
        Ok(allocation)
    }

    pub async fn release_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        strategy_id: &str,
        amount: i64,
    ) -> TradingResult<capital_allocations::Model> {
        let current = Self::load(conn, strategy_id).await?;
        let next = CapitalSnapshot::from(&current)
            .release(strategy_id, amount)
            .map_err(|e| {
                error!("Ledger bookkeeping error: {}", e);
                e
            })?;
        Self::write(conn, &current, next).await
    }

    pub async fn settle(
        &self,
        strategy_id: &str,
        reserved: i64,
        actual: i64,
    ) -> TradingResult<capital_allocations::Model> {
        let _guard = self.lock(strategy_id).await;
        let txn = self.db.begin().await?;
        let allocation = self.settle_in(&txn, strategy_id, reserved, actual).await?;
        txn.commit().await?;
        self.observe(&allocation);
        Ok(allocation)
    }

    /// Settlement inside a caller's transaction. Call [`CapitalLedger::observe`] after commit.
    pub async fn settle_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        strategy_id: &str,
        reserved: i64,
        actual: i64,
    ) -> TradingResult<capital_allocations::Model> {
        let current = Self::load(conn, strategy_id).await?;
        let next = CapitalSnapshot::from(&current)
            .settle(strategy_id, reserved, actual)
            .map_err(|e| {
                error!("Ledger bookkeeping error: {}", e);
                e
            })?;
        Self::write(conn, &current, next).await
    }

    pub async fn credit_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        strategy_id: &str,
        amount: i64,
    ) -> TradingResult<capital_allocations::Model> {
        let current = Self::load(conn, strategy_id).await?;
        let next = CapitalSnapshot::from(&current).credit(amount)?;
        Self::write(conn, &current, next).await
    }

    /// Raises an alert when a committed snapshot shows negative `available`.
    pub fn observe(&self, allocation: &capital_allocations::Model) {
        if allocation.available < 0 {
            warn!(
                "Strategy {} has negative available capital ({} KRW) after settlement",
                allocation.strategy_id, allocation.available
            );
            self.events.publish(TradingEvent::CapitalAnomaly {
                strategy_id: allocation.strategy_id.clone(),
                available: allocation.available,
                detail: "slippage exceeded the reservation".to_string(),
            });
        }
    }
}

/// Returns `(total_allocated, allocated_percent)` for a request against `account_cash`.
pub fn derive_allocation(request: AllocationRequest, account_cash: i64) -> TradingResult<(i64, f64)> {
    match request {
        AllocationRequest::Percent(percent) => {
            if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
                return Err(TradingError::InvalidAllocation(format!(
                    "percent must be within 0-100, got {}",
                    percent
                )));
            }
            let percent_dec = Decimal::from_f64(percent)
                .ok_or_else(|| TradingError::InvalidAllocation(format!("unrepresentable percent {}", percent)))?;
            let total = (Decimal::from(account_cash.max(0)) * percent_dec / Decimal::ONE_HUNDRED)
                .floor()
                .to_i64()
                .ok_or_else(|| TradingError::InvalidAllocation("allocation overflows".to_string()))?;
            Ok((total, percent))
        }
        AllocationRequest::Amount(amount) => {
            if amount < 0 {
                return Err(TradingError::InvalidAllocation(format!(
                    "amount must not be negative, got {}",
                    amount
                )));
            }
            if amount > account_cash {
                return Err(TradingError::InvalidAllocation(format!(
                    "{} exceeds the account's {} cash",
                    amount, account_cash
                )));
            }
            let percent = if account_cash == 0 {
                0.0
            } else {
                (Decimal::from(amount) * Decimal::ONE_HUNDRED / Decimal::from(account_cash))
                    .round_dp(4)
                    .to_f64()
                    .unwrap_or(0.0)
            };
            Ok((amount, percent))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_then_settle_in_full() {
        let start = CapitalSnapshot::new(1_000_000);
        let reserved = start.reserve("s", 300_000).unwrap();
        assert_eq!(reserved.in_use, 300_000);
        assert_eq!(reserved.available, 700_000);

        let settled = reserved.settle("s", 300_000, 300_000).unwrap();
        assert_eq!(settled.in_use, 0);
        assert_eq!(settled.available, 700_000);
        assert!(settled.is_balanced());
    }

    #[test]
    fn test_reserve_beyond_available_leaves_snapshot_unchanged() {
        let snapshot = CapitalSnapshot {
            total_allocated: 700_000,
            in_use: 0,
            available: 700_000,
        };
        let err = snapshot.reserve("s", 800_000).unwrap_err();
        assert!(matches!(
            err,
            TradingError::InsufficientCapital {
                requested: 800_000,
                available: 700_000,
                ..
            }
        ));
        assert_eq!(snapshot.available, 700_000);
    }

    #[test]
    fn test_release_more_than_in_use_is_rejected() {
        let snapshot = CapitalSnapshot::new(100).reserve("s", 40).unwrap();
        assert!(matches!(
            snapshot.release("s", 41),
            Err(TradingError::OverRelease { amount: 41, in_use: 40, .. })
        ));
        assert_eq!(snapshot.release("s", 40).unwrap(), CapitalSnapshot::new(100));
    }

    #[test]
    fn test_slippage_pushes_available_negative_but_stays_balanced() {
        let snapshot = CapitalSnapshot::new(100_000).reserve("s", 100_000).unwrap();
        let settled = snapshot.settle("s", 100_000, 101_500).unwrap();
        assert_eq!(settled.available, -1_500);
        assert!(settled.is_balanced());
        assert!(settled.reserve("s", 1).is_err());

        let recovered = settled.credit(50_000).unwrap();
        assert_eq!(recovered.available, 48_500);
        assert!(recovered.is_balanced());
    }

    #[test]
    fn test_credit_that_overflows_is_refused() {
        let snapshot = CapitalSnapshot::new(1_000);
        assert!(matches!(
            snapshot.credit(i64::MAX),
            Err(TradingError::InvalidOrder(_))
        ));
    }

    #[test]
    fn test_reallocate_keeps_in_use() {
        let snapshot = CapitalSnapshot::new(500).reserve("s", 200).unwrap();
        let grown = snapshot.reallocate(800).unwrap();
        assert_eq!((grown.in_use, grown.available), (200, 600));
        assert!(matches!(
            snapshot.reallocate(150),
            Err(TradingError::InvalidAllocation(_))
        ));
    }

    #[test]
    fn test_derive_allocation_floors_percent() {
        assert_eq!(
            derive_allocation(AllocationRequest::Percent(33.3), 1_000_001).unwrap(),
            (333_000, 33.3)
        );
        assert_eq!(
            derive_allocation(AllocationRequest::Amount(250_000), 1_000_000).unwrap(),
            (250_000, 25.0)
        );
    }

    #[test]
    fn test_derive_allocation_rejects_out_of_range() {
        for request in [
            AllocationRequest::Percent(-0.1),
            AllocationRequest::Percent(100.5),
            AllocationRequest::Percent(f64::NAN),
            AllocationRequest::Amount(-1),
            AllocationRequest::Amount(2_000_000),
        ] {
            assert!(matches!(
                derive_allocation(request, 1_000_000),
                Err(TradingError::InvalidAllocation(_))
            ));
        }
    }
}
