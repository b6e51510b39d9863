//! Error taxonomy of the execution core.

use sea_orm::DbErr;
use shared::{OrderStatus, TradingMode, TransitionError};
use thiserror::Error;

use crate::broker::BrokerError;

/// Convenience alias used by every service in the crate.
pub type TradingResult<T> = Result<T, TradingError>;

#[derive(Debug, Error)]
pub enum TradingError {
    /// Percent outside 0..=100, negative amount, or an allocation below what is already in use.
    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),

    /// The strategy cannot fund the reservation. Surfaced to the operator.
    #[error("insufficient capital for strategy {strategy_id}: requested {requested}, available {available}")]
    InsufficientCapital {
        strategy_id: String,
        requested: i64,
        available: i64,
    },

    /// A release or settlement would push `in_use` below zero. Always a bookkeeping bug.
    #[error("over-release on strategy {strategy_id}: releasing {amount} with only {in_use} in use")]
    OverRelease {
        strategy_id: String,
        amount: i64,
        in_use: i64,
    },

    /// Soft failure, absorbed by the ingester.
    #[error("signal {0} was already ingested")]
    DuplicateSignal(String),

    /// The broker did not answer in time; the outcome must be reconciled, not guessed.
    #[error("broker call timed out: {0}")]
    BrokerTimeout(String),

    /// The broker definitively refused the request. Surfaced to the operator.
    #[error("broker rejected request: {0}")]
    BrokerRejected(String),

    #[error("reconciliation conflict: {0}")]
    ReconciliationConflict(String),

    #[error("order {order_id} is {status:?}: {source}")]
    InvalidTransition {
        order_id: String,
        status: OrderStatus,
        #[source]
        source: TransitionError,
    },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("broker session for {requested} mode answered as {actual} mode")]
    ModeMismatch {
        requested: TradingMode,
        actual: TradingMode,
    },

    #[error("confirmation for {operation} does not match")]
    ConfirmationMismatch { operation: &'static str },

    /// The optimistic version check failed too many times in a row.
    #[error("concurrent update on {0}")]
    ConcurrentUpdate(String),

    #[error("condition error: {0}")]
    Condition(String),

    #[error("broker error: {0}")]
    Broker(String),

    /// A spawned unit of work panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl TradingError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        TradingError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Failures an operator has to act on, as opposed to bugs or transient noise.
    pub fn is_operator_facing(&self) -> bool {
        matches!(
            self,
            TradingError::InsufficientCapital { .. } | TradingError::BrokerRejected(_)
        )
    }
}

impl From<BrokerError> for TradingError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Timeout(op) => TradingError::BrokerTimeout(op),
            BrokerError::Rejected(reason) => TradingError::BrokerRejected(reason),
            other => TradingError::Broker(other.to_string()),
        }
    }
}
