//! Domain enums shared by the entities and the execution core.
//!
//! Every enum is persisted as a short string column through `DeriveActiveEnum`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Paper trading vs real funds. Credential sets and broker sessions never cross modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[sea_orm(string_value = "test")]
    Test,
    #[sea_orm(string_value = "live")]
    Live,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Test => write!(f, "test"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[sea_orm(string_value = "buy")]
    Buy,
    #[sea_orm(string_value = "sell")]
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Executes at the requested price or better.
    #[sea_orm(string_value = "limit")]
    Limit,
    /// Executes at whatever the market offers; `requested_price` is only the reference quote.
    #[sea_orm(string_value = "market")]
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    #[sea_orm(string_value = "buy")]
    Buy,
    #[sea_orm(string_value = "sell")]
    Sell,
    #[sea_orm(string_value = "hold")]
    Hold,
}

/// Outcome recorded for a consumed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionOutcome {
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "accepted")]
    Accepted,
    #[sea_orm(string_value = "out_of_scope")]
    OutOfScope,
    #[sea_orm(string_value = "skipped")]
    Skipped,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PARTIAL")]
    Partial,
    #[sea_orm(string_value = "EXECUTED")]
    Executed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

/// Something that happened to an order, as reported by the broker or requested by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    PartialFill,
    FullFill,
    Cancel,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("order cannot move from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: OrderStatus,
    pub event: OrderEvent,
}

impl OrderStatus {
    /// Statuses that still have quantity working at the broker.
    pub const OPEN: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Partial];

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Executed | OrderStatus::Cancelled)
    }

    /// Applies an event to the order state machine.
    ///
    /// ```text
    /// PENDING --partial--> PARTIAL --full--> EXECUTED
    /// PENDING --full-----> EXECUTED
    /// PENDING|PARTIAL --cancel--> CANCELLED
    /// ```
    /// A further partial fill keeps a PARTIAL order in PARTIAL.
    pub fn on(self, event: OrderEvent) -> Result<OrderStatus, TransitionError> {
        use OrderEvent::*;
        use OrderStatus::*;

        match (self, event) {
            (Pending, PartialFill) | (Partial, PartialFill) => Ok(Partial),
            (Pending, FullFill) | (Partial, FullFill) => Ok(Executed),
            (Pending, Cancel) | (Partial, Cancel) => Ok(Cancelled),
            (from, event) => Err(TransitionError { from, event }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        assert_eq!(OrderStatus::Pending.on(OrderEvent::PartialFill), Ok(OrderStatus::Partial));
        assert_eq!(OrderStatus::Pending.on(OrderEvent::FullFill), Ok(OrderStatus::Executed));
        assert_eq!(OrderStatus::Pending.on(OrderEvent::Cancel), Ok(OrderStatus::Cancelled));
    }

    #[test]
    fn test_partial_transitions() {
        assert_eq!(OrderStatus::Partial.on(OrderEvent::PartialFill), Ok(OrderStatus::Partial));
        assert_eq!(OrderStatus::Partial.on(OrderEvent::FullFill), Ok(OrderStatus::Executed));
        assert_eq!(OrderStatus::Partial.on(OrderEvent::Cancel), Ok(OrderStatus::Cancelled));
    }

    #[test]
    fn test_terminal_states_never_move() {
        for status in [OrderStatus::Executed, OrderStatus::Cancelled] {
            assert!(status.is_terminal());
            for event in [OrderEvent::PartialFill, OrderEvent::FullFill, OrderEvent::Cancel] {
                assert_eq!(status.on(event), Err(TransitionError { from: status, event }));
            }
        }
    }

    #[test]
    fn test_open_statuses_are_not_terminal() {
        for status in OrderStatus::OPEN {
            assert!(!status.is_terminal());
        }
    }
}
