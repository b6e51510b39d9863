use rust_decimal::prelude::*;
use shared::entity::{capital_allocations, trading_signals};
use shared::SignalType;

use crate::error::{TradingError, TradingResult};

/// What the sizer knows besides the signal and the ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingContext {
    /// Reference price per share in KRW.
    pub price: i64,
    pub held_quantity: i64,
    /// The strategy's per-order budget, 0-100.
    pub position_size_percent: f64,
}

/// Turns an accepted signal into an order quantity. Zero means "do not trade".
pub trait PositionSizer: Send + Sync {
    fn size(
        &self,
        signal: &trading_signals::Model,
        capital: &capital_allocations::Model,
        context: &SizingContext,
    ) -> TradingResult<i64>;
}

/// Buys a fixed share of the strategy's total allocation; sells the whole position.
#[derive(Debug, Default, Clone, Copy)]
pub struct PercentOfAllocation;

impl PositionSizer for PercentOfAllocation {
    fn size(
        &self,
        signal: &trading_signals::Model,
        capital: &capital_allocations::Model,
        context: &SizingContext,
    ) -> TradingResult<i64> {
        match signal.signal_type {
            SignalType::Hold => Ok(0),
            SignalType::Sell => Ok(context.held_quantity.max(0)),
            SignalType::Buy => {
                if context.price <= 0 {
                    return Err(TradingError::InvalidOrder(format!(
                        "no usable price for {} ({})",
                        signal.stock_code, context.price
                    )));
                }
                let percent = Decimal::from_f64(context.position_size_percent)
                    .filter(|p| *p >= Decimal::ZERO && *p <= Decimal::ONE_HUNDRED)
                    .ok_or_else(|| {
                        TradingError::InvalidOrder(format!(
                            "position size percent {} is outside 0-100",
                            context.position_size_percent
                        ))
                    })?;
                let budget = Decimal::from(capital.total_allocated.max(0)) * percent / Decimal::ONE_HUNDRED;
                Ok((budget / Decimal::from(context.price))
                    .floor()
                    .to_i64()
                    .unwrap_or(0))
            }
        }
    }
}
