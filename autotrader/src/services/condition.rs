//! Entry/exit rules and their interpreter.
//!
//! Rules are stored as JSON on the strategy row:
//!
//! ```json
//! {"type": "and", "conditions": [
//!     {"type": "comparison", "left": "change_rate", "operator": "lte", "right": -3.0},
//!     {"type": "comparison", "left": "volume", "operator": "gt", "right": 100000}
//! ]}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{TradingError, TradingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketField {
    Price,
    ChangeRate,
    Volume,
    AveragePrice,
    /// Percent gain of the current price over the position's average price.
    ProfitRate,
    HeldQuantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Field(MarketField),
    Constant(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl Operator {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Operator::Gt => left > right,
            Operator::Gte => left >= right,
            Operator::Lt => left < right,
            Operator::Lte => left <= right,
            Operator::Eq => (left - right).abs() < f64::EPSILON,
            Operator::Ne => (left - right).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Comparison {
        left: Operand,
        operator: Operator,
        right: Operand,
    },
    And {
        conditions: Vec<Condition>,
    },
    Or {
        conditions: Vec<Condition>,
    },
}

/// Market facts about one stock under one strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketContext {
    pub price: f64,
    pub change_rate: f64,
    pub volume: f64,
    /// `None` when the strategy holds no position in the stock.
    pub average_price: Option<f64>,
    pub held_quantity: i64,
}

impl MarketContext {
    fn field(&self, field: MarketField) -> TradingResult<f64> {
        match field {
            MarketField::Price => Ok(self.price),
            MarketField::ChangeRate => Ok(self.change_rate),
            MarketField::Volume => Ok(self.volume),
            MarketField::HeldQuantity => Ok(self.held_quantity as f64),
            MarketField::AveragePrice => self
                .average_price
                .ok_or_else(|| TradingError::Condition("average_price needs a position".to_string())),
            MarketField::ProfitRate => match self.average_price {
                Some(average) if average > 0.0 => Ok((self.price - average) / average * 100.0),
                _ => Err(TradingError::Condition("profit_rate needs a position".to_string())),
            },
        }
    }

    fn operand(&self, operand: Operand) -> TradingResult<f64> {
        match operand {
            Operand::Field(field) => self.field(field),
            Operand::Constant(value) => Ok(value),
        }
    }
}

impl Condition {
    pub fn parse(raw: &str) -> TradingResult<Self> {
        serde_json::from_str(raw).map_err(|e| TradingError::Condition(format!("unparseable rule: {}", e)))
    }

    /// `And([])` holds, `Or([])` does not.
    pub fn evaluate(&self, ctx: &MarketContext) -> TradingResult<bool> {
        match self {
            Condition::Comparison {
                left,
                operator,
                right,
            } => Ok(operator.apply(ctx.operand(*left)?, ctx.operand(*right)?)),
            Condition::And { conditions } => {
                for condition in conditions {
                    if !condition.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or { conditions } => {
                for condition in conditions {
                    if condition.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}
