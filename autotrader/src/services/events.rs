//! Internal event bus.
//!
//! The core never pushes to a UI directly; anything that wants to follow order
//! or capital changes subscribes here.

use serde::Serialize;
use shared::{OrderStatus, Side};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradingEvent {
    OrderPlaced {
        order_id: String,
        strategy_id: String,
        stock_code: String,
        side: Side,
        quantity: i64,
    },
    OrderUpdated {
        order_id: String,
        strategy_id: String,
        status: OrderStatus,
        executed_quantity: i64,
    },
    OrderOutcomeUnknown {
        order_id: String,
        strategy_id: String,
    },
    CapitalAnomaly {
        strategy_id: String,
        available: i64,
        detail: String,
    },
    StrategiesHalted {
        strategy_ids: Vec<String>,
    },
    AutoTradingStarted {
        strategy_id: String,
        universe_ids: Vec<String>,
    },
    AutoTradingStopped {
        strategy_id: String,
    },
    SignalRejected {
        signal_id: String,
        strategy_id: String,
        reason: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TradingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the event. Zero is fine.
    pub fn publish(&self, event: TradingEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!("No subscribers for {:?}", event);
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let delivered = bus.publish(TradingEvent::AutoTradingStopped {
            strategy_id: "s-1".to_string(),
        });
        assert_eq!(delivered, 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            TradingEvent::AutoTradingStopped {
                strategy_id: "s-1".to_string()
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(4);
        assert_eq!(
            bus.publish(TradingEvent::StrategiesHalted { strategy_ids: vec![] }),
            0
        );
    }
}
