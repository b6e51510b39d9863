//! In-process paper broker.
//!
//! Keeps quotes, cash, holdings and orders in memory. The knobs (rejections,
//! latency, resting orders, manual fills) are what the integration tests use to
//! drive the core through broker failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use shared::{OrderType, Side, TradingMode};
use tracing::{debug, info};

use super::{
    AccountBalance, BrokerApi, BrokerConnector, BrokerCredential, BrokerError, BrokerOrderState,
    BrokerOrderStatus, BrokerResult, CancelAck, FillReport, HeldPosition, PlaceOrderAck,
    PlaceOrderRequest, Quote,
};

/// What happens to an order once the paper broker accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    /// Fill the whole quantity inside `place_order`.
    Immediate,
    /// Leave the order working until [`PaperBroker::fill`] is called.
    Resting,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    broker_order_ref: String,
    client_order_id: String,
    stock_code: String,
    side: Side,
    quantity: i64,
    filled: i64,
    status: BrokerOrderStatus,
    fills: Vec<FillReport>,
}

impl PaperOrder {
    fn state(&self) -> BrokerOrderState {
        BrokerOrderState {
            broker_order_ref: self.broker_order_ref.clone(),
            client_order_id: self.client_order_id.clone(),
            status: self.status,
            fills: self.fills.clone(),
        }
    }
}

struct PaperState {
    quotes: HashMap<String, Quote>,
    cash: i64,
    holdings: HashMap<String, HeldPosition>,
    rejected_stocks: HashSet<String>,
    failing_cancels: HashSet<String>,
    fill_policy: FillPolicy,
    slippage: i64,
    latency: Option<Duration>,
    stall_after_accept: Option<Duration>,
    orders: HashMap<String, PaperOrder>,
    by_client_id: HashMap<String, String>,
    next_ref: u64,
    fill_sequence: i64,
    placed: usize,
}

pub struct PaperBroker {
    mode: TradingMode,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(mode: TradingMode, cash: i64) -> Self {
        Self {
            mode,
            state: Mutex::new(PaperState {
                quotes: HashMap::new(),
                cash,
                holdings: HashMap::new(),
                rejected_stocks: HashSet::new(),
                failing_cancels: HashSet::new(),
                fill_policy: FillPolicy::Immediate,
                slippage: 0,
                latency: None,
                stall_after_accept: None,
                orders: HashMap::new(),
                by_client_id: HashMap::new(),
                next_ref: 1,
                fill_sequence: 0,
                placed: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_price(&self, stock_code: &str, price: i64) {
        self.set_quote(Quote {
            stock_code: stock_code.to_string(),
            price,
            change_rate: 0.0,
            volume: 0,
        });
    }

    pub fn set_quote(&self, quote: Quote) {
        self.lock().quotes.insert(quote.stock_code.clone(), quote);
    }

    /// Every order for this stock is refused.
    pub fn reject_stock(&self, stock_code: &str) {
        self.lock().rejected_stocks.insert(stock_code.to_string());
    }

    /// Cancel requests for this order are refused.
    pub fn fail_cancel(&self, broker_order_ref: &str) {
        self.lock().failing_cancels.insert(broker_order_ref.to_string());
    }

    pub fn set_fill_policy(&self, policy: FillPolicy) {
        self.lock().fill_policy = policy;
    }

    /// Per-share price drift applied against the trader on market fills.
    pub fn set_slippage(&self, per_share: i64) {
        self.lock().slippage = per_share;
    }

    /// Delay before the broker acts on order entry (place and cancel). A timed-out
    /// call leaves no trace.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Delay after an order was accepted, before the acknowledgement is returned.
    pub fn set_stall_after_accept(&self, stall: Option<Duration>) {
        self.lock().stall_after_accept = stall;
    }

    pub fn hold(&self, stock_code: &str, quantity: i64, average_price: f64) {
        self.lock().holdings.insert(
            stock_code.to_string(),
            HeldPosition {
                stock_code: stock_code.to_string(),
                quantity,
                average_price,
            },
        );
    }

    /// Number of orders that reached the broker.
    pub fn placed_count(&self) -> usize {
        self.lock().placed
    }

    pub fn cash(&self) -> i64 {
        self.lock().cash
    }

    /// Executes part or all of a resting order and returns the report the broker would push.
    pub fn fill(&self, broker_order_ref: &str, quantity: i64, price: i64) -> BrokerResult<FillReport> {
        let mut state = self.lock();
        Self::apply_fill(&mut state, broker_order_ref, quantity, price)
    }

    fn apply_fill(
        state: &mut PaperState,
        broker_order_ref: &str,
        quantity: i64,
        price: i64,
    ) -> BrokerResult<FillReport> {
        state.fill_sequence += 1;
        let filled_at = Utc::now() + ChronoDuration::milliseconds(state.fill_sequence);

        let order = state
            .orders
            .get_mut(broker_order_ref)
            .ok_or_else(|| BrokerError::Rejected(format!("unknown order {}", broker_order_ref)))?;
        if matches!(order.status, BrokerOrderStatus::Filled | BrokerOrderStatus::Cancelled) {
            return Err(BrokerError::Rejected(format!(
                "order {} is no longer working",
                broker_order_ref
            )));
        }
        if quantity <= 0 || order.filled + quantity > order.quantity {
            return Err(BrokerError::Rejected(format!(
                "fill of {} exceeds remaining {}",
                quantity,
                order.quantity - order.filled
            )));
        }

        order.filled += quantity;
        order.status = if order.filled == order.quantity {
            BrokerOrderStatus::Filled
        } else {
            BrokerOrderStatus::PartiallyFilled
        };
        let report = FillReport {
            broker_order_ref: broker_order_ref.to_string(),
            filled_at,
            quantity,
            price,
        };
        order.fills.push(report.clone());
        let side = order.side;
        let stock_code = order.stock_code.clone();

        let value = quantity * price;
        match side {
            Side::Buy => {
                state.cash -= value;
                let holding = state.holdings.entry(stock_code.clone()).or_insert(HeldPosition {
                    stock_code,
                    quantity: 0,
                    average_price: 0.0,
                });
                let cost = holding.average_price * holding.quantity as f64 + value as f64;
                holding.quantity += quantity;
                holding.average_price = cost / holding.quantity as f64;
            }
            Side::Sell => {
                state.cash += value;
                if let Some(holding) = state.holdings.get_mut(&stock_code) {
                    holding.quantity -= quantity;
                    if holding.quantity <= 0 {
                        state.holdings.remove(&stock_code);
                    }
                }
            }
        }

        Ok(report)
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BrokerApi for PaperBroker {
    fn mode(&self) -> TradingMode {
        self.mode
    }

    async fn get_current_price(&self, stock_code: &str) -> BrokerResult<Quote> {
        self.lock()
            .quotes
            .get(stock_code)
            .cloned()
            .ok_or_else(|| BrokerError::Rejected(format!("no quote for {}", stock_code)))
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> BrokerResult<PlaceOrderAck> {
        self.simulate_latency().await;

        let (ack, stall) = {
            let mut state = self.lock();
            if state.rejected_stocks.contains(&request.stock_code) {
                return Err(BrokerError::Rejected(format!(
                    "orders for {} are not accepted",
                    request.stock_code
                )));
            }
            if request.quantity <= 0 {
                return Err(BrokerError::Rejected("quantity must be positive".to_string()));
            }
            if request.order_type == OrderType::Limit && request.price.is_none() {
                return Err(BrokerError::Rejected("limit order without price".to_string()));
            }
            let quote_price = state
                .quotes
                .get(&request.stock_code)
                .map(|q| q.price)
                .ok_or_else(|| BrokerError::Rejected(format!("no quote for {}", request.stock_code)))?;

            let broker_order_ref = format!("PAPER-{:06}", state.next_ref);
            state.next_ref += 1;
            state.placed += 1;
            state.orders.insert(
                broker_order_ref.clone(),
                PaperOrder {
                    broker_order_ref: broker_order_ref.clone(),
                    client_order_id: request.client_order_id.clone(),
                    stock_code: request.stock_code.clone(),
                    side: request.side,
                    quantity: request.quantity,
                    filled: 0,
                    status: BrokerOrderStatus::Accepted,
                    fills: Vec::new(),
                },
            );
            state
                .by_client_id
                .insert(request.client_order_id.clone(), broker_order_ref.clone());

            let mut fills = Vec::new();
            if state.fill_policy == FillPolicy::Immediate {
                let price = match (request.order_type, request.side) {
                    (OrderType::Limit, _) => request.price.unwrap_or(quote_price),
                    (OrderType::Market, Side::Buy) => quote_price + state.slippage,
                    (OrderType::Market, Side::Sell) => quote_price - state.slippage,
                };
                fills.push(Self::apply_fill(&mut state, &broker_order_ref, request.quantity, price)?);
            }
            let status = state
                .orders
                .get(&broker_order_ref)
                .map(|o| o.status)
                .unwrap_or(BrokerOrderStatus::Accepted);

            debug!(
                "Paper broker accepted {} ({:?} {:?} {} x {})",
                broker_order_ref, request.side, request.order_type, request.stock_code, request.quantity
            );
            (
                PlaceOrderAck {
                    broker_order_ref,
                    status,
                    fills,
                },
                state.stall_after_accept,
            )
        };

        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(ack)
    }

    async fn cancel_order(&self, broker_order_ref: &str) -> BrokerResult<CancelAck> {
        self.simulate_latency().await;
        let mut state = self.lock();
        if state.failing_cancels.contains(broker_order_ref) {
            return Err(BrokerError::Rejected(format!(
                "cancel refused for {}",
                broker_order_ref
            )));
        }
        let order = state
            .orders
            .get_mut(broker_order_ref)
            .ok_or_else(|| BrokerError::Rejected(format!("unknown order {}", broker_order_ref)))?;
        if matches!(
            order.status,
            BrokerOrderStatus::Accepted | BrokerOrderStatus::PartiallyFilled
        ) {
            order.status = BrokerOrderStatus::Cancelled;
            info!("Paper broker cancelled {}", broker_order_ref);
        }
        Ok(CancelAck {
            broker_order_ref: broker_order_ref.to_string(),
            status: order.status,
        })
    }

    async fn get_balance(&self) -> BrokerResult<AccountBalance> {
        let state = self.lock();
        let mut positions: Vec<HeldPosition> = state.holdings.values().cloned().collect();
        positions.sort_by(|a, b| a.stock_code.cmp(&b.stock_code));
        Ok(AccountBalance {
            cash: state.cash,
            positions,
        })
    }

    async fn find_order(&self, client_order_id: &str) -> BrokerResult<Option<BrokerOrderState>> {
        let state = self.lock();
        Ok(state
            .by_client_id
            .get(client_order_id)
            .and_then(|broker_ref| state.orders.get(broker_ref))
            .map(PaperOrder::state))
    }

    async fn order_state(&self, broker_order_ref: &str) -> BrokerResult<BrokerOrderState> {
        self.lock()
            .orders
            .get(broker_order_ref)
            .map(PaperOrder::state)
            .ok_or_else(|| BrokerError::Rejected(format!("unknown order {}", broker_order_ref)))
    }
}

/// Hands out pre-built paper brokers by mode.
#[derive(Default)]
pub struct PaperConnector {
    brokers: HashMap<TradingMode, Arc<PaperBroker>>,
}

impl PaperConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `broker` for credentials of `mode`, whatever mode the broker itself reports.
    pub fn with_broker(mut self, mode: TradingMode, broker: Arc<PaperBroker>) -> Self {
        self.brokers.insert(mode, broker);
        self
    }
}

impl BrokerConnector for PaperConnector {
    fn connect(&self, credential: &BrokerCredential) -> BrokerResult<Arc<dyn BrokerApi>> {
        match self.brokers.get(&credential.mode) {
            Some(broker) => {
                let broker: Arc<dyn BrokerApi> = broker.clone();
                Ok(broker)
            }
            None => Err(BrokerError::Authentication(format!(
                "no paper account for {} mode",
                credential.mode
            ))),
        }
    }
}
