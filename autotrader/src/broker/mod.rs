//! Broker-facing interface used by the execution core.
//!
//! Every outbound call goes through a [`BrokerSession`], which is scoped to one
//! (user, mode) pair and bounds each call with a timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{OrderType, Side, TradingMode};
use thiserror::Error;
use tracing::warn;

pub mod paper;
pub mod rest;

pub use paper::{FillPolicy, PaperBroker, PaperConnector};
pub use rest::{RestBroker, RestConnector};

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// No answer within the session timeout. The request may or may not have landed.
    #[error("timed out: {0}")]
    Timeout(String),
    /// The broker answered and refused.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub stock_code: String,
    pub price: i64,
    pub change_rate: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    /// Our order id. Lets a timed-out placement be found again.
    pub client_order_id: String,
    pub stock_code: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i64,
    /// Limit price; always `None` for market orders.
    pub price: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerOrderStatus {
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// One execution reported by the broker. `(broker_order_ref, filled_at)` identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReport {
    pub broker_order_ref: String,
    pub filled_at: DateTime<Utc>,
    pub quantity: i64,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderAck {
    pub broker_order_ref: String,
    pub status: BrokerOrderStatus,
    /// Executions that happened before the acknowledgement was sent.
    #[serde(default)]
    pub fills: Vec<FillReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub broker_order_ref: String,
    pub status: BrokerOrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerOrderState {
    pub broker_order_ref: String,
    pub client_order_id: String,
    pub status: BrokerOrderStatus,
    #[serde(default)]
    pub fills: Vec<FillReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldPosition {
    pub stock_code: String,
    pub quantity: i64,
    pub average_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub cash: i64,
    pub positions: Vec<HeldPosition>,
}

/// Trait describing the trading API of one brokerage account in one mode.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// The mode this client is wired to. Checked against the credential it was built from.
    fn mode(&self) -> TradingMode;

    async fn get_current_price(&self, stock_code: &str) -> BrokerResult<Quote>;

    async fn place_order(&self, request: &PlaceOrderRequest) -> BrokerResult<PlaceOrderAck>;

    async fn cancel_order(&self, broker_order_ref: &str) -> BrokerResult<CancelAck>;

    async fn get_balance(&self) -> BrokerResult<AccountBalance>;

    /// Look an order up by the client order id it was placed with.
    async fn find_order(&self, client_order_id: &str) -> BrokerResult<Option<BrokerOrderState>>;

    /// Current state and executions of a confirmed order.
    async fn order_state(&self, broker_order_ref: &str) -> BrokerResult<BrokerOrderState>;
}

/// Decrypted credential material handed to a connector.
#[derive(Clone)]
pub struct BrokerCredential {
    pub credential_id: String,
    pub user_id: i64,
    pub provider: String,
    pub mode: TradingMode,
    pub app_key: String,
    pub app_secret: String,
    pub account_no: String,
}

impl std::fmt::Debug for BrokerCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredential")
            .field("credential_id", &self.credential_id)
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("mode", &self.mode)
            .field("account_no", &self.account_no)
            .finish_non_exhaustive()
    }
}

/// Builds broker clients from stored credentials.
pub trait BrokerConnector: Send + Sync {
    fn connect(&self, credential: &BrokerCredential) -> BrokerResult<Arc<dyn BrokerApi>>;
}

/// A broker client bound to one (user, mode) with a bounded timeout on every call.
#[derive(Clone)]
pub struct BrokerSession {
    broker: Arc<dyn BrokerApi>,
    user_id: i64,
    mode: TradingMode,
    fingerprint: String,
    timeout: Duration,
}

impl std::fmt::Debug for BrokerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSession")
            .field("user_id", &self.user_id)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BrokerSession {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        user_id: i64,
        mode: TradingMode,
        fingerprint: String,
        timeout: Duration,
    ) -> Self {
        Self {
            broker,
            user_id,
            mode,
            fingerprint,
            timeout,
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Short non-secret identifier of the credential set behind this session.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn guarded<T, F>(&self, operation: &str, call: F) -> BrokerResult<T>
    where
        F: Future<Output = BrokerResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Broker call {} timed out after {:?} (user {}, {} mode, credential {})",
                    operation, self.timeout, self.user_id, self.mode, self.fingerprint
                );
                Err(BrokerError::Timeout(format!(
                    "{} after {}ms",
                    operation,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn get_current_price(&self, stock_code: &str) -> BrokerResult<Quote> {
        self.guarded("get_current_price", self.broker.get_current_price(stock_code))
            .await
    }

    pub async fn place_order(&self, request: &PlaceOrderRequest) -> BrokerResult<PlaceOrderAck> {
        self.guarded("place_order", self.broker.place_order(request)).await
    }

    pub async fn cancel_order(&self, broker_order_ref: &str) -> BrokerResult<CancelAck> {
        self.guarded("cancel_order", self.broker.cancel_order(broker_order_ref))
            .await
    }

    pub async fn get_balance(&self) -> BrokerResult<AccountBalance> {
        self.guarded("get_balance", self.broker.get_balance()).await
    }

    pub async fn find_order(&self, client_order_id: &str) -> BrokerResult<Option<BrokerOrderState>> {
        self.guarded("find_order", self.broker.find_order(client_order_id))
            .await
    }

    pub async fn order_state(&self, broker_order_ref: &str) -> BrokerResult<BrokerOrderState> {
        self.guarded("order_state", self.broker.order_state(broker_order_ref))
            .await
    }
}
