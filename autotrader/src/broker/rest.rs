//! JSON-over-HTTP broker client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use shared::TradingMode;
use tracing::debug;

use super::{
    AccountBalance, BrokerApi, BrokerConnector, BrokerCredential, BrokerError, BrokerOrderState,
    BrokerResult, CancelAck, PlaceOrderAck, PlaceOrderRequest, Quote,
};

pub struct RestBroker {
    client: Client,
    base_url: String,
    mode: TradingMode,
    app_key: String,
    app_secret: String,
    account_no: String,
}

impl RestBroker {
    pub fn new(client: Client, base_url: impl Into<String>, credential: &BrokerCredential) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mode: credential.mode,
            app_key: credential.app_key.clone(),
            app_secret: credential.app_secret.clone(),
            account_no: credential.account_no.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("appkey", &self.app_key)
            .header("appsecret", &self.app_secret)
            .header("account-no", &self.account_no)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> BrokerResult<T> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BrokerError::Authentication(format!("HTTP {}", status)));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Rejected(format!("HTTP {}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(BrokerError::Transport(format!("HTTP {}", status)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Serialization(e.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> BrokerError {
    if err.is_timeout() {
        BrokerError::Timeout(err.to_string())
    } else {
        BrokerError::Transport(err.to_string())
    }
}

#[async_trait]
impl BrokerApi for RestBroker {
    fn mode(&self) -> TradingMode {
        self.mode
    }

    async fn get_current_price(&self, stock_code: &str) -> BrokerResult<Quote> {
        self.send(self.client.get(self.url(&format!("/quotes/{}", stock_code))))
            .await
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> BrokerResult<PlaceOrderAck> {
        debug!(
            "Placing {:?} {:?} order {} for {} x {}",
            request.side, request.order_type, request.client_order_id, request.stock_code, request.quantity
        );
        self.send(self.client.post(self.url("/orders")).json(request))
            .await
    }

    async fn cancel_order(&self, broker_order_ref: &str) -> BrokerResult<CancelAck> {
        self.send(
            self.client
                .post(self.url(&format!("/orders/{}/cancel", broker_order_ref))),
        )
        .await
    }

    async fn get_balance(&self) -> BrokerResult<AccountBalance> {
        self.send(self.client.get(self.url("/balance"))).await
    }

    async fn find_order(&self, client_order_id: &str) -> BrokerResult<Option<BrokerOrderState>> {
        let found: Vec<BrokerOrderState> = self
            .send(
                self.client
                    .get(self.url("/orders"))
                    .query(&[("client_order_id", client_order_id)]),
            )
            .await?;
        Ok(found.into_iter().next())
    }

    async fn order_state(&self, broker_order_ref: &str) -> BrokerResult<BrokerOrderState> {
        self.send(self.client.get(self.url(&format!("/orders/{}", broker_order_ref))))
            .await
    }
}

/// Connects to the live or the test endpoint depending on the credential's mode.
pub struct RestConnector {
    client: Client,
    live_url: String,
    test_url: String,
}

impl RestConnector {
    pub fn new(live_url: impl Into<String>, test_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            live_url: live_url.into(),
            test_url: test_url.into(),
        }
    }
}

impl BrokerConnector for RestConnector {
    fn connect(&self, credential: &BrokerCredential) -> BrokerResult<Arc<dyn BrokerApi>> {
        if credential.app_key.is_empty() || credential.app_secret.is_empty() {
            return Err(BrokerError::Authentication(format!(
                "credential {} has no app key",
                credential.credential_id
            )));
        }
        let base_url = match credential.mode {
            TradingMode::Live => &self.live_url,
            TradingMode::Test => &self.test_url,
        };
        Ok(Arc::new(RestBroker::new(
            self.client.clone(),
            base_url.clone(),
            credential,
        )))
    }
}
