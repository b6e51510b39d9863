use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use autotrader::broker::FillReport;
use autotrader::control::{AutoTradingReport, CapitalStatus, NewSignal, SignalReceipt};
use autotrader::services::{AllocationRequest, BulkReport, FillOutcome, HaltReport};
use autotrader::TradingControl;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub universe_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationRequest {
    pub confirmation: String,
}

pub fn router(control: TradingControl) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/strategies/:id/auto-trading/start", post(start_auto_trading))
        .route("/api/strategies/:id/auto-trading/stop", post(stop_auto_trading))
        .route(
            "/api/strategies/:id/capital",
            get(capital_status).post(allocate_capital),
        )
        .route("/api/signals", post(submit_signal))
        .route("/api/fills", post(reconcile_fill))
        .route("/api/emergency/halt", post(halt_all))
        .route("/api/emergency/cancel-pending", post(cancel_all_pending))
        .route("/api/emergency/liquidate", post(liquidate_all))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(control)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn start_auto_trading(
    State(control): State<TradingControl>,
    Path(id): Path<String>,
    Json(body): Json<StartRequest>,
) -> ApiResult<AutoTradingReport> {
    Ok(Json(control.start_auto_trading(&id, &body.universe_ids).await?))
}

async fn stop_auto_trading(
    State(control): State<TradingControl>,
    Path(id): Path<String>,
) -> ApiResult<AutoTradingReport> {
    Ok(Json(control.stop_auto_trading(&id).await?))
}

async fn capital_status(
    State(control): State<TradingControl>,
    Path(id): Path<String>,
) -> ApiResult<CapitalStatus> {
    Ok(Json(control.capital_status(&id).await?))
}

async fn allocate_capital(
    State(control): State<TradingControl>,
    Path(id): Path<String>,
    Json(request): Json<AllocationRequest>,
) -> ApiResult<CapitalStatus> {
    Ok(Json(control.allocate_capital(&id, request).await?))
}

async fn submit_signal(
    State(control): State<TradingControl>,
    Json(signal): Json<NewSignal>,
) -> ApiResult<SignalReceipt> {
    Ok(Json(control.submit_signal(signal).await?))
}

async fn reconcile_fill(
    State(control): State<TradingControl>,
    Json(fill): Json<FillReport>,
) -> ApiResult<FillOutcome> {
    Ok(Json(control.reconcile_fill(fill).await?))
}

async fn halt_all(
    State(control): State<TradingControl>,
    Json(body): Json<ConfirmationRequest>,
) -> ApiResult<HaltReport> {
    Ok(Json(control.halt_all(&body.confirmation).await?))
}

async fn cancel_all_pending(
    State(control): State<TradingControl>,
    Json(body): Json<ConfirmationRequest>,
) -> ApiResult<BulkReport> {
    Ok(Json(control.cancel_all_pending(&body.confirmation).await?))
}

async fn liquidate_all(
    State(control): State<TradingControl>,
    Json(body): Json<ConfirmationRequest>,
) -> ApiResult<BulkReport> {
    Ok(Json(control.liquidate_all(&body.confirmation).await?))
}
