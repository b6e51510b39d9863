use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use autotrader::TradingError;
use serde_json::json;
use tracing::error;

/// `TradingError` as an HTTP response: a status code plus `{"error", "message"}`.
pub struct ApiError(pub TradingError);

impl From<TradingError> for ApiError {
    fn from(err: TradingError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            TradingError::InvalidAllocation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_allocation"),
            TradingError::InsufficientCapital { .. } => (StatusCode::CONFLICT, "insufficient_capital"),
            TradingError::OverRelease { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "over_release"),
            TradingError::DuplicateSignal(_) => (StatusCode::CONFLICT, "duplicate_signal"),
            TradingError::BrokerTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "broker_timeout"),
            TradingError::BrokerRejected(_) => (StatusCode::BAD_GATEWAY, "broker_rejected"),
            TradingError::ReconciliationConflict(_) => (StatusCode::CONFLICT, "reconciliation_conflict"),
            TradingError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            TradingError::InvalidOrder(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_order"),
            TradingError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            TradingError::Credential(_) => (StatusCode::FAILED_DEPENDENCY, "credential"),
            TradingError::ModeMismatch { .. } => (StatusCode::FAILED_DEPENDENCY, "mode_mismatch"),
            TradingError::ConfirmationMismatch { .. } => (StatusCode::BAD_REQUEST, "confirmation_mismatch"),
            TradingError::ConcurrentUpdate(_) => (StatusCode::SERVICE_UNAVAILABLE, "concurrent_update"),
            TradingError::Condition(_) => (StatusCode::UNPROCESSABLE_ENTITY, "condition"),
            TradingError::Broker(_) => (StatusCode::BAD_GATEWAY, "broker"),
            TradingError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "task"),
            TradingError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = Json(json!({
            "error": kind,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;
