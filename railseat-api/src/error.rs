use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use railseat_core::{StoreError, TicketError};

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    UnsupportedRoute(String),
    /// Lock contention; the client may retry.
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, retryable) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg, false),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg, false),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg, false),
            AppError::UnsupportedRoute(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg, false),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, true),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    false,
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}

impl From<TicketError> for AppError {
    fn from(err: TicketError) -> Self {
        match err {
            TicketError::InventoryExhausted { .. } => AppError::ConflictError(err.to_string()),
            TicketError::LockTimeout(_) => {
                AppError::ServiceUnavailable("Seats are busy, please retry".to_string())
            }
            TicketError::StrategyNotFound(_) => AppError::UnsupportedRoute(err.to_string()),
            TicketError::Validation(_) => AppError::ValidationError(err.to_string()),
            TicketError::TrainNotFound(_) | TicketError::OrderNotFound(_) => {
                AppError::NotFoundError(err.to_string())
            }
            TicketError::Store(StoreError::InvalidTransition { .. }) => {
                AppError::ConflictError(err.to_string())
            }
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}
