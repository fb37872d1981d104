use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use railseat_shared::{OrderReference, PurchaseRequest, PurchaseResponse, SeatClassAvailability};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub origin: String,
    pub destination: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub train_id: String,
    pub origin: String,
    pub destination: String,
    pub seat_classes: Vec<SeatClassAvailability>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub order_reference: OrderReference,
    /// `false` when the order had already been cancelled.
    pub cancelled: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/trains/{train_id}/availability", get(query_availability))
        .route("/v1/tickets", post(purchase_tickets))
        .route("/v1/tickets/{order_reference}/cancel", post(cancel_tickets))
}

/// GET /v1/trains/{train_id}/availability?origin=&destination=
async fn query_availability(
    State(state): State<AppState>,
    Path(train_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let seat_classes = state
        .tickets
        .query_availability(&train_id, &query.origin, &query.destination)
        .await?;

    Ok(Json(AvailabilityResponse {
        train_id,
        origin: query.origin,
        destination: query.destination,
        seat_classes,
    }))
}

/// POST /v1/tickets
async fn purchase_tickets(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), AppError> {
    info!(
        train_id = %req.train_id,
        origin = %req.origin,
        destination = %req.destination,
        passengers = req.passengers.len(),
        "Purchase requested"
    );
    let response = state.tickets.purchase(&req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /v1/tickets/{order_reference}/cancel
async fn cancel_tickets(
    State(state): State<AppState>,
    Path(order_reference): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let order_reference = OrderReference(order_reference);
    let cancelled = state.tickets.cancel(&order_reference).await?;
    Ok(Json(CancelResponse {
        order_reference,
        cancelled,
    }))
}
