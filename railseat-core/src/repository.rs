use async_trait::async_trait;
use railseat_shared::{
    Allocation, CarriageRemaining, OrderDetail, OrderReference, SeatClass, SeatPrice, Segment,
    TicketOrderRequest, Train,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent seat records. Availability grids are derived from these at query time.
#[async_trait]
pub trait SeatRepository: Send + Sync {
    async fn get_train(&self, train_id: &str) -> StoreResult<Option<Train>>;

    /// Stations of the train in travel order.
    async fn list_route(&self, train_id: &str) -> StoreResult<Vec<String>>;

    /// Seats of `seat_class` free on every leg of `segment`.
    async fn select_seat_count(
        &self,
        train_id: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<u32>;

    /// Carriages of `seat_class` with at least one seat free on `segment`, by carriage number.
    async fn list_carriage_remaining(
        &self,
        train_id: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<Vec<CarriageRemaining>>;

    async fn list_available_seat_labels(
        &self,
        train_id: &str,
        carriage_number: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<Vec<String>>;

    /// Marks the seats sold on every leg of `segment`. Fails with `Conflict`
    /// without side effects if any seat is no longer free.
    async fn lock_seats(
        &self,
        train_id: &str,
        segment: &Segment,
        allocations: &[Allocation],
    ) -> StoreResult<()>;

    async fn release_seats(
        &self,
        train_id: &str,
        segment: &Segment,
        allocations: &[Allocation],
    ) -> StoreResult<()>;
}

/// Precomputed fares.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    async fn list_prices(&self, train_id: &str, segment: &Segment) -> StoreResult<Vec<SeatPrice>>;
}

/// Order-management collaborator.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn create_order(&self, request: &TicketOrderRequest) -> StoreResult<OrderReference>;

    async fn get_order(&self, reference: &OrderReference) -> StoreResult<Option<OrderDetail>>;

    /// Unpaid → Cancelled. Returns `false` when the order was already cancelled.
    async fn cancel_order(&self, reference: &OrderReference) -> StoreResult<bool>;

    async fn mark_paid(&self, reference: &OrderReference) -> StoreResult<()>;
}
