pub mod cache;
pub mod lock;
pub mod messaging;
pub mod repository;
pub mod route;

use railseat_shared::SeatClass;

pub use cache::{CacheError, CacheResult, KvCache};
pub use lock::{LockCoordinator, LockError, LockHandle};
pub use messaging::{DelayedNotifier, MessagingError};
pub use repository::{OrderGateway, PriceLookup, SeatRepository, StoreError, StoreResult};

/// Error taxonomy surfaced by the purchase/cancel paths.
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("Insufficient remaining tickets for {seat_class}, try another seat class or station")]
    InventoryExhausted { seat_class: SeatClass },
    #[error("Timed out waiting for lock {0}")]
    LockTimeout(String),
    #[error("Unsupported route type: no seat strategy registered for {0}")]
    StrategyNotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Train not found: {0}")]
    TrainNotFound(String),
    #[error("Order creation failed: {0}")]
    OrderCreation(String),
    #[error("Order not found: {0}")]
    OrderNotFound(String),
    #[error("Lock coordinator failure: {0}")]
    Lock(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl TicketError {
    /// Transient contention; the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TicketError::LockTimeout(_))
    }

    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            TicketError::InventoryExhausted { .. } | TicketError::Validation(_)
        )
    }
}

impl From<LockError> for TicketError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout(name) => TicketError::LockTimeout(name),
            LockError::Backend(msg) => TicketError::Lock(msg),
        }
    }
}

pub type TicketResult<T> = Result<T, TicketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout: TicketError = LockError::Timeout("railseat:lock:purchase:G35_0".into()).into();
        assert!(timeout.is_retryable());
        assert!(!timeout.is_user_recoverable());

        let exhausted = TicketError::InventoryExhausted {
            seat_class: SeatClass::FirstClass,
        };
        assert!(exhausted.is_user_recoverable());
        assert!(!exhausted.is_retryable());

        let backend: TicketError = LockError::Backend("connection reset".into()).into();
        assert!(matches!(backend, TicketError::Lock(_)));
    }

    #[test]
    fn test_unsupported_route_message() {
        let err = TicketError::StrategyNotFound("BULLET/NO_SEAT".into());
        assert_eq!(
            err.to_string(),
            "Unsupported route type: no seat strategy registered for BULLET/NO_SEAT"
        );
    }
}
