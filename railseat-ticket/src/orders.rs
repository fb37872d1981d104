use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use railseat_core::{OrderGateway, StoreError, StoreResult};
use railseat_shared::{OrderDetail, OrderReference, OrderStatus, TicketOrderRequest};

/// Ticket orders and their status transitions, held in memory.
pub struct OrderBook {
    orders: HashMap<OrderReference, OrderDetail>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
        }
    }

    /// Create a new unpaid order
    pub fn create_order(&mut self, request: &TicketOrderRequest) -> OrderReference {
        let reference = OrderReference::generate();
        self.orders.insert(
            reference.clone(),
            OrderDetail {
                reference: reference.clone(),
                train_id: request.train_id.clone(),
                origin: request.origin.clone(),
                destination: request.destination.clone(),
                status: OrderStatus::Unpaid,
                items: request.items.clone(),
                created_at: Utc::now(),
            },
        );
        reference
    }

    pub fn get_order(&self, reference: &OrderReference) -> Option<&OrderDetail> {
        self.orders.get(reference)
    }

    /// Transition: Unpaid → Paid
    pub fn mark_paid(&mut self, reference: &OrderReference) -> StoreResult<()> {
        let order = self.get_order_mut(reference)?;

        if order.status != OrderStatus::Unpaid {
            return Err(StoreError::InvalidTransition {
                from: order.status.as_str().to_string(),
                to: OrderStatus::Paid.as_str().to_string(),
            });
        }

        order.status = OrderStatus::Paid;
        Ok(())
    }

    /// Transition: Unpaid → Cancelled. Cancelling twice is a no-op reported as `false`.
    pub fn cancel_order(&mut self, reference: &OrderReference) -> StoreResult<bool> {
        let order = self.get_order_mut(reference)?;

        match order.status {
            OrderStatus::Unpaid => {
                order.status = OrderStatus::Cancelled;
                Ok(true)
            }
            OrderStatus::Cancelled => Ok(false),
            OrderStatus::Paid => Err(StoreError::InvalidTransition {
                from: order.status.as_str().to_string(),
                to: OrderStatus::Cancelled.as_str().to_string(),
            }),
        }
    }

    fn get_order_mut(&mut self, reference: &OrderReference) -> StoreResult<&mut OrderDetail> {
        self.orders
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", reference)))
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

/// `OrderGateway` over an [`OrderBook`]. `set_failing` makes order creation
/// fail, which is how callers exercise their rollback path.
#[derive(Default)]
pub struct InMemoryOrderGateway {
    book: Mutex<OrderBook>,
    failing: AtomicBool,
}

impl InMemoryOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn book(&self) -> StoreResult<std::sync::MutexGuard<'_, OrderBook>> {
        self.book
            .lock()
            .map_err(|_| StoreError::Backend("order book poisoned".into()))
    }
}

#[async_trait]
impl OrderGateway for InMemoryOrderGateway {
    async fn create_order(&self, request: &TicketOrderRequest) -> StoreResult<OrderReference> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("order service unavailable".into()));
        }
        Ok(self.book()?.create_order(request))
    }

    async fn get_order(&self, reference: &OrderReference) -> StoreResult<Option<OrderDetail>> {
        Ok(self.book()?.get_order(reference).cloned())
    }

    async fn cancel_order(&self, reference: &OrderReference) -> StoreResult<bool> {
        self.book()?.cancel_order(reference)
    }

    async fn mark_paid(&self, reference: &OrderReference) -> StoreResult<()> {
        self.book()?.mark_paid(reference)
    }
}
