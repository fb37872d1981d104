use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use railseat_core::route::segment_bounds;
use railseat_core::{
    DelayedNotifier, KvCache, LockCoordinator, OrderGateway, PriceLookup, SeatRepository,
    StoreError, TicketError, TicketResult,
};
use railseat_seating::{PurchaseStrategy, StrategyRegistry};
use railseat_shared::{
    Allocation, AutoCancelRequested, OrderReference, OrderStatus, PassengerSeatRequest,
    PurchaseRequest, PurchaseResponse, SeatClass, SeatClassAvailability, Segment, TicketOrderItem,
    TicketOrderRequest, Train,
};
use railseat_store::TicketingRules;

use crate::guard::{ConcurrencyGuard, HeldLocks, LocalLockRegistry};
use crate::ledger::{ClassCounts, RemainingTicketLedger};
use crate::reconcile::ReconcileScheduler;
use crate::token_bucket::AdmissionTokenBucket;
use crate::validation::{PurchaseContext, PurchaseValidator};

/// Collaborators the service is wired with.
#[derive(Clone)]
pub struct TicketDeps {
    pub seats: Arc<dyn SeatRepository>,
    pub prices: Arc<dyn PriceLookup>,
    pub cache: Arc<dyn KvCache>,
    pub locks: Arc<dyn LockCoordinator>,
    pub orders: Arc<dyn OrderGateway>,
    pub notifier: Arc<dyn DelayedNotifier>,
}

struct ClassGroup {
    seat_class: SeatClass,
    strategy: Arc<dyn PurchaseStrategy>,
    passengers: Vec<PassengerSeatRequest>,
}

/// Ticket purchase orchestrator: availability, purchase and cancellation.
pub struct TicketService {
    seats: Arc<dyn SeatRepository>,
    prices: Arc<dyn PriceLookup>,
    orders: Arc<dyn OrderGateway>,
    notifier: Arc<dyn DelayedNotifier>,
    registry: StrategyRegistry,
    validator: PurchaseValidator,
    ledger: Arc<RemainingTicketLedger>,
    bucket: AdmissionTokenBucket,
    guard: ConcurrencyGuard,
    auto_cancel_delay_seconds: u64,
}

impl TicketService {
    /// Must be called inside a tokio runtime; starts the reconcile scheduler.
    pub fn new(deps: TicketDeps, registry: StrategyRegistry, rules: &TicketingRules) -> Self {
        let ledger = Arc::new(RemainingTicketLedger::new(
            deps.cache.clone(),
            deps.seats.clone(),
            deps.locks.clone(),
            rules.ledger_ttl(),
            rules.lock_wait(),
        ));
        let reconciler = ReconcileScheduler::spawn(ledger.clone(), deps.cache.clone(), rules.reconcile_grace());
        let bucket = AdmissionTokenBucket::new(
            deps.cache.clone(),
            ledger.clone(),
            deps.locks.clone(),
            reconciler,
            rules.token_bucket_ttl(),
            rules.reconcile_marker_ttl(),
            rules.lock_wait(),
        );
        let guard = ConcurrencyGuard::new(
            LocalLockRegistry::new(rules.local_lock_ttl(), rules.local_lock_capacity),
            deps.locks.clone(),
            rules.lock_wait(),
        );

        Self {
            seats: deps.seats,
            prices: deps.prices,
            orders: deps.orders,
            notifier: deps.notifier,
            registry,
            validator: PurchaseValidator::standard(rules.max_passengers),
            ledger,
            bucket,
            guard,
            auto_cancel_delay_seconds: rules.auto_cancel_delay_seconds,
        }
    }

    /// Replaces the default validation chain.
    pub fn with_validator(mut self, validator: PurchaseValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn ledger(&self) -> &RemainingTicketLedger {
        &self.ledger
    }

    async fn load_train(&self, train_id: &str) -> TicketResult<(Train, Vec<String>)> {
        let train = self
            .seats
            .get_train(train_id)
            .await?
            .ok_or_else(|| TicketError::TrainNotFound(train_id.to_string()))?;
        let stations = self.seats.list_route(train_id).await?;
        Ok((train, stations))
    }

    /// Price and remaining count of every priced seat class on the segment.
    pub async fn query_availability(
        &self,
        train_id: &str,
        origin: &str,
        destination: &str,
    ) -> TicketResult<Vec<SeatClassAvailability>> {
        let (train, stations) = self.load_train(train_id).await?;
        let segment = Segment::new(origin, destination);
        if segment_bounds(&stations, &segment).is_none() {
            return Err(TicketError::Validation(format!(
                "{} is not a segment of train {}",
                segment, train_id
            )));
        }

        let prices: HashMap<SeatClass, i64> = self
            .prices
            .list_prices(train_id, &segment)
            .await?
            .into_iter()
            .map(|p| (p.seat_class, p.amount))
            .collect();
        let remaining = self.ledger.remaining(&train, &segment).await?;

        Ok(train
            .vehicle_type
            .seat_classes()
            .iter()
            .filter_map(|class| {
                let price = *prices.get(class)?;
                Some(SeatClassAvailability {
                    seat_class: *class,
                    price,
                    remaining: remaining.get(class).copied().unwrap_or(0),
                })
            })
            .collect())
    }

    pub async fn purchase(&self, request: &PurchaseRequest) -> TicketResult<PurchaseResponse> {
        let (train, stations) = self.load_train(&request.train_id).await?;
        self.validator.validate(&PurchaseContext {
            request,
            stations: &stations,
        })?;
        let segment = Segment::new(request.origin.clone(), request.destination.clone());

        let mut by_class: BTreeMap<SeatClass, Vec<PassengerSeatRequest>> = BTreeMap::new();
        for passenger in &request.passengers {
            by_class.entry(passenger.seat_class).or_default().push(passenger.clone());
        }
        let mut groups = Vec::with_capacity(by_class.len());
        for (seat_class, passengers) in by_class {
            groups.push(ClassGroup {
                seat_class,
                strategy: self.registry.get(train.vehicle_type, seat_class)?,
                passengers,
            });
        }
        let demand: ClassCounts = groups
            .iter()
            .map(|g| (g.seat_class, g.passengers.len() as u32))
            .collect();

        self.bucket
            .take(&train, &stations, &segment, &demand)
            .await?
            .into_result()?;

        let result = self
            .purchase_with_locks(&train, &stations, &segment, &groups, &demand, &request.preferred_seats)
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if let Err(rollback) = self.bucket.rollback(&train.id, &stations, &segment, &demand).await {
                    warn!(train_id = %train.id, error = %rollback, "Failed to return admission tokens");
                }
                return Err(e);
            }
        };

        let event = AutoCancelRequested::new(
            response.order_reference.clone(),
            train.id.clone(),
            self.auto_cancel_delay_seconds,
        );
        if let Err(e) = self.notifier.schedule_auto_cancel(&event).await {
            warn!(order = %response.order_reference, error = %e, "Failed to schedule auto-cancel");
        }

        info!(
            order = %response.order_reference,
            train_id = %train.id,
            segment = %segment,
            seats = response.items.len(),
            "Tickets purchased"
        );
        Ok(response)
    }

    async fn purchase_with_locks(
        &self,
        train: &Train,
        stations: &[String],
        segment: &Segment,
        groups: &[ClassGroup],
        demand: &ClassCounts,
        preferred_seats: &[String],
    ) -> TicketResult<PurchaseResponse> {
        let held = self.guard.acquire(&train.id, demand.keys().copied()).await?;
        let result = self
            .allocate(&held, train, stations, segment, groups, demand, preferred_seats)
            .await;
        held.release().await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn allocate(
        &self,
        held: &HeldLocks,
        train: &Train,
        stations: &[String],
        segment: &Segment,
        groups: &[ClassGroup],
        demand: &ClassCounts,
        preferred_seats: &[String],
    ) -> TicketResult<PurchaseResponse> {
        // The bucket is approximate; the ledger decides under the lock.
        let remaining = self.ledger.remaining(train, segment).await?;
        for (class, wanted) in demand {
            if remaining.get(class).copied().unwrap_or(0) < *wanted {
                info!(train_id = %train.id, segment = %segment, seat_class = %class, "Ledger exhausted");
                return Err(TicketError::InventoryExhausted { seat_class: *class });
            }
        }

        let prices: HashMap<SeatClass, i64> = self
            .prices
            .list_prices(&train.id, segment)
            .await?
            .into_iter()
            .map(|p| (p.seat_class, p.amount))
            .collect();

        let mut allocations: Vec<Allocation> = Vec::new();
        for group in groups {
            let selected = group
                .strategy
                .select_seats(&train.id, segment, group.seat_class, &group.passengers, preferred_seats)
                .await?;
            allocations.extend(selected);
        }

        let mut items = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            let amount = prices.get(&allocation.seat_class).copied().ok_or_else(|| {
                StoreError::NotFound(format!(
                    "price of {} on {} {}",
                    allocation.seat_class, train.id, segment
                ))
            })?;
            items.push(TicketOrderItem {
                allocation: allocation.clone(),
                amount,
            });
        }

        self.seats.lock_seats(&train.id, segment, &allocations).await?;

        let order_request = TicketOrderRequest {
            train_id: train.id.clone(),
            origin: segment.origin.clone(),
            destination: segment.destination.clone(),
            items,
        };
        let reference = match self.orders.create_order(&order_request).await {
            Ok(reference) => reference,
            Err(e) => {
                error!(train_id = %train.id, segment = %segment, error = %e, "Order creation failed, releasing seats");
                if let Err(release) = self.seats.release_seats(&train.id, segment, &allocations).await {
                    error!(train_id = %train.id, error = %release, "Seat rollback failed");
                }
                return Err(TicketError::OrderCreation(e.to_string()));
            }
        };

        if let Err(e) = self.ledger.decrement(held, stations, segment, demand).await {
            // The seat store already reflects the sale; rebuild counts from it.
            error!(order = %reference, error = %e, "Ledger decrement failed, invalidating");
            if let Err(e) = self.ledger.invalidate(&train.id, stations, segment).await {
                error!(order = %reference, error = %e, "Ledger invalidation failed");
            }
        }

        Ok(PurchaseResponse {
            order_reference: reference,
            items: order_request.items,
        })
    }

    /// Cancels an unpaid order and returns its seats. `false` if it was already cancelled.
    pub async fn cancel(&self, reference: &OrderReference) -> TicketResult<bool> {
        let order = self
            .orders
            .get_order(reference)
            .await?
            .ok_or_else(|| TicketError::OrderNotFound(reference.to_string()))?;
        if order.status == OrderStatus::Cancelled {
            debug!(order = %reference, "Order already cancelled");
            return Ok(false);
        }

        let (_, stations) = self.load_train(&order.train_id).await?;
        let segment = Segment::new(order.origin.clone(), order.destination.clone());
        let allocations = order.allocations();
        let mut returned = ClassCounts::new();
        for allocation in &allocations {
            *returned.entry(allocation.seat_class).or_insert(0) += 1;
        }

        let held = self.guard.acquire(&order.train_id, returned.keys().copied()).await?;
        let result = self
            .return_seats(&held, reference, &stations, &segment, &allocations, &returned)
            .await;
        held.release().await;

        if matches!(result, Ok(true)) {
            if let Err(e) = self
                .bucket
                .rollback(&order.train_id, &stations, &segment, &returned)
                .await
            {
                warn!(order = %reference, error = %e, "Failed to refill admission tokens");
            }
            info!(order = %reference, seats = allocations.len(), "Order cancelled");
        }
        result
    }

    async fn return_seats(
        &self,
        held: &HeldLocks,
        reference: &OrderReference,
        stations: &[String],
        segment: &Segment,
        allocations: &[Allocation],
        returned: &ClassCounts,
    ) -> TicketResult<bool> {
        let train_id = held.train_id();
        // Re-read under the lock; a cancel that finished meanwhile may have let
        // these seats be sold again.
        match self.orders.get_order(reference).await? {
            Some(order) if order.status == OrderStatus::Unpaid => {}
            Some(order) if order.status == OrderStatus::Cancelled => return Ok(false),
            Some(order) => {
                return Err(StoreError::InvalidTransition {
                    from: order.status.as_str().to_string(),
                    to: OrderStatus::Cancelled.as_str().to_string(),
                }
                .into())
            }
            None => return Err(TicketError::OrderNotFound(reference.to_string())),
        }

        // Seats first: if this fails the order stays unpaid and a retry starts over.
        self.seats.release_seats(train_id, segment, allocations).await?;

        match self.orders.cancel_order(reference).await {
            Ok(true) => {}
            // Cancelled elsewhere; its seats belong free.
            Ok(false) => return Ok(false),
            Err(e) => {
                warn!(order = %reference, error = %e, "Order transition failed, re-locking seats");
                if let Err(relock) = self.seats.lock_seats(train_id, segment, allocations).await {
                    error!(order = %reference, error = %relock, "Failed to re-lock seats of uncancelled order");
                }
                return Err(e.into());
            }
        }

        if let Err(e) = self.ledger.increment(held, stations, segment, returned).await {
            // The seat store already has the seats back; rebuild counts from it.
            error!(order = %reference, error = %e, "Ledger increment failed, invalidating");
            if let Err(e) = self.ledger.invalidate(train_id, stations, segment).await {
                error!(order = %reference, error = %e, "Ledger invalidation failed");
            }
        }
        Ok(true)
    }

    /// Auto-cancel entry point: cancels only while the order is still unpaid.
    pub async fn cancel_if_unpaid(&self, reference: &OrderReference) -> TicketResult<bool> {
        match self.orders.get_order(reference).await? {
            Some(order) if order.status == OrderStatus::Unpaid => {}
            Some(order) => {
                debug!(order = %reference, status = order.status.as_str(), "Auto-cancel skipped");
                return Ok(false);
            }
            None => {
                warn!(order = %reference, "Auto-cancel for unknown order");
                return Ok(false);
            }
        }
        match self.cancel(reference).await {
            // Paid between the check and the transition.
            Err(TicketError::Store(StoreError::InvalidTransition { .. })) => Ok(false),
            other => other,
        }
    }
}
