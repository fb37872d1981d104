use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use railseat_core::{KvCache, LockCoordinator, OrderGateway, SeatRepository, StoreError, TicketError};
use railseat_seating::StrategyRegistry;
use railseat_shared::{
    OrderStatus, PassengerSeatRequest, PurchaseRequest, SeatClass, Segment, Train, VehicleType,
};
use railseat_store::memory::{
    InMemoryCache, InMemoryLockCoordinator, InMemorySeatRepository, RecordingNotifier,
};
use railseat_store::TicketingRules;
use railseat_ticket::guard::purchase_lock_name;
use railseat_ticket::token_bucket::{bucket_field, bucket_key};
use railseat_ticket::{InMemoryOrderGateway, TicketDeps, TicketService};

const GRACE_MILLIS: u64 = 50;

struct Harness {
    cache: Arc<InMemoryCache>,
    seats: Arc<InMemorySeatRepository>,
    locks: Arc<InMemoryLockCoordinator>,
    orders: Arc<InMemoryOrderGateway>,
    notifier: Arc<RecordingNotifier>,
    service: Arc<TicketService>,
}

fn stations() -> Vec<String> {
    ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect()
}

/// G35, high-speed, A-B-C-D. Five business seats, four first-class seats, no second class.
fn harness() -> Harness {
    let seats = Arc::new(InMemorySeatRepository::new());
    seats.add_train(
        Train {
            id: "G35".into(),
            train_number: "G35".into(),
            vehicle_type: VehicleType::HighSpeed,
            start_station: "A".into(),
            end_station: "D".into(),
        },
        stations(),
    );
    seats
        .add_carriage("G35", "01", SeatClass::BusinessClass, ["01A", "01F", "02A", "02C", "02F"])
        .unwrap();
    seats
        .add_carriage("G35", "02", SeatClass::FirstClass, ["01A", "01C", "01D", "01F"])
        .unwrap();
    for (o, d) in [("A", "B"), ("A", "C"), ("A", "D"), ("B", "C"), ("B", "D"), ("C", "D")] {
        seats.set_price("G35", Segment::new(o, d), SeatClass::BusinessClass, 150_000);
        seats.set_price("G35", Segment::new(o, d), SeatClass::FirstClass, 90_000);
        seats.set_price("G35", Segment::new(o, d), SeatClass::SecondClass, 55_000);
    }

    let cache = Arc::new(InMemoryCache::new());
    let locks = Arc::new(InMemoryLockCoordinator::new());
    let orders = Arc::new(InMemoryOrderGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let rules = TicketingRules {
        reconcile_grace_millis: GRACE_MILLIS,
        lock_wait_millis: 300,
        auto_cancel_delay_seconds: 900,
        ..TicketingRules::default()
    };
    let registry = StrategyRegistry::from_layouts(seats.clone()).unwrap();
    let service = TicketService::new(
        TicketDeps {
            seats: seats.clone(),
            prices: seats.clone(),
            cache: cache.clone(),
            locks: locks.clone(),
            orders: orders.clone(),
            notifier: notifier.clone(),
        },
        registry,
        &rules,
    );

    Harness {
        cache,
        seats,
        locks,
        orders,
        notifier,
        service: Arc::new(service),
    }
}

fn request(origin: &str, destination: &str, passengers: &[(&str, SeatClass)]) -> PurchaseRequest {
    PurchaseRequest {
        train_id: "G35".into(),
        origin: origin.into(),
        destination: destination.into(),
        passengers: passengers
            .iter()
            .map(|(id, class)| PassengerSeatRequest {
                passenger_id: id.to_string(),
                seat_class: *class,
                preferred_seats: vec![],
            })
            .collect(),
        preferred_seats: vec![],
    }
}

async fn business_left(h: &Harness, o: &str, d: &str) -> u32 {
    let train = h.seats.get_train("G35").await.unwrap().unwrap();
    h.service
        .ledger()
        .remaining(&train, &Segment::new(o, d))
        .await
        .unwrap()[&SeatClass::BusinessClass]
}

#[tokio::test]
async fn test_purchase_then_cancel_restores_every_segment() {
    let h = harness();
    let availability = h.service.query_availability("G35", "A", "C").await.unwrap();
    let business = availability
        .iter()
        .find(|a| a.seat_class == SeatClass::BusinessClass)
        .unwrap();
    assert_eq!((business.remaining, business.price), (5, 150_000));
    let second = availability
        .iter()
        .find(|a| a.seat_class == SeatClass::SecondClass)
        .unwrap();
    assert_eq!(second.remaining, 0);

    let response = h
        .service
        .purchase(&request(
            "A",
            "C",
            &[("p1", SeatClass::BusinessClass), ("p2", SeatClass::BusinessClass)],
        ))
        .await
        .unwrap();
    assert_eq!(response.items.len(), 2);
    assert!(response.items.iter().all(|i| i.amount == 150_000));
    let seats: HashSet<_> = response
        .items
        .iter()
        .map(|i| (i.allocation.carriage_number.clone(), i.allocation.seat_label.clone()))
        .collect();
    assert_eq!(seats.len(), 2);

    for (o, d) in [("A", "B"), ("A", "C"), ("A", "D"), ("B", "C"), ("B", "D")] {
        assert_eq!(business_left(&h, o, d).await, 3, "{}->{}", o, d);
    }
    assert_eq!(business_left(&h, "C", "D").await, 5);
    assert_eq!(h.notifier.events().len(), 1);
    assert_eq!(h.notifier.events()[0].order_reference, response.order_reference);

    assert!(h.service.cancel(&response.order_reference).await.unwrap());
    for (o, d) in [("A", "B"), ("A", "C"), ("A", "D"), ("B", "C"), ("B", "D"), ("C", "D")] {
        assert_eq!(business_left(&h, o, d).await, 5, "{}->{}", o, d);
    }
    assert_eq!(
        h.seats
            .select_seat_count("G35", SeatClass::BusinessClass, &Segment::new("A", "D"))
            .await
            .unwrap(),
        5
    );
    // Cancelling twice is a no-op.
    assert!(!h.service.cancel(&response.order_reference).await.unwrap());
    assert_eq!(h.locks.held_count(), 0);
}

fn party(prefix: &str, n: usize) -> Vec<(String, SeatClass)> {
    (1..=n).map(|i| (format!("{}{}", prefix, i), SeatClass::BusinessClass)).collect()
}

fn as_refs(party: &[(String, SeatClass)]) -> Vec<(&str, SeatClass)> {
    party.iter().map(|(id, c)| (id.as_str(), *c)).collect()
}

async fn business_in_store(h: &Harness, o: &str, d: &str) -> u32 {
    h.seats
        .select_seat_count("G35", SeatClass::BusinessClass, &Segment::new(o, d))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_cancel_after_overlapping_sales_restores_exact_counts() {
    let h = harness();
    let evening = party("e", 3);
    h.service
        .purchase(&request("B", "C", &as_refs(&evening)))
        .await
        .unwrap();
    let before = business_left(&h, "A", "C").await;
    assert_eq!(before, 2);

    // A->B does not share a leg with B->C, so four seats still sell there.
    let morning = party("m", 4);
    let response = h
        .service
        .purchase(&request("A", "B", &as_refs(&morning)))
        .await
        .unwrap();
    assert_eq!(business_left(&h, "A", "C").await, 0);
    assert_eq!(business_left(&h, "A", "B").await, 1);

    assert!(h.service.cancel(&response.order_reference).await.unwrap());
    assert_eq!(business_left(&h, "A", "C").await, before);
    assert_eq!(business_in_store(&h, "A", "C").await, before);
    assert_eq!(business_left(&h, "A", "B").await, 5);
    assert_eq!(business_left(&h, "A", "D").await, business_in_store(&h, "A", "D").await);
}

#[tokio::test]
async fn test_failed_seat_release_keeps_order_cancellable() {
    let h = harness();
    let response = h
        .service
        .purchase(&request(
            "A",
            "C",
            &[("p1", SeatClass::BusinessClass), ("p2", SeatClass::BusinessClass)],
        ))
        .await
        .unwrap();
    let reference = response.order_reference;

    h.seats.set_writes_failing(true);
    let err = h.service.cancel(&reference).await.unwrap_err();
    assert!(matches!(err, TicketError::Store(StoreError::Backend(_))));
    let order = h.orders.get_order(&reference).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Unpaid);
    assert_eq!(business_left(&h, "A", "C").await, 3);
    assert_eq!(business_in_store(&h, "A", "C").await, 3);
    assert_eq!(h.locks.held_count(), 0);

    // The retry goes all the way through.
    h.seats.set_writes_failing(false);
    assert!(h.service.cancel(&reference).await.unwrap());
    let order = h.orders.get_order(&reference).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(business_left(&h, "A", "C").await, 5);
    assert_eq!(business_in_store(&h, "A", "C").await, 5);
}

#[tokio::test]
async fn test_paid_order_keeps_its_seats() {
    let h = harness();
    let response = h
        .service
        .purchase(&request("A", "B", &[("p1", SeatClass::BusinessClass)]))
        .await
        .unwrap();
    h.orders.mark_paid(&response.order_reference).await.unwrap();

    let err = h.service.cancel(&response.order_reference).await.unwrap_err();
    assert!(matches!(err, TicketError::Store(StoreError::InvalidTransition { .. })));
    assert_eq!(business_in_store(&h, "A", "B").await, 4);
    assert_eq!(business_left(&h, "A", "B").await, 4);
}

#[tokio::test]
async fn test_empty_class_denied_before_any_purchase_lock() {
    let h = harness();
    let err = h
        .service
        .purchase(&request("A", "B", &[("p1", SeatClass::SecondClass)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TicketError::InventoryExhausted {
            seat_class: SeatClass::SecondClass
        }
    ));
    assert!(err.is_user_recoverable());
    assert_eq!(
        h.locks
            .acquisition_count(&purchase_lock_name("G35", SeatClass::SecondClass)),
        0
    );
}

#[tokio::test]
async fn test_unregistered_class_is_unsupported_route() {
    let h = harness();
    let err = h
        .service
        .purchase(&request("A", "B", &[("p1", SeatClass::NoSeat)]))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::StrategyNotFound(_)));
}

#[tokio::test]
async fn test_validation_and_unknown_train() {
    let h = harness();
    let err = h
        .service
        .purchase(&request("C", "A", &[("p1", SeatClass::BusinessClass)]))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::Validation(_)));

    let mut unknown = request("A", "B", &[("p1", SeatClass::BusinessClass)]);
    unknown.train_id = "Z1".into();
    assert!(matches!(
        h.service.purchase(&unknown).await,
        Err(TicketError::TrainNotFound(_))
    ));
    assert!(matches!(
        h.service.query_availability("G35", "D", "A").await,
        Err(TicketError::Validation(_))
    ));
}

#[tokio::test]
async fn test_order_failure_rolls_back_seats_ledger_and_tokens() {
    let h = harness();
    h.orders.set_failing(true);
    let err = h
        .service
        .purchase(&request("A", "C", &[("p1", SeatClass::BusinessClass)]))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::OrderCreation(_)));
    assert_eq!(business_left(&h, "A", "C").await, 5);
    assert_eq!(
        h.seats
            .select_seat_count("G35", SeatClass::BusinessClass, &Segment::new("A", "C"))
            .await
            .unwrap(),
        5
    );
    assert_eq!(
        h.cache
            .hget(&bucket_key("G35"), &bucket_field(&Segment::new("A", "C"), SeatClass::BusinessClass))
            .await
            .unwrap(),
        Some(5)
    );
    assert_eq!(h.locks.held_count(), 0);
    assert!(h.notifier.events().is_empty());

    // Every seat is still sellable.
    h.orders.set_failing(false);
    let everyone: Vec<(String, SeatClass)> =
        (1..=5).map(|i| (format!("p{}", i), SeatClass::BusinessClass)).collect();
    let everyone: Vec<(&str, SeatClass)> = everyone.iter().map(|(id, c)| (id.as_str(), *c)).collect();
    let response = h.service.purchase(&request("A", "C", &everyone)).await.unwrap();
    assert_eq!(response.items.len(), 5);
}

#[tokio::test]
async fn test_held_class_does_not_block_other_classes() {
    let h = harness();
    // Another node holds the business-class purchase lock.
    let foreign = h
        .locks
        .lock_fair(&purchase_lock_name("G35", SeatClass::BusinessClass), Duration::from_millis(50))
        .await
        .unwrap();

    let first = h
        .service
        .purchase(&request("A", "B", &[("p1", SeatClass::FirstClass)]))
        .await
        .unwrap();
    assert_eq!(first.items[0].allocation.seat_class, SeatClass::FirstClass);

    let err = h
        .service
        .purchase(&request("A", "B", &[("p2", SeatClass::BusinessClass)]))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(business_left(&h, "A", "B").await, 5);

    h.locks.unlock(&foreign).await.unwrap();
    h.service
        .purchase(&request("A", "B", &[("p2", SeatClass::BusinessClass)]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_buyers_never_share_a_seat() {
    let h = harness();
    let mut tasks = Vec::new();
    for i in 0..7 {
        let service = h.service.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("p{}", i);
            service
                .purchase(&request("A", "D", &[(id.as_str(), SeatClass::BusinessClass)]))
                .await
        }));
    }

    let mut sold = HashSet::new();
    let mut exhausted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(response) => {
                let a = &response.items[0].allocation;
                assert!(sold.insert((a.carriage_number.clone(), a.seat_label.clone())));
            }
            Err(TicketError::InventoryExhausted { .. }) => exhausted += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(sold.len(), 5);
    assert_eq!(exhausted, 2);
    assert_eq!(business_left(&h, "B", "C").await, 0);
}

#[tokio::test]
async fn test_denied_bucket_recovers_after_reconciliation() {
    let h = harness();
    h.service
        .purchase(&request("A", "B", &[("p1", SeatClass::FirstClass)]))
        .await
        .unwrap();
    // Drain the tokens without touching the ledger.
    h.cache
        .hincr_existing(
            &bucket_key("G35"),
            &bucket_field(&Segment::new("B", "C"), SeatClass::BusinessClass),
            -5,
        )
        .await
        .unwrap();

    let denied = h
        .service
        .purchase(&request("B", "C", &[("p2", SeatClass::BusinessClass)]))
        .await;
    assert!(matches!(denied, Err(TicketError::InventoryExhausted { .. })));

    tokio::time::sleep(Duration::from_millis(GRACE_MILLIS * 5)).await;
    let response = h
        .service
        .purchase(&request("B", "C", &[("p2", SeatClass::BusinessClass)]))
        .await
        .unwrap();
    assert_eq!(response.items.len(), 1);
}

#[tokio::test]
async fn test_preferred_seat_is_honored() {
    let h = harness();
    let mut req = request("A", "B", &[("p1", SeatClass::BusinessClass)]);
    req.preferred_seats = vec!["02C".into()];
    let response = h.service.purchase(&req).await.unwrap();
    assert_eq!(response.items[0].allocation.seat_label, "02C");
}

#[tokio::test]
async fn test_auto_cancel_only_touches_unpaid_orders() {
    let h = harness();
    h.notifier.set_failing(true);
    let unpaid = h
        .service
        .purchase(&request("A", "B", &[("p1", SeatClass::BusinessClass)]))
        .await
        .unwrap();
    let paid = h
        .service
        .purchase(&request("A", "B", &[("p2", SeatClass::BusinessClass)]))
        .await
        .unwrap();
    assert!(h.notifier.events().is_empty());
    h.orders.mark_paid(&paid.order_reference).await.unwrap();

    assert!(h.service.cancel_if_unpaid(&unpaid.order_reference).await.unwrap());
    assert!(!h.service.cancel_if_unpaid(&unpaid.order_reference).await.unwrap());
    assert!(!h.service.cancel_if_unpaid(&paid.order_reference).await.unwrap());
    assert_eq!(business_left(&h, "A", "B").await, 4);
}
