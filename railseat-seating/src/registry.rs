use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use railseat_core::{SeatRepository, TicketError, TicketResult};
use railseat_shared::{SeatClass, VehicleType};

use crate::layout::LAYOUTS;
use crate::strategy::{LayoutStrategy, PurchaseStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrategyKey {
    pub vehicle_type: VehicleType,
    pub seat_class: SeatClass,
}

impl StrategyKey {
    pub fn new(vehicle_type: VehicleType, seat_class: SeatClass) -> Self {
        Self {
            vehicle_type,
            seat_class,
        }
    }
}

impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vehicle_type, self.seat_class)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate seat strategy registered for {0}")]
    Duplicate(StrategyKey),
}

/// Immutable strategy lookup, built once at startup.
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKey, Arc<dyn PurchaseStrategy>>,
}

impl StrategyRegistry {
    /// Rejects two strategies claiming the same key.
    pub fn new(strategies: Vec<Arc<dyn PurchaseStrategy>>) -> Result<Self, RegistryError> {
        let mut map: HashMap<StrategyKey, Arc<dyn PurchaseStrategy>> = HashMap::new();
        for strategy in strategies {
            let key = strategy.key();
            if map.insert(key, strategy).is_some() {
                return Err(RegistryError::Duplicate(key));
            }
        }
        Ok(Self { strategies: map })
    }

    /// One `LayoutStrategy` per entry of the layout table.
    pub fn from_layouts(seats: Arc<dyn SeatRepository>) -> Result<Self, RegistryError> {
        let strategies = LAYOUTS
            .iter()
            .map(|layout| Arc::new(LayoutStrategy::new(layout, seats.clone())) as Arc<dyn PurchaseStrategy>)
            .collect();
        let registry = Self::new(strategies)?;
        tracing::info!(count = registry.len(), "Seat strategies registered");
        Ok(registry)
    }

    pub fn get(
        &self,
        vehicle_type: VehicleType,
        seat_class: SeatClass,
    ) -> TicketResult<Arc<dyn PurchaseStrategy>> {
        let key = StrategyKey::new(vehicle_type, seat_class);
        self.strategies
            .get(&key)
            .cloned()
            .ok_or_else(|| TicketError::StrategyNotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use railseat_core::StoreResult;
    use railseat_shared::{
        Allocation, CarriageRemaining, PassengerSeatRequest, Segment, Train,
    };
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    /// Single-leg seat source: carriage → free labels.
    struct FixedSeats {
        carriages: Mutex<Map<String, Vec<String>>>,
    }

    impl FixedSeats {
        fn new(carriages: &[(&str, &[&str])]) -> Arc<Self> {
            Arc::new(Self {
                carriages: Mutex::new(
                    carriages
                        .iter()
                        .map(|(n, labels)| {
                            (n.to_string(), labels.iter().map(|l| l.to_string()).collect())
                        })
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl SeatRepository for FixedSeats {
        async fn get_train(&self, _train_id: &str) -> StoreResult<Option<Train>> {
            Ok(None)
        }
        async fn list_route(&self, _train_id: &str) -> StoreResult<Vec<String>> {
            Ok(vec!["A".into(), "B".into()])
        }
        async fn select_seat_count(&self, _: &str, _: SeatClass, _: &Segment) -> StoreResult<u32> {
            Ok(self.carriages.lock().unwrap().values().map(|v| v.len() as u32).sum())
        }
        async fn list_carriage_remaining(
            &self,
            _: &str,
            _: SeatClass,
            _: &Segment,
        ) -> StoreResult<Vec<CarriageRemaining>> {
            let mut carriages: Vec<CarriageRemaining> = self
                .carriages
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, labels)| !labels.is_empty())
                .map(|(n, labels)| CarriageRemaining {
                    carriage_number: n.clone(),
                    remaining: labels.len() as u32,
                })
                .collect();
            carriages.sort_by(|a, b| a.carriage_number.cmp(&b.carriage_number));
            Ok(carriages)
        }
        async fn list_available_seat_labels(
            &self,
            _: &str,
            carriage_number: &str,
            _: SeatClass,
            _: &Segment,
        ) -> StoreResult<Vec<String>> {
            Ok(self
                .carriages
                .lock()
                .unwrap()
                .get(carriage_number)
                .cloned()
                .unwrap_or_default())
        }
        async fn lock_seats(&self, _: &str, _: &Segment, _: &[Allocation]) -> StoreResult<()> {
            Ok(())
        }
        async fn release_seats(&self, _: &str, _: &Segment, _: &[Allocation]) -> StoreResult<()> {
            Ok(())
        }
    }

    fn passengers(n: usize, class: SeatClass) -> Vec<PassengerSeatRequest> {
        (0..n)
            .map(|i| PassengerSeatRequest {
                passenger_id: format!("p{i}"),
                seat_class: class,
                preferred_seats: vec![],
            })
            .collect()
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let seats = FixedSeats::new(&[]);
        let layout = &LAYOUTS[0];
        let strategies: Vec<Arc<dyn PurchaseStrategy>> = vec![
            Arc::new(LayoutStrategy::new(layout, seats.clone())),
            Arc::new(LayoutStrategy::new(layout, seats)),
        ];
        let err = StrategyRegistry::new(strategies).err().unwrap();
        assert!(matches!(err, RegistryError::Duplicate(key) if key.seat_class == SeatClass::BusinessClass));
    }

    #[test]
    fn test_unregistered_key_is_strategy_not_found() {
        let registry = StrategyRegistry::from_layouts(FixedSeats::new(&[])).unwrap();
        assert_eq!(registry.len(), LAYOUTS.len());
        assert!(registry.get(VehicleType::HighSpeed, SeatClass::SecondClass).is_ok());
        let err = registry.get(VehicleType::Bullet, SeatClass::NoSeat).err().unwrap();
        assert!(matches!(err, TicketError::StrategyNotFound(ref key) if key == "BULLET/NO_SEAT"));
    }

    #[tokio::test]
    async fn test_business_strategy_seats_pair_together() {
        let seats = FixedSeats::new(&[("01", &["01A", "01F", "02A", "02C", "02F"])]);
        let registry = StrategyRegistry::from_layouts(seats).unwrap();
        let strategy = registry.get(VehicleType::HighSpeed, SeatClass::BusinessClass).unwrap();

        let allocations = strategy
            .select_seats(
                "G35",
                &Segment::new("A", "B"),
                SeatClass::BusinessClass,
                &passengers(2, SeatClass::BusinessClass),
                &[],
            )
            .await
            .unwrap();
        let labels: Vec<&str> = allocations.iter().map(|a| a.seat_label.as_str()).collect();
        assert_eq!(labels, vec!["02A", "02C"]);
        assert_eq!(allocations[0].passenger_id, "p0");
    }

    #[tokio::test]
    async fn test_preference_honored_and_exhaustion_reported() {
        let seats = FixedSeats::new(&[("03", &["01A", "01C", "04F"]), ("04", &["02D"])]);
        let registry = StrategyRegistry::from_layouts(seats).unwrap();
        let strategy = registry.get(VehicleType::HighSpeed, SeatClass::FirstClass).unwrap();
        let segment = Segment::new("A", "B");

        let mut party = passengers(1, SeatClass::FirstClass);
        party[0].preferred_seats = vec!["4f".into()];
        let allocations = strategy
            .select_seats("G35", &segment, SeatClass::FirstClass, &party, &[])
            .await
            .unwrap();
        assert_eq!(allocations[0].seat_label, "04F");
        assert_eq!(allocations[0].carriage_number, "03");

        let err = strategy
            .select_seats(
                "G35",
                &segment,
                SeatClass::FirstClass,
                &passengers(5, SeatClass::FirstClass),
                &[],
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TicketError::InventoryExhausted { seat_class: SeatClass::FirstClass }));
    }

    #[tokio::test]
    async fn test_preferred_seat_goes_to_the_passenger_who_asked() {
        let seats = FixedSeats::new(&[("01", &["01A", "01F", "02A", "02C", "02F"])]);
        let registry = StrategyRegistry::from_layouts(seats).unwrap();
        let strategy = registry.get(VehicleType::HighSpeed, SeatClass::BusinessClass).unwrap();

        // p0 has no preference, p1 wants 01F.
        let mut party = passengers(2, SeatClass::BusinessClass);
        party[1].preferred_seats = vec!["01F".into()];
        let allocations = strategy
            .select_seats("G35", &Segment::new("A", "B"), SeatClass::BusinessClass, &party, &[])
            .await
            .unwrap();
        assert_eq!(allocations.len(), 2);
        let seat_of = |id: &str| {
            allocations
                .iter()
                .find(|a| a.passenger_id == id)
                .map(|a| a.seat_label.clone())
                .unwrap()
        };
        assert_eq!(seat_of("p1"), "01F");
        assert_ne!(seat_of("p0"), "01F");
    }

    #[tokio::test]
    async fn test_spillover_across_carriages() {
        let seats = FixedSeats::new(&[("05", &["01A", "03C"]), ("06", &["10F", "12B", "18A"])]);
        let registry = StrategyRegistry::from_layouts(seats).unwrap();
        let strategy = registry.get(VehicleType::HighSpeed, SeatClass::SecondClass).unwrap();
        let allocations = strategy
            .select_seats(
                "G35",
                &Segment::new("A", "B"),
                SeatClass::SecondClass,
                &passengers(5, SeatClass::SecondClass),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(allocations.len(), 5);
        let mut taken: Vec<String> = allocations
            .iter()
            .map(|a| format!("{}-{}", a.carriage_number, a.seat_label))
            .collect();
        taken.sort();
        assert_eq!(taken, vec!["05-01A", "05-03C", "06-10F", "06-12B", "06-18A"]);
    }
}
