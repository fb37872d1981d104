use async_trait::async_trait;
use std::sync::Arc;

use railseat_core::{SeatRepository, TicketError, TicketResult};
use railseat_shared::{Allocation, PassengerSeatRequest, SeatClass, Segment};

use crate::layout::{SeatClassLayout, SeatPosition};
use crate::placement::{plan, CarriageGrid, Placement};
use crate::registry::StrategyKey;

/// Seat selection for one (vehicle type, seat class).
#[async_trait]
pub trait PurchaseStrategy: Send + Sync {
    fn key(&self) -> StrategyKey;

    /// One allocation per passenger, in passenger order. A passenger whose own
    /// preferred seat was placed gets that seat; batch-level preferences go to
    /// whoever is left. Fails with `InventoryExhausted` when the class cannot
    /// seat the whole group.
    async fn select_seats(
        &self,
        train_id: &str,
        segment: &Segment,
        seat_class: SeatClass,
        passengers: &[PassengerSeatRequest],
        preferred_seats: &[String],
    ) -> TicketResult<Vec<Allocation>>;
}

/// Data-driven strategy: the layout table supplies the grid shape and preference rules.
pub struct LayoutStrategy {
    layout: &'static SeatClassLayout,
    seats: Arc<dyn SeatRepository>,
}

impl LayoutStrategy {
    pub fn new(layout: &'static SeatClassLayout, seats: Arc<dyn SeatRepository>) -> Self {
        Self { layout, seats }
    }

    pub fn layout(&self) -> &'static SeatClassLayout {
        self.layout
    }

    /// Passenger-level preferences first, then the batch-level list. Unknown
    /// labels and repeats are dropped.
    fn preferred_positions(
        &self,
        passengers: &[PassengerSeatRequest],
        preferred_seats: &[String],
    ) -> Vec<SeatPosition> {
        let mut positions = Vec::new();
        let labels = passengers
            .iter()
            .flat_map(|p| p.preferred_seats.iter())
            .chain(preferred_seats.iter());
        for label in labels {
            match self.layout.parse_label(label) {
                Some(pos) if !positions.contains(&pos) => positions.push(pos),
                Some(_) => {}
                None => tracing::debug!(label = %label, "Ignoring unknown seat preference"),
            }
            if positions.len() == passengers.len() {
                break;
            }
        }
        positions
    }

    /// Pairs placements with passengers. Each passenger first claims a
    /// placement matching one of their own preferences; the rest fill the
    /// remaining passengers in order.
    fn assign(
        &self,
        passengers: &[PassengerSeatRequest],
        placements: Vec<Placement>,
    ) -> Vec<(usize, Placement)> {
        let mut pool: Vec<Option<Placement>> = placements.into_iter().map(Some).collect();
        let mut seated: Vec<Option<Placement>> = passengers.iter().map(|_| None).collect();
        for (slot, passenger) in seated.iter_mut().zip(passengers) {
            let own: Vec<SeatPosition> = passenger
                .preferred_seats
                .iter()
                .filter_map(|label| self.layout.parse_label(label))
                .collect();
            if own.is_empty() {
                continue;
            }
            if let Some(claimed) = pool
                .iter_mut()
                .find(|p| p.as_ref().is_some_and(|p| own.contains(&p.position)))
            {
                *slot = claimed.take();
            }
        }
        let mut rest = pool.into_iter().flatten();
        seated
            .into_iter()
            .enumerate()
            .filter_map(|(i, placement)| placement.or_else(|| rest.next()).map(|p| (i, p)))
            .collect()
    }
}

#[async_trait]
impl PurchaseStrategy for LayoutStrategy {
    fn key(&self) -> StrategyKey {
        StrategyKey::new(self.layout.vehicle_type, self.layout.seat_class)
    }

    async fn select_seats(
        &self,
        train_id: &str,
        segment: &Segment,
        seat_class: SeatClass,
        passengers: &[PassengerSeatRequest],
        preferred_seats: &[String],
    ) -> TicketResult<Vec<Allocation>> {
        if passengers.is_empty() {
            return Ok(Vec::new());
        }
        let exhausted = || TicketError::InventoryExhausted { seat_class };

        let carriages = self
            .seats
            .list_carriage_remaining(train_id, seat_class, segment)
            .await?;
        let total: u32 = carriages.iter().map(|c| c.remaining).sum();
        if (total as usize) < passengers.len() {
            tracing::info!(
                train_id,
                segment = %segment,
                seat_class = %seat_class,
                total,
                requested = passengers.len(),
                "Not enough free seats for group"
            );
            return Err(exhausted());
        }

        let mut grids = Vec::with_capacity(carriages.len());
        for carriage in &carriages {
            let labels = self
                .seats
                .list_available_seat_labels(train_id, &carriage.carriage_number, seat_class, segment)
                .await?;
            grids.push(CarriageGrid::new(
                carriage.carriage_number.clone(),
                self.layout.grid_from_available(&labels),
            ));
        }

        let preferred = self.preferred_positions(passengers, preferred_seats);
        let placements =
            plan(self.layout, &mut grids, passengers.len(), &preferred).ok_or_else(exhausted)?;

        let allocations: Vec<Allocation> = self
            .assign(passengers, placements)
            .into_iter()
            .map(|(i, placement)| Allocation {
                passenger_id: passengers[i].passenger_id.clone(),
                carriage_number: placement.carriage_number,
                seat_label: self.layout.label(placement.position),
                seat_class,
            })
            .collect();
        if allocations.len() < passengers.len() {
            return Err(exhausted());
        }

        tracing::debug!(
            train_id,
            segment = %segment,
            seat_class = %seat_class,
            seats = ?allocations.iter().map(|a| format!("{}-{}", a.carriage_number, a.seat_label)).collect::<Vec<_>>(),
            "Seats selected"
        );
        Ok(allocations)
    }
}
