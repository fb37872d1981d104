use std::collections::HashSet;

use railseat_core::route::station_index;
use railseat_core::{TicketError, TicketResult};
use railseat_shared::PurchaseRequest;

/// Everything a filter may look at.
pub struct PurchaseContext<'a> {
    pub request: &'a PurchaseRequest,
    /// Stations of the requested train in travel order.
    pub stations: &'a [String],
}

/// One step of the validation chain, run before any cache or lock is touched.
pub trait PurchaseFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &PurchaseContext<'_>) -> TicketResult<()>;
}

pub struct NonEmptyPassengers;

impl PurchaseFilter for NonEmptyPassengers {
    fn name(&self) -> &'static str {
        "non-empty-passengers"
    }

    fn check(&self, ctx: &PurchaseContext<'_>) -> TicketResult<()> {
        if ctx.request.passengers.is_empty() {
            return Err(TicketError::Validation("at least one passenger is required".into()));
        }
        Ok(())
    }
}

pub struct PassengerLimit {
    pub max: usize,
}

impl PurchaseFilter for PassengerLimit {
    fn name(&self) -> &'static str {
        "passenger-limit"
    }

    fn check(&self, ctx: &PurchaseContext<'_>) -> TicketResult<()> {
        let count = ctx.request.passengers.len();
        if count > self.max {
            return Err(TicketError::Validation(format!(
                "{} passengers requested, at most {} per order",
                count, self.max
            )));
        }
        Ok(())
    }
}

pub struct UniquePassengers;

impl PurchaseFilter for UniquePassengers {
    fn name(&self) -> &'static str {
        "unique-passengers"
    }

    fn check(&self, ctx: &PurchaseContext<'_>) -> TicketResult<()> {
        let mut seen = HashSet::new();
        for passenger in &ctx.request.passengers {
            if !seen.insert(passenger.passenger_id.as_str()) {
                return Err(TicketError::Validation(format!(
                    "passenger {} appears more than once",
                    passenger.passenger_id
                )));
            }
        }
        Ok(())
    }
}

pub struct StationsOnRoute;

impl PurchaseFilter for StationsOnRoute {
    fn name(&self) -> &'static str {
        "stations-on-route"
    }

    fn check(&self, ctx: &PurchaseContext<'_>) -> TicketResult<()> {
        let request = ctx.request;
        let origin = station_index(ctx.stations, &request.origin).ok_or_else(|| {
            TicketError::Validation(format!("{} is not a stop of train {}", request.origin, request.train_id))
        })?;
        let destination = station_index(ctx.stations, &request.destination).ok_or_else(|| {
            TicketError::Validation(format!(
                "{} is not a stop of train {}",
                request.destination, request.train_id
            ))
        })?;
        if origin >= destination {
            return Err(TicketError::Validation(format!(
                "{} does not come before {} on train {}",
                request.origin, request.destination, request.train_id
            )));
        }
        Ok(())
    }
}

/// Ordered filter chain; the first failure wins and is returned unchanged.
pub struct PurchaseValidator {
    filters: Vec<Box<dyn PurchaseFilter>>,
}

impl PurchaseValidator {
    pub fn new(filters: Vec<Box<dyn PurchaseFilter>>) -> Self {
        Self { filters }
    }

    pub fn standard(max_passengers: usize) -> Self {
        Self::new(vec![
            Box::new(NonEmptyPassengers),
            Box::new(PassengerLimit { max: max_passengers }),
            Box::new(UniquePassengers),
            Box::new(StationsOnRoute),
        ])
    }

    pub fn validate(&self, ctx: &PurchaseContext<'_>) -> TicketResult<()> {
        for filter in &self.filters {
            if let Err(e) = filter.check(ctx) {
                tracing::debug!(filter = filter.name(), error = %e, "Purchase rejected");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railseat_shared::{PassengerSeatRequest, SeatClass};

    fn request(passengers: &[&str], origin: &str, destination: &str) -> PurchaseRequest {
        PurchaseRequest {
            train_id: "G35".into(),
            origin: origin.into(),
            destination: destination.into(),
            passengers: passengers
                .iter()
                .map(|id| PassengerSeatRequest {
                    passenger_id: id.to_string(),
                    seat_class: SeatClass::SecondClass,
                    preferred_seats: vec![],
                })
                .collect(),
            preferred_seats: vec![],
        }
    }

    fn check(request: &PurchaseRequest) -> TicketResult<()> {
        let stations: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        PurchaseValidator::standard(3).validate(&PurchaseContext {
            request,
            stations: &stations,
        })
    }

    #[test]
    fn test_accepts_valid_request() {
        assert!(check(&request(&["p1", "p2"], "A", "C")).is_ok());
    }

    #[test]
    fn test_rejections() {
        let cases = [
            request(&[], "A", "C"),
            request(&["p1", "p2", "p3", "p4"], "A", "C"),
            request(&["p1", "p1"], "A", "C"),
            request(&["p1"], "C", "A"),
            request(&["p1"], "A", "Z"),
            request(&["p1"], "B", "B"),
        ];
        for case in &cases {
            assert!(matches!(check(case), Err(TicketError::Validation(_))));
        }
    }

    #[test]
    fn test_first_failure_wins() {
        let err = check(&request(&["p1", "p1", "p2", "p3"], "Z", "A")).unwrap_err();
        assert!(err.to_string().contains("at most 3"));
    }
}
