//! Cache-backed remaining-ticket counts per (train, segment, seat class).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use railseat_core::route::{affected_segments, salable_segments};
use railseat_core::{
    KvCache, LockCoordinator, SeatRepository, TicketError, TicketResult,
};
use railseat_shared::{SeatClass, Segment, Train};

use crate::guard::HeldLocks;

const REMAINING_PREFIX: &str = "ticket:remaining:";
const LOAD_LOCK_PREFIX: &str = "lock:remaining-load:";

pub type ClassCounts = BTreeMap<SeatClass, u32>;

pub fn remaining_key(train_id: &str, segment: &Segment) -> String {
    format!("{}{}", REMAINING_PREFIX, segment.key_suffix(train_id))
}

fn class_field(seat_class: SeatClass) -> String {
    seat_class.code().to_string()
}

fn zero_counts(train: &Train) -> ClassCounts {
    train.vehicle_type.seat_classes().iter().map(|c| (*c, 0)).collect()
}

fn to_counts(train: &Train, fields: &HashMap<String, i64>) -> ClassCounts {
    train
        .vehicle_type
        .seat_classes()
        .iter()
        .map(|class| {
            let count = fields.get(&class_field(*class)).copied().unwrap_or(0);
            (*class, count.max(0) as u32)
        })
        .collect()
}

/// Remaining-ticket ledger. Reads are lazy: the first miss for any segment of a
/// train loads every segment of that train in one pass.
pub struct RemainingTicketLedger {
    cache: Arc<dyn KvCache>,
    seats: Arc<dyn SeatRepository>,
    locks: Arc<dyn LockCoordinator>,
    ttl: Duration,
    load_wait: Duration,
}

impl RemainingTicketLedger {
    pub fn new(
        cache: Arc<dyn KvCache>,
        seats: Arc<dyn SeatRepository>,
        locks: Arc<dyn LockCoordinator>,
        ttl: Duration,
        load_wait: Duration,
    ) -> Self {
        Self {
            cache,
            seats,
            locks,
            ttl,
            load_wait,
        }
    }

    /// Counts for every seat class of the train on `segment`.
    pub async fn get(&self, train: &Train, segment: &Segment) -> TicketResult<ClassCounts> {
        let key = remaining_key(&train.id, segment);
        let cached = self.cache.hgetall(&key).await?;
        if !cached.is_empty() {
            return Ok(to_counts(train, &cached));
        }

        let lock_name = format!("{}{}", LOAD_LOCK_PREFIX, segment.key_suffix(&train.id));
        let handle = self.locks.lock_fair(&lock_name, self.load_wait).await?;
        let loaded = self.load_locked(train, segment, &key).await;
        if let Err(e) = self.locks.unlock(&handle).await {
            warn!(lock = %lock_name, error = %e, "Failed to release ledger load lock");
        }
        loaded
    }

    async fn load_locked(&self, train: &Train, segment: &Segment, key: &str) -> TicketResult<ClassCounts> {
        // Another loader may have finished while we waited.
        let cached = self.cache.hgetall(key).await?;
        if !cached.is_empty() {
            return Ok(to_counts(train, &cached));
        }

        match self.scan_train(train).await {
            Ok(entries) => {
                let requested = entries
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, fields)| fields.iter().cloned().collect::<HashMap<_, _>>());
                self.cache.hset_many(&entries, Some(self.ttl)).await?;
                info!(train_id = %train.id, segments = entries.len(), "Remaining-ticket ledger loaded");
                match requested {
                    Some(fields) => Ok(to_counts(train, &fields)),
                    None => {
                        warn!(key, "Segment not on route, using zero counts");
                        Ok(zero_counts(train))
                    }
                }
            }
            Err(e) => {
                // Sales continue against the authoritative store; the counts here
                // only drive admission and display.
                error!(key, error = %e, "Remaining-ticket load failed, using zero counts");
                Ok(zero_counts(train))
            }
        }
    }

    /// Every salable segment of the train, counted from the seat store.
    async fn scan_train(&self, train: &Train) -> TicketResult<Vec<(String, Vec<(String, i64)>)>> {
        let stations = self.seats.list_route(&train.id).await?;
        let mut entries = Vec::new();
        for segment in salable_segments(&stations) {
            let mut fields = Vec::new();
            for seat_class in train.vehicle_type.seat_classes() {
                let count = self
                    .seats
                    .select_seat_count(&train.id, *seat_class, &segment)
                    .await?;
                fields.push((class_field(*seat_class), count as i64));
            }
            entries.push((remaining_key(&train.id, &segment), fields));
        }
        Ok(entries)
    }

    /// One pipelined read of every class on `segment`; falls back to the load
    /// path if any field is missing.
    pub async fn remaining(&self, train: &Train, segment: &Segment) -> TicketResult<ClassCounts> {
        let key = remaining_key(&train.id, segment);
        let classes = train.vehicle_type.seat_classes();
        let lookups: Vec<(String, String)> = classes
            .iter()
            .map(|c| (key.clone(), class_field(*c)))
            .collect();
        let values = self.cache.hget_many(&lookups).await?;
        if values.iter().any(Option::is_none) {
            debug!(key, "Ledger miss on pipelined read");
            return self.get(train, segment).await;
        }
        Ok(classes
            .iter()
            .zip(values)
            .map(|(class, value)| (*class, value.unwrap_or(0).max(0) as u32))
            .collect())
    }

    /// Subtracts sold seats from every segment that overlaps `segment`.
    pub async fn decrement(
        &self,
        held: &HeldLocks,
        stations: &[String],
        segment: &Segment,
        sold: &ClassCounts,
    ) -> TicketResult<()> {
        self.apply(held, stations, segment, sold, -1).await
    }

    /// Returns cancelled seats to every segment that overlaps `segment`.
    pub async fn increment(
        &self,
        held: &HeldLocks,
        stations: &[String],
        segment: &Segment,
        returned: &ClassCounts,
    ) -> TicketResult<()> {
        self.apply(held, stations, segment, returned, 1).await
    }

    async fn apply(
        &self,
        held: &HeldLocks,
        stations: &[String],
        segment: &Segment,
        counts: &ClassCounts,
        sign: i64,
    ) -> TicketResult<()> {
        let train_id = held.train_id();
        if let Some((class, _)) = counts.iter().find(|(class, _)| !held.covers(train_id, **class)) {
            return Err(TicketError::Lock(format!(
                "ledger write for {} on {} without its purchase lock",
                class, train_id
            )));
        }
        let affected = affected_segments(stations, segment)
            .ok_or_else(|| TicketError::Validation(format!("segment {} is not on the route", segment)))?;

        for overlapping in &affected {
            let key = remaining_key(train_id, overlapping);
            for (class, count) in counts {
                // Missing keys stay missing and are rebuilt from the store on next read.
                self.cache
                    .hincr_existing(&key, &class_field(*class), sign * (*count as i64))
                    .await?;
            }
        }
        debug!(train_id, segment = %segment, segments = affected.len(), sign, "Ledger updated");
        Ok(())
    }

    /// Drops cached counts of every segment overlapping `segment`.
    pub async fn invalidate(&self, train_id: &str, stations: &[String], segment: &Segment) -> TicketResult<()> {
        for overlapping in affected_segments(stations, segment).unwrap_or_default() {
            self.cache.del(&remaining_key(train_id, &overlapping)).await?;
        }
        Ok(())
    }
}
