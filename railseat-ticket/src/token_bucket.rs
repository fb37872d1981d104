//! Admission pre-filter: a per-train bucket of tokens mirroring the ledger.
//!
//! The bucket is approximate. A grant only lets a request into the locked
//! allocation path, which re-checks the ledger and the seat grid; a denial
//! is reconciled against the ledger after a grace period.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use railseat_core::route::{affected_segments, salable_segments};
use railseat_core::{KvCache, LockCoordinator, TicketError, TicketResult};
use railseat_shared::{SeatClass, Segment, Train};

use crate::ledger::{ClassCounts, RemainingTicketLedger};
use crate::reconcile::{ReconcileScheduler, ReconcileTask};

const BUCKET_PREFIX: &str = "ticket:token-bucket:";
const LOAD_LOCK_PREFIX: &str = "lock:token-bucket-load:";
const RECONCILE_MARKER_PREFIX: &str = "ticket:token-bucket-reconcile:";

pub fn bucket_key(train_id: &str) -> String {
    format!("{}{}", BUCKET_PREFIX, train_id)
}

pub fn bucket_field(segment: &Segment, seat_class: SeatClass) -> String {
    format!("{}_{}_{}", segment.origin, segment.destination, seat_class.code())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Classes the bucket could not cover, with the requested count.
    Denied { short: Vec<(SeatClass, u32)> },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }

    /// The first short class as the error the caller sees.
    pub fn into_result(self) -> TicketResult<()> {
        match self {
            Admission::Granted => Ok(()),
            Admission::Denied { short } => Err(TicketError::InventoryExhausted {
                seat_class: short.first().map_or(SeatClass::NoSeat, |(class, _)| *class),
            }),
        }
    }
}

pub struct AdmissionTokenBucket {
    cache: Arc<dyn KvCache>,
    ledger: Arc<RemainingTicketLedger>,
    locks: Arc<dyn LockCoordinator>,
    reconciler: ReconcileScheduler,
    ttl: Duration,
    marker_ttl: Duration,
    load_wait: Duration,
}

impl AdmissionTokenBucket {
    pub fn new(
        cache: Arc<dyn KvCache>,
        ledger: Arc<RemainingTicketLedger>,
        locks: Arc<dyn LockCoordinator>,
        reconciler: ReconcileScheduler,
        ttl: Duration,
        marker_ttl: Duration,
        load_wait: Duration,
    ) -> Self {
        Self {
            cache,
            ledger,
            locks,
            reconciler,
            ttl,
            marker_ttl,
            load_wait,
        }
    }

    /// Takes `demand` tokens on `segment`, all classes or none.
    pub async fn take(
        &self,
        train: &Train,
        stations: &[String],
        segment: &Segment,
        demand: &ClassCounts,
    ) -> TicketResult<Admission> {
        let key = bucket_key(&train.id);
        let demands: Vec<(String, i64)> = demand
            .iter()
            .map(|(class, count)| (bucket_field(segment, *class), *count as i64))
            .collect();

        let mut reloaded = false;
        let short = loop {
            self.ensure_loaded(train, stations).await?;
            let short = self.cache.hdecr_all_or_none(&key, &demands).await?;
            // An expired bucket reads as empty; rebuild once before denying.
            if short.is_empty() || reloaded || self.cache.exists(&key).await? {
                break short;
            }
            reloaded = true;
            debug!(train_id = %train.id, "Admission bucket vanished mid-take, reloading");
        };

        if short.is_empty() {
            self.adjust_overlapping(&key, stations, segment, demand, -1).await?;
            return Ok(Admission::Granted);
        }

        let classes: Vec<(SeatClass, u32)> = demand.iter().map(|(class, count)| (*class, *count)).collect();
        let short: Vec<(SeatClass, u32)> = short.into_iter().filter_map(|i| classes.get(i).copied()).collect();
        info!(train_id = %train.id, segment = %segment, short = ?short, "Admission denied");
        self.schedule_reconcile(train, segment, &short).await;
        Ok(Admission::Denied { short })
    }

    /// Returns tokens taken by a purchase that did not complete, or by a cancellation.
    pub async fn rollback(
        &self,
        train_id: &str,
        stations: &[String],
        segment: &Segment,
        returned: &ClassCounts,
    ) -> TicketResult<()> {
        let key = bucket_key(train_id);
        for (class, count) in returned {
            self.cache
                .hincr_existing(&key, &bucket_field(segment, *class), *count as i64)
                .await?;
        }
        self.adjust_overlapping(&key, stations, segment, returned, 1).await
    }

    /// Applies `sign * count` to every affected segment except `segment` itself.
    async fn adjust_overlapping(
        &self,
        key: &str,
        stations: &[String],
        segment: &Segment,
        counts: &ClassCounts,
        sign: i64,
    ) -> TicketResult<()> {
        let affected = affected_segments(stations, segment)
            .ok_or_else(|| TicketError::Validation(format!("segment {} is not on the route", segment)))?;
        for overlapping in affected.iter().filter(|s| *s != segment) {
            for (class, count) in counts {
                self.cache
                    .hincr_existing(key, &bucket_field(overlapping, *class), sign * (*count as i64))
                    .await?;
            }
        }
        Ok(())
    }

    async fn ensure_loaded(&self, train: &Train, stations: &[String]) -> TicketResult<()> {
        let key = bucket_key(&train.id);
        if self.cache.exists(&key).await? {
            return Ok(());
        }
        let lock_name = format!("{}{}", LOAD_LOCK_PREFIX, train.id);
        let handle = self.locks.lock_fair(&lock_name, self.load_wait).await?;
        let loaded = self.load_locked(train, stations, &key).await;
        if let Err(e) = self.locks.unlock(&handle).await {
            warn!(lock = %lock_name, error = %e, "Failed to release bucket load lock");
        }
        loaded
    }

    async fn load_locked(&self, train: &Train, stations: &[String], key: &str) -> TicketResult<()> {
        if self.cache.exists(key).await? {
            return Ok(());
        }
        let mut fields = Vec::new();
        for segment in salable_segments(stations) {
            let counts = self.ledger.get(train, &segment).await?;
            fields.extend(
                counts
                    .into_iter()
                    .map(|(class, count)| (bucket_field(&segment, class), count as i64)),
            );
        }
        self.cache
            .hset_many(&[(key.to_string(), fields)], Some(self.ttl))
            .await?;
        info!(train_id = %train.id, "Admission bucket loaded from ledger");
        Ok(())
    }

    async fn schedule_reconcile(&self, train: &Train, segment: &Segment, short: &[(SeatClass, u32)]) {
        let marker_key = format!("{}{}", RECONCILE_MARKER_PREFIX, train.id);
        match self.cache.set_if_absent(&marker_key, "1", self.marker_ttl).await {
            Ok(true) => self.reconciler.schedule(ReconcileTask {
                train: train.clone(),
                segment: segment.clone(),
                short: short.to_vec(),
                bucket_key: bucket_key(&train.id),
                marker_key,
            }),
            Ok(false) => debug!(train_id = %train.id, "Reconciliation already pending"),
            Err(e) => warn!(train_id = %train.id, error = %e, "Could not place reconcile marker"),
        }
    }
}
