//! In-process adapters for every infrastructure seam. Used by tests and by
//! single-node development runs; no Redis, Postgres or Kafka required.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use railseat_core::route::segment_bounds;
use railseat_core::{
    CacheResult, DelayedNotifier, KvCache, LockCoordinator, LockError, LockHandle,
    MessagingError, PriceLookup, SeatRepository, StoreError, StoreResult,
};
use railseat_shared::{
    Allocation, AutoCancelRequested, CarriageRemaining, SeatClass, SeatPrice, Segment, Train,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

enum CacheValue {
    Hash(HashMap<String, i64>),
    Text(String),
}

struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// `KvCache` over a `DashMap`. Each call holds the shard lock of its key for the
/// whole operation, which gives the same per-key atomicity as a Redis script.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge(&self, key: &str) {
        self.entries.remove_if(key, |_, entry| entry.is_expired());
    }

    fn hash_field(&self, key: &str, field: &str) -> Option<i64> {
        self.purge(key);
        let entry = self.entries.get(key)?;
        match &entry.value {
            CacheValue::Hash(fields) => fields.get(field).copied(),
            CacheValue::Text(_) => None,
        }
    }
}

#[async_trait]
impl KvCache for InMemoryCache {
    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<i64>> {
        Ok(self.hash_field(key, field))
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, i64>> {
        self.purge(key);
        Ok(match self.entries.get(key).as_deref() {
            Some(CacheEntry {
                value: CacheValue::Hash(fields),
                ..
            }) => fields.clone(),
            _ => HashMap::new(),
        })
    }

    async fn hget_many(&self, lookups: &[(String, String)]) -> CacheResult<Vec<Option<i64>>> {
        Ok(lookups
            .iter()
            .map(|(key, field)| self.hash_field(key, field))
            .collect())
    }

    async fn hset_many(
        &self,
        entries: &[(String, Vec<(String, i64)>)],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        for (key, fields) in entries.iter().filter(|(_, fields)| !fields.is_empty()) {
            self.purge(key);
            let mut entry = self.entries.entry(key.clone()).or_insert_with(|| CacheEntry {
                value: CacheValue::Hash(HashMap::new()),
                expires_at: None,
            });
            if !matches!(entry.value, CacheValue::Hash(_)) {
                entry.value = CacheValue::Hash(HashMap::new());
            }
            if let CacheValue::Hash(hash) = &mut entry.value {
                hash.extend(fields.iter().cloned());
            }
            if let Some(ttl) = ttl {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn hincr_existing(&self, key: &str, field: &str, delta: i64) -> CacheResult<Option<i64>> {
        self.purge(key);
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let CacheValue::Hash(hash) = &mut entry.value else {
            return Ok(None);
        };
        let value = hash.entry(field.to_string()).or_insert(0);
        *value += delta;
        Ok(Some(*value))
    }

    async fn hdecr_all_or_none(
        &self,
        key: &str,
        demands: &[(String, i64)],
    ) -> CacheResult<Vec<usize>> {
        self.purge(key);
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok((0..demands.len()).collect());
        };
        let CacheValue::Hash(hash) = &mut entry.value else {
            return Ok((0..demands.len()).collect());
        };
        let short: Vec<usize> = demands
            .iter()
            .enumerate()
            .filter(|(_, (field, amount))| hash.get(field).copied().unwrap_or(0) < *amount)
            .map(|(i, _)| i)
            .collect();
        if short.is_empty() {
            for (field, amount) in demands {
                *hash.entry(field.clone()).or_insert(0) -= amount;
            }
        }
        Ok(short)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.purge(key);
        Ok(self.entries.contains_key(key))
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.purge(key);
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(slot) => {
                slot.insert(CacheEntry {
                    value: CacheValue::Text(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                });
                Ok(true)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

/// Named locks on tokio mutexes, which queue waiters in FIFO order.
#[derive(Default)]
pub struct InMemoryLockCoordinator {
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    held: DashMap<String, OwnedMutexGuard<()>>,
    acquisitions: DashMap<String, usize>,
}

impl InMemoryLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `name` has been granted.
    pub fn acquisition_count(&self, name: &str) -> usize {
        self.acquisitions.get(name).map_or(0, |count| *count)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    fn mutex(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn grant(&self, name: &str, owned: OwnedMutexGuard<()>) -> LockHandle {
        let token = Uuid::new_v4().to_string();
        self.held.insert(token.clone(), owned);
        *self.acquisitions.entry(name.to_string()).or_insert(0) += 1;
        LockHandle {
            name: name.to_string(),
            token,
        }
    }
}

#[async_trait]
impl LockCoordinator for InMemoryLockCoordinator {
    async fn lock_fair(&self, name: &str, wait: Duration) -> Result<LockHandle, LockError> {
        let mutex = self.mutex(name);
        match tokio::time::timeout(wait, mutex.lock_owned()).await {
            Ok(owned) => Ok(self.grant(name, owned)),
            Err(_) => Err(LockError::Timeout(name.to_string())),
        }
    }

    async fn try_lock(&self, name: &str) -> Result<Option<LockHandle>, LockError> {
        Ok(self
            .mutex(name)
            .try_lock_owned()
            .ok()
            .map(|owned| self.grant(name, owned)))
    }

    async fn unlock(&self, handle: &LockHandle) -> Result<(), LockError> {
        self.held.remove(&handle.token);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Seats and prices
// ---------------------------------------------------------------------------

struct SeatRecord {
    train_id: String,
    carriage_number: String,
    seat_label: String,
    seat_class: SeatClass,
    /// Sold flag per adjacent leg of the route.
    sold: Vec<bool>,
}

impl SeatRecord {
    fn is_free(&self, from: usize, to: usize) -> bool {
        self.sold[from..to].iter().all(|sold| !sold)
    }

    fn matches(&self, train_id: &str, allocation: &Allocation) -> bool {
        self.train_id == train_id
            && self.carriage_number == allocation.carriage_number
            && self.seat_label == allocation.seat_label
            && self.seat_class == allocation.seat_class
    }
}

/// Seat inventory kept with one sold flag per leg, mirroring the per-leg rows
/// of the relational schema.
#[derive(Default)]
pub struct InMemorySeatRepository {
    trains: DashMap<String, (Train, Vec<String>)>,
    seats: Mutex<Vec<SeatRecord>>,
    prices: DashMap<(String, Segment), Vec<SeatPrice>>,
    unavailable: AtomicBool,
    writes_failing: AtomicBool,
    count_queries: AtomicUsize,
}

impl InMemorySeatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_train(&self, train: Train, stations: Vec<String>) {
        self.trains.insert(train.id.clone(), (train, stations));
    }

    pub fn add_carriage<I, S>(
        &self,
        train_id: &str,
        carriage_number: &str,
        seat_class: SeatClass,
        labels: I,
    ) -> StoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let legs = self
            .trains
            .get(train_id)
            .map(|entry| entry.1.len().saturating_sub(1))
            .ok_or_else(|| StoreError::NotFound(format!("train {}", train_id)))?;
        let mut seats = guard(&self.seats);
        seats.extend(labels.into_iter().map(|label| SeatRecord {
            train_id: train_id.to_string(),
            carriage_number: carriage_number.to_string(),
            seat_label: label.into(),
            seat_class,
            sold: vec![false; legs],
        }));
        Ok(())
    }

    pub fn set_price(&self, train_id: &str, segment: Segment, seat_class: SeatClass, amount: i64) {
        let mut prices = self.prices.entry((train_id.to_string(), segment)).or_default();
        prices.retain(|p| p.seat_class != seat_class);
        prices.push(SeatPrice { seat_class, amount });
    }

    /// Makes every call fail with a backend error until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes only `lock_seats` and `release_seats` fail; reads keep working.
    pub fn set_writes_failing(&self, failing: bool) {
        self.writes_failing.store(failing, Ordering::SeqCst);
    }

    /// How many `select_seat_count` calls have reached the store.
    pub fn count_queries(&self) -> usize {
        self.count_queries.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("seat store unavailable".into()));
        }
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_available()?;
        if self.writes_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("seat store rejected write".into()));
        }
        Ok(())
    }

    fn bounds(&self, train_id: &str, segment: &Segment) -> StoreResult<(usize, usize)> {
        let entry = self
            .trains
            .get(train_id)
            .ok_or_else(|| StoreError::NotFound(format!("train {}", train_id)))?;
        segment_bounds(&entry.1, segment).ok_or_else(|| {
            StoreError::NotFound(format!("segment {} on train {}", segment, train_id))
        })
    }

    fn free_seats<'a>(
        seats: &'a [SeatRecord],
        train_id: &'a str,
        seat_class: SeatClass,
        (from, to): (usize, usize),
    ) -> impl Iterator<Item = &'a SeatRecord> + 'a {
        seats.iter().filter(move |s| {
            s.train_id == train_id && s.seat_class == seat_class && s.is_free(from, to)
        })
    }
}

#[async_trait]
impl SeatRepository for InMemorySeatRepository {
    async fn get_train(&self, train_id: &str) -> StoreResult<Option<Train>> {
        self.check_available()?;
        Ok(self.trains.get(train_id).map(|entry| entry.0.clone()))
    }

    async fn list_route(&self, train_id: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        Ok(self
            .trains
            .get(train_id)
            .map(|entry| entry.1.clone())
            .unwrap_or_default())
    }

    async fn select_seat_count(
        &self,
        train_id: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<u32> {
        self.check_available()?;
        self.count_queries.fetch_add(1, Ordering::SeqCst);
        let bounds = self.bounds(train_id, segment)?;
        let seats = guard(&self.seats);
        Ok(Self::free_seats(&seats, train_id, seat_class, bounds).count() as u32)
    }

    async fn list_carriage_remaining(
        &self,
        train_id: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<Vec<CarriageRemaining>> {
        self.check_available()?;
        let bounds = self.bounds(train_id, segment)?;
        let seats = guard(&self.seats);
        let mut counts: Vec<CarriageRemaining> = Vec::new();
        for seat in Self::free_seats(&seats, train_id, seat_class, bounds) {
            match counts.iter_mut().find(|c| c.carriage_number == seat.carriage_number) {
                Some(carriage) => carriage.remaining += 1,
                None => counts.push(CarriageRemaining {
                    carriage_number: seat.carriage_number.clone(),
                    remaining: 1,
                }),
            }
        }
        counts.sort_by(|a, b| a.carriage_number.cmp(&b.carriage_number));
        Ok(counts)
    }

    async fn list_available_seat_labels(
        &self,
        train_id: &str,
        carriage_number: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let bounds = self.bounds(train_id, segment)?;
        let seats = guard(&self.seats);
        let mut labels: Vec<String> = Self::free_seats(&seats, train_id, seat_class, bounds)
            .filter(|s| s.carriage_number == carriage_number)
            .map(|s| s.seat_label.clone())
            .collect();
        labels.sort();
        Ok(labels)
    }

    async fn lock_seats(
        &self,
        train_id: &str,
        segment: &Segment,
        allocations: &[Allocation],
    ) -> StoreResult<()> {
        self.check_writable()?;
        let (from, to) = self.bounds(train_id, segment)?;
        let mut seats = guard(&self.seats);

        let mut indexes = Vec::with_capacity(allocations.len());
        for allocation in allocations {
            let index = seats
                .iter()
                .position(|s| s.matches(train_id, allocation) && s.is_free(from, to))
                .filter(|i| !indexes.contains(i))
                .ok_or_else(|| {
                    StoreError::Conflict(format!(
                        "seat {}-{} no longer free on {}",
                        allocation.carriage_number, allocation.seat_label, segment
                    ))
                })?;
            indexes.push(index);
        }
        for index in indexes {
            seats[index].sold[from..to].fill(true);
        }
        Ok(())
    }

    async fn release_seats(
        &self,
        train_id: &str,
        segment: &Segment,
        allocations: &[Allocation],
    ) -> StoreResult<()> {
        self.check_writable()?;
        let (from, to) = self.bounds(train_id, segment)?;
        let mut seats = guard(&self.seats);
        for allocation in allocations {
            if let Some(seat) = seats.iter_mut().find(|s| s.matches(train_id, allocation)) {
                seat.sold[from..to].fill(false);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PriceLookup for InMemorySeatRepository {
    async fn list_prices(&self, train_id: &str, segment: &Segment) -> StoreResult<Vec<SeatPrice>> {
        self.check_available()?;
        let mut prices = self
            .prices
            .get(&(train_id.to_string(), segment.clone()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        prices.sort_by_key(|p| p.seat_class);
        Ok(prices)
    }
}

// ---------------------------------------------------------------------------
// Deferred messaging
// ---------------------------------------------------------------------------

/// Keeps every scheduled auto-cancel in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<AutoCancelRequested>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AutoCancelRequested> {
        guard(&self.events).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DelayedNotifier for RecordingNotifier {
    async fn schedule_auto_cancel(&self, event: &AutoCancelRequested) -> Result<(), MessagingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MessagingError("broker unreachable".into()));
        }
        guard(&self.events).push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railseat_shared::VehicleType;

    fn repo() -> InMemorySeatRepository {
        let repo = InMemorySeatRepository::new();
        repo.add_train(
            Train {
                id: "G35".into(),
                train_number: "G35".into(),
                vehicle_type: VehicleType::HighSpeed,
                start_station: "A".into(),
                end_station: "C".into(),
            },
            vec!["A".into(), "B".into(), "C".into()],
        );
        repo.add_carriage("G35", "01", SeatClass::BusinessClass, ["01A", "01F"])
            .unwrap();
        repo
    }

    fn allocation(label: &str) -> Allocation {
        Allocation {
            passenger_id: "p1".into(),
            carriage_number: "01".into(),
            seat_label: label.into(),
            seat_class: SeatClass::BusinessClass,
        }
    }

    #[tokio::test]
    async fn test_seat_sold_on_one_leg_blocks_overlapping_segments() {
        let repo = repo();
        let ab = Segment::new("A", "B");
        repo.lock_seats("G35", &ab, &[allocation("01A")]).await.unwrap();

        assert_eq!(repo.select_seat_count("G35", SeatClass::BusinessClass, &ab).await.unwrap(), 1);
        let ac = Segment::new("A", "C");
        assert_eq!(repo.select_seat_count("G35", SeatClass::BusinessClass, &ac).await.unwrap(), 1);
        let bc = Segment::new("B", "C");
        assert_eq!(repo.select_seat_count("G35", SeatClass::BusinessClass, &bc).await.unwrap(), 2);

        let err = repo.lock_seats("G35", &ac, &[allocation("01A")]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        repo.release_seats("G35", &ab, &[allocation("01A")]).await.unwrap();
        assert_eq!(repo.select_seat_count("G35", SeatClass::BusinessClass, &ac).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lock_seats_is_all_or_nothing() {
        let repo = repo();
        let ab = Segment::new("A", "B");
        let err = repo
            .lock_seats("G35", &ab, &[allocation("01A"), allocation("01A")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(repo.select_seat_count("G35", SeatClass::BusinessClass, &ab).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failing_writes_leave_seats_untouched() {
        let repo = repo();
        let ab = Segment::new("A", "B");
        repo.set_writes_failing(true);
        let err = repo.lock_seats("G35", &ab, &[allocation("01A")]).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        // Reads still work while writes fail.
        assert_eq!(repo.select_seat_count("G35", SeatClass::BusinessClass, &ab).await.unwrap(), 2);

        repo.set_writes_failing(false);
        repo.lock_seats("G35", &ab, &[allocation("01A")]).await.unwrap();
        repo.set_unavailable(true);
        assert!(repo.release_seats("G35", &ab, &[allocation("01A")]).await.is_err());
        repo.set_unavailable(false);
        assert_eq!(repo.select_seat_count("G35", SeatClass::BusinessClass, &ab).await.unwrap(), 1);
        assert_eq!(repo.count_queries(), 2);
    }

    #[tokio::test]
    async fn test_decrement_all_or_none() {
        let cache = InMemoryCache::new();
        cache
            .hset_many(&[("bucket".into(), vec![("a".into(), 2), ("b".into(), 1)])], None)
            .await
            .unwrap();
        let short = cache
            .hdecr_all_or_none("bucket", &[("a".into(), 1), ("b".into(), 2)])
            .await
            .unwrap();
        assert_eq!(short, vec![1]);
        assert_eq!(cache.hget("bucket", "a").await.unwrap(), Some(2));

        let short = cache
            .hdecr_all_or_none("bucket", &[("a".into(), 2), ("b".into(), 1)])
            .await
            .unwrap();
        assert!(short.is_empty());
        assert_eq!(cache.hgetall("bucket").await.unwrap().values().sum::<i64>(), 0);
    }

    #[tokio::test]
    async fn test_increment_never_seeds_missing_key() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.hincr_existing("ledger", "0", 3).await.unwrap(), None);
        assert!(!cache.exists("ledger").await.unwrap());

        cache
            .hset_many(&[("ledger".into(), vec![("0".into(), 1)])], None)
            .await
            .unwrap();
        assert_eq!(cache.hincr_existing("ledger", "0", -5).await.unwrap(), Some(-4));
        // The matching increment lands back on the original value.
        assert_eq!(cache.hincr_existing("ledger", "0", 5).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_marker_expires() {
        let cache = InMemoryCache::new();
        assert!(cache.set_if_absent("m", "1", Duration::from_millis(20)).await.unwrap());
        assert!(!cache.set_if_absent("m", "1", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.set_if_absent("m", "1", Duration::from_millis(20)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fair_lock_times_out_then_succeeds() {
        let locks = InMemoryLockCoordinator::new();
        let first = locks.lock_fair("x", Duration::from_millis(50)).await.unwrap();
        let err = locks.lock_fair("x", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, LockError::Timeout(_)));
        assert!(locks.try_lock("x").await.unwrap().is_none());

        locks.unlock(&first).await.unwrap();
        let second = locks.try_lock("x").await.unwrap();
        assert!(second.is_some());
        assert_eq!(locks.acquisition_count("x"), 2);
    }
}
