//! Two-tier (process-local + cluster-wide) locking per (train, seat class).

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use railseat_core::{LockCoordinator, LockHandle, TicketError, TicketResult};
use railseat_shared::SeatClass;

pub fn purchase_lock_name(train_id: &str, seat_class: SeatClass) -> String {
    format!("lock:purchase-tickets:{}_{}", train_id, seat_class.code())
}

struct LocalLock {
    lock: Arc<Mutex<()>>,
    last_used: Instant,
}

/// Bounded map of process-local locks. Creation goes through the map's entry
/// API so two callers can never end up with different locks for one name.
/// Entries idle past `ttl` are evicted once the map outgrows `capacity`; a lock
/// somebody still holds a reference to is never evicted.
pub struct LocalLockRegistry {
    locks: DashMap<String, LocalLock>,
    ttl: Duration,
    capacity: usize,
}

impl LocalLockRegistry {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            locks: DashMap::new(),
            ttl,
            capacity,
        }
    }

    pub fn get(&self, name: &str) -> Arc<Mutex<()>> {
        let lock = {
            let mut entry = self.locks.entry(name.to_string()).or_insert_with(|| LocalLock {
                lock: Arc::new(Mutex::new(())),
                last_used: Instant::now(),
            });
            entry.last_used = Instant::now();
            entry.lock.clone()
        };
        if self.locks.len() > self.capacity {
            self.evict();
        }
        lock
    }

    fn evict(&self) {
        let before = self.locks.len();
        self.locks
            .retain(|_, local| Arc::strong_count(&local.lock) > 1 || local.last_used.elapsed() < self.ttl);
        if self.locks.len() > self.capacity {
            // Still over: drop every idle lock regardless of age.
            self.locks.retain(|_, local| Arc::strong_count(&local.lock) > 1);
        }
        debug!(before, after = self.locks.len(), "Evicted idle local locks");
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

struct HeldLock {
    seat_class: SeatClass,
    cluster: Option<LockHandle>,
    _local: OwnedMutexGuard<()>,
}

/// Proof that the purchase locks of a set of seat classes on one train are held.
/// Call [`HeldLocks::release`]; if it is dropped instead, the cluster locks are
/// released on a background task.
pub struct HeldLocks {
    train_id: String,
    held: Vec<HeldLock>,
    coordinator: Arc<dyn LockCoordinator>,
}

impl HeldLocks {
    pub fn train_id(&self) -> &str {
        &self.train_id
    }

    pub fn covers(&self, train_id: &str, seat_class: SeatClass) -> bool {
        self.train_id == train_id && self.held.iter().any(|h| h.seat_class == seat_class)
    }

    pub fn seat_classes(&self) -> Vec<SeatClass> {
        self.held.iter().map(|h| h.seat_class).collect()
    }

    /// Releases in reverse acquisition order, cluster lock before local lock.
    pub async fn release(mut self) {
        while let Some(mut held) = self.held.pop() {
            if let Some(handle) = held.cluster.take() {
                if let Err(e) = self.coordinator.unlock(&handle).await {
                    warn!(lock = %handle.name, error = %e, "Failed to release cluster lock");
                }
            }
        }
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let handles: Vec<LockHandle> = self
            .held
            .iter_mut()
            .rev()
            .filter_map(|h| h.cluster.take())
            .collect();
        if handles.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(count = handles.len(), "Cluster locks dropped outside a runtime; leases will expire");
            return;
        };
        let coordinator = self.coordinator.clone();
        runtime.spawn(async move {
            for handle in handles {
                if let Err(e) = coordinator.unlock(&handle).await {
                    warn!(lock = %handle.name, error = %e, "Failed to release dropped cluster lock");
                }
            }
        });
    }
}

/// Acquires one local and one cluster lock per seat class, in seat-class order.
pub struct ConcurrencyGuard {
    local: LocalLockRegistry,
    cluster: Arc<dyn LockCoordinator>,
    wait: Duration,
}

impl ConcurrencyGuard {
    pub fn new(local: LocalLockRegistry, cluster: Arc<dyn LockCoordinator>, wait: Duration) -> Self {
        Self {
            local,
            cluster,
            wait,
        }
    }

    pub async fn acquire(
        &self,
        train_id: &str,
        seat_classes: impl IntoIterator<Item = SeatClass>,
    ) -> TicketResult<HeldLocks> {
        let ordered: BTreeSet<SeatClass> = seat_classes.into_iter().collect();
        let mut held = HeldLocks {
            train_id: train_id.to_string(),
            held: Vec::with_capacity(ordered.len()),
            coordinator: self.cluster.clone(),
        };

        for seat_class in ordered {
            let name = purchase_lock_name(train_id, seat_class);
            let local = match tokio::time::timeout(self.wait, self.local.get(&name).lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(lock = %name, "Timed out waiting for local purchase lock");
                    held.release().await;
                    return Err(TicketError::LockTimeout(name));
                }
            };
            let cluster = match self.cluster.lock_fair(&name, self.wait).await {
                Ok(handle) => handle,
                Err(e) => {
                    drop(local);
                    held.release().await;
                    return Err(e.into());
                }
            };
            debug!(lock = %name, "Purchase lock acquired");
            held.held.push(HeldLock {
                seat_class,
                cluster: Some(cluster),
                _local: local,
            });
        }
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railseat_store::memory::InMemoryLockCoordinator;

    fn guard(coordinator: Arc<InMemoryLockCoordinator>, wait_ms: u64) -> ConcurrencyGuard {
        ConcurrencyGuard::new(
            LocalLockRegistry::new(Duration::from_secs(60), 100),
            coordinator,
            Duration::from_millis(wait_ms),
        )
    }

    #[tokio::test]
    async fn test_acquire_in_class_order_and_release() {
        let coordinator = Arc::new(InMemoryLockCoordinator::new());
        let guard = guard(coordinator.clone(), 100);

        let held = guard
            .acquire("G35", [SeatClass::SecondClass, SeatClass::BusinessClass])
            .await
            .unwrap();
        assert_eq!(held.seat_classes(), vec![SeatClass::BusinessClass, SeatClass::SecondClass]);
        assert!(held.covers("G35", SeatClass::SecondClass));
        assert!(!held.covers("G35", SeatClass::FirstClass));
        assert!(!held.covers("D1", SeatClass::SecondClass));
        assert_eq!(coordinator.held_count(), 2);

        held.release().await;
        assert_eq!(coordinator.held_count(), 0);
    }

    #[tokio::test]
    async fn test_contention_times_out_and_releases_partial() {
        let coordinator = Arc::new(InMemoryLockCoordinator::new());
        let guard = Arc::new(guard(coordinator.clone(), 30));

        let first = guard.acquire("G35", [SeatClass::FirstClass]).await.unwrap();
        let err = guard
            .acquire("G35", [SeatClass::BusinessClass, SeatClass::FirstClass])
            .await
            .err()
            .unwrap();
        assert!(err.is_retryable());
        // Business was taken then given back.
        assert_eq!(coordinator.held_count(), 1);

        first.release().await;
        let again = guard
            .acquire("G35", [SeatClass::BusinessClass, SeatClass::FirstClass])
            .await
            .unwrap();
        again.release().await;
    }

    #[tokio::test]
    async fn test_disjoint_classes_do_not_block() {
        let coordinator = Arc::new(InMemoryLockCoordinator::new());
        let guard = guard(coordinator, 30);
        let business = guard.acquire("G35", [SeatClass::BusinessClass]).await.unwrap();
        let second = guard.acquire("G35", [SeatClass::SecondClass]).await.unwrap();
        business.release().await;
        second.release().await;
    }

    #[tokio::test]
    async fn test_dropped_locks_are_released() {
        let coordinator = Arc::new(InMemoryLockCoordinator::new());
        let guard = guard(coordinator.clone(), 100);
        drop(guard.acquire("G35", [SeatClass::FirstClass]).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.held_count(), 0);
    }

    #[test]
    fn test_registry_returns_same_lock_and_evicts_idle() {
        let registry = LocalLockRegistry::new(Duration::from_secs(3600), 2);
        let a = registry.get("a");
        assert!(Arc::ptr_eq(&a, &registry.get("a")));
        drop(registry.get("b"));
        drop(registry.get("c"));
        // "a" is still referenced, so it survives eviction.
        assert!(registry.len() <= 2);
        assert!(Arc::ptr_eq(&a, &registry.get("a")));
    }
}
